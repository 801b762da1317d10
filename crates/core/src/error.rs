use crate::outcome::{IssueType, OperationOutcome};
use thiserror::Error;

/// Intake interview error types
#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("Invalid questionnaire: {0}")]
    InvalidQuestionnaire(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("A turn is already in progress for this session")]
    TurnInProgress,

    #[error("Session is already completed")]
    SessionCompleted,

    #[error("Interview is not active")]
    InterviewInactive,

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Malformed LLM response: {0}")]
    MalformedResponse(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl IntakeError {
    /// FHIR issue type that best describes this error
    pub fn issue_type(&self) -> IssueType {
        match self {
            IntakeError::InvalidQuestionnaire(_) => IssueType::Structure,
            IntakeError::InvalidInput(_) => IssueType::Invalid,
            IntakeError::NotSupported(_) => IssueType::NotSupported,
            IntakeError::TurnInProgress => IssueType::Conflict,
            IntakeError::SessionCompleted | IntakeError::InterviewInactive => {
                IssueType::BusinessRule
            }
            IntakeError::Llm(_) | IntakeError::MalformedResponse(_) => IssueType::Transient,
            IntakeError::Storage(_) => IssueType::Exception,
        }
    }

    /// Render this error as an OperationOutcome resource
    pub fn to_outcome(&self) -> OperationOutcome {
        OperationOutcome::error(self.issue_type(), &self.to_string())
    }
}
