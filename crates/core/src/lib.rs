//! intake-core: conversational FHIR Questionnaire interviews
//!
//! This crate turns a Questionnaire into a chat: it flattens the item tree,
//! classifies patient utterances, drives step-by-step or LLM-led interviews,
//! and exports finished transcripts as stored records.

pub mod classifier;
pub mod error;
pub mod interview;
pub mod llm;
pub mod outcome;
pub mod questionnaire;
pub mod response;
pub mod store;
pub mod transcript;

pub use classifier::{Utterance, classify};
pub use error::IntakeError;
pub use interview::{
    AnswerRecord, FinalizationStatus, InterviewMode, InterviewSession, SessionPhase,
    SessionSettings, SessionView, StepPhase,
};
pub use llm::{InterviewLlm, InterviewTurn, LlmMessage, Role, TurnAction, TurnRequest};
pub use outcome::{IssueSeverity, IssueType, OperationOutcome, OperationOutcomeIssue};
pub use questionnaire::{AnswerCode, AnswerOption, Question, QuestionView, Questionnaire};
pub use response::{ResponseScores, compute_scores};
pub use store::{LogKey, MemoryStore, SessionLogs, SessionRecord, SessionStore};
pub use transcript::{Message, Sender, Transcript, generate_markdown_transcript};
