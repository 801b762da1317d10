//! Application error handling

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use intake_core::{IntakeError, IssueType, OperationOutcome};

/// Application error type
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, outcome) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, OperationOutcome::not_found(&msg)),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, OperationOutcome::invalid(&msg)),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, OperationOutcome::conflict(&msg)),
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                OperationOutcome::error(IssueType::Exception, &msg),
            ),
        };

        (status, Json(outcome)).into_response()
    }
}

impl From<IntakeError> for AppError {
    fn from(err: IntakeError) -> Self {
        let msg = err.to_string();
        match err {
            IntakeError::InvalidQuestionnaire(_)
            | IntakeError::InvalidInput(_)
            | IntakeError::NotSupported(_) => AppError::BadRequest(msg),
            IntakeError::TurnInProgress
            | IntakeError::SessionCompleted
            | IntakeError::InterviewInactive => AppError::Conflict(msg),
            IntakeError::Llm(_) | IntakeError::MalformedResponse(_) | IntakeError::Storage(_) => {
                tracing::error!(error = %msg, "Request failed");
                AppError::Internal(msg)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intake_errors_map_to_statuses() {
        let cases = [
            (IntakeError::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (IntakeError::NotSupported("x".into()), StatusCode::BAD_REQUEST),
            (IntakeError::TurnInProgress, StatusCode::CONFLICT),
            (IntakeError::SessionCompleted, StatusCode::CONFLICT),
            (IntakeError::InterviewInactive, StatusCode::CONFLICT),
            (IntakeError::Storage("disk".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).into_response().status(), status);
        }
    }
}
