//! Interview session HTTP handlers

use axum::{
    Json,
    extract::{Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use intake_core::{AnswerCode, InterviewMode, InterviewSession, Questionnaire, SessionView};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

/// Request body for starting a session
#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    questionnaire: JsonValue,
    #[serde(default)]
    mode: InterviewMode,
}

/// Request body for a typed message
#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    text: String,
}

/// Request body for an option choice; a null code skips the question
#[derive(Debug, Deserialize)]
pub struct SelectRequest {
    #[serde(default)]
    code: Option<AnswerCode>,
}

fn find(state: &AppState, id: Uuid) -> Result<Arc<InterviewSession>, AppError> {
    state
        .sessions
        .get(id)
        .ok_or_else(|| AppError::NotFound(format!("Session/{id} not found")))
}

/// POST /sessions - Load a questionnaire and start interviewing
pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let questionnaire = Questionnaire::from_json(body.questionnaire)?;

    let session = Arc::new(InterviewSession::new(
        &questionnaire,
        body.mode,
        state.llm.clone(),
        state.store.clone(),
        state.settings.clone(),
    ));
    let view = session.start().await?;

    // Only a started session is reachable by id
    state.sessions.insert(session);
    metrics::counter!("intake_sessions_started_total", "mode" => body.mode.as_str()).increment(1);

    let location = format!("/sessions/{}", view.id);

    Ok((StatusCode::CREATED, [(header::LOCATION, location)], Json(view)))
}

/// GET /sessions/{id} - Current state of a session
pub async fn read(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, AppError> {
    Ok(Json(find(&state, id)?.view()))
}

/// POST /sessions/{id}/messages - Submit a typed answer
pub async fn submit(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<MessageRequest>,
) -> Result<Json<SessionView>, AppError> {
    let session = find(&state, id)?;
    metrics::counter!("intake_messages_total", "mode" => session.mode().as_str()).increment(1);
    Ok(Json(session.submit(&body.text).await?))
}

/// POST /sessions/{id}/select - Choose an offered option, or skip
pub async fn select(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<SelectRequest>,
) -> Result<Json<SessionView>, AppError> {
    let session = find(&state, id)?;
    let code = body.code.map(|c| c.to_string());
    Ok(Json(session.select_option(code.as_deref()).await?))
}

/// POST /sessions/{id}/end - Finish early and save the log
pub async fn end(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, AppError> {
    let session = find(&state, id)?;
    Ok(Json(session.end_early().await?))
}

/// DELETE /sessions/{id} - Discard a session
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    match state.sessions.remove(id) {
        Some(_) => {
            tracing::info!(session_id = %id, "Session discarded");
            Ok(StatusCode::NO_CONTENT)
        }
        None => Err(AppError::NotFound(format!("Session/{id} not found"))),
    }
}
