//! Stored session log handlers

use axum::{
    Json,
    extract::{Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use intake_core::{LogKey, SessionRecord, compute_scores};
use serde::Serialize;

use crate::error::AppError;
use crate::state::AppState;

/// One row of the log listing
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogSummary {
    day: String,
    time: String,
    questionnaire_title: String,
    has_structured_response: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    grand_total: Option<f64>,
}

fn not_found(key: &LogKey) -> AppError {
    AppError::NotFound(format!("Log {}/{} not found", key.day, key.time))
}

/// Title reduced to `[A-Za-z0-9_-]`, runs of anything else become one dash
fn sanitize_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            out.push(c);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        "Untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

/// GET /logs - Stored sessions, newest first
pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<LogSummary>>, AppError> {
    let logs = state.store.list().await?;
    let summaries = logs
        .into_iter()
        .rev()
        .flat_map(|(day, sessions)| {
            sessions.into_iter().rev().map(move |(time, record)| LogSummary {
                day: day.clone(),
                time,
                has_structured_response: record.structured_response.is_some(),
                grand_total: record
                    .structured_response
                    .as_ref()
                    .and_then(compute_scores)
                    .map(|scores| scores.grand_total),
                questionnaire_title: record.questionnaire_title,
            })
        })
        .collect();
    Ok(Json(summaries))
}

/// GET /logs/{day}/{time} - One stored record
pub async fn read(
    State(state): State<AppState>,
    Path((day, time)): Path<(String, String)>,
) -> Result<Json<SessionRecord>, AppError> {
    let key = LogKey::new(day, time);
    state
        .store
        .get(&key)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(&key))
}

/// GET /logs/{day}/{time}/transcript - Markdown download
pub async fn transcript(
    State(state): State<AppState>,
    Path((day, time)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let key = LogKey::new(day, time);
    let record = state.store.get(&key).await?.ok_or_else(|| not_found(&key))?;

    let filename = format!(
        "intake-log_{}_{}_{}.md",
        key.day,
        key.time,
        sanitize_title(&record.questionnaire_title)
    );
    Ok((
        [
            (header::CONTENT_TYPE, "text/markdown; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        record.markdown,
    ))
}

/// DELETE /logs/{day}/{time} - Remove a stored record
pub async fn delete(
    State(state): State<AppState>,
    Path((day, time)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let key = LogKey::new(day, time);
    if state.store.delete(&key).await? {
        tracing::info!(day = %key.day, time = %key.time, "Session log deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(&key))
    }
}
