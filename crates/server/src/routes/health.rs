//! Health check and metrics endpoints

use axum::{Extension, Json, extract::State, response::IntoResponse};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;

use crate::state::AppState;

/// Health check response
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    status: &'static str,
    /// `unconfigured` when no API key is set
    llm: &'static str,
    active_sessions: usize,
}

/// GET /health - Report server health and LLM configuration
pub async fn check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        llm: state.llm_provider.unwrap_or("unconfigured"),
        active_sessions: state.sessions.len(),
    })
}

/// GET /metrics - Render collected metrics in Prometheus text format
pub async fn metrics(Extension(handle): Extension<PrometheusHandle>) -> impl IntoResponse {
    handle.render()
}
