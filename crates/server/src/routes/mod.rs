pub mod health;
mod logs;
mod sessions;

use axum::{
    Router,
    routing::{get, post},
};

use crate::state::AppState;

/// Build interview session routes
pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/sessions", post(sessions::create))
        .route(
            "/sessions/{id}",
            get(sessions::read).delete(sessions::delete),
        )
        .route("/sessions/{id}/messages", post(sessions::submit))
        .route("/sessions/{id}/select", post(sessions::select))
        .route("/sessions/{id}/end", post(sessions::end))
}

/// Build stored log routes
pub fn log_routes() -> Router<AppState> {
    Router::new()
        .route("/logs", get(logs::list))
        .route("/logs/{day}/{time}", get(logs::read).delete(logs::delete))
        .route("/logs/{day}/{time}/transcript", get(logs::transcript))
}
