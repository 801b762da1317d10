//! Audit logging for session and log mutations

use axum::{body::Body, extract::Request, http::Method, middleware::Next, response::Response};

use super::request_id::RequestId;

/// Log every mutating request (POST, DELETE) under the `audit` target.
///
/// Answers travel in POST bodies; only the route and outcome are logged,
/// never the body.
pub async fn audit_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    if !matches!(method, Method::POST | Method::PUT | Method::DELETE) {
        return next.run(request).await;
    }

    let path = request.uri().path().to_string();
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|r| r.0.clone())
        .unwrap_or_else(|| "unknown".to_string());

    let response = next.run(request).await;
    let status = response.status();

    if status.is_server_error() {
        tracing::warn!(target: "audit", request_id = %request_id, method = %method, path = %path, status = status.as_u16(), "Mutation failed");
    } else {
        tracing::info!(target: "audit", request_id = %request_id, method = %method, path = %path, status = status.as_u16(), "Mutation request");
    }

    response
}
