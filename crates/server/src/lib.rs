//! intake-server library crate
//!
//! Exposes `build_app` and `config` for integration tests.
//! The actual binary entrypoint is in `main.rs`.

pub mod ai;
pub mod config;
mod error;
mod middleware;
mod routes;
mod state;
pub mod store;

use std::sync::Arc;

use axum::{Extension, Router, middleware as axum_mw, routing::get};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use intake_core::{InterviewLlm, SessionStore};

use ai::{LlmClient, LlmInterviewer, Provider};
use config::Config;
use state::{AppState, SessionRegistry};

/// Provider chosen by the configured API keys, if any
pub fn configured_provider(config: &Config) -> Option<Provider> {
    Provider::select(
        config.gemini_api_key.as_deref(),
        &config.gemini_model,
        config.openai_api_key.as_deref(),
        &config.openai_model,
    )
}

/// Interviewer backed by the configured provider. Without a key every call
/// fails with a "not configured" error instead of refusing to start.
pub fn build_interviewer(config: &Config) -> LlmInterviewer {
    LlmInterviewer::new(LlmClient::new(
        configured_provider(config),
        config.llm_max_retries,
    ))
}

/// Build the full application router with all routes and middleware.
///
/// Extracted from `main()` so integration tests can construct the app
/// with a scripted LLM and a temporary log file.
pub fn build_app(
    llm: Arc<dyn InterviewLlm>,
    store: Arc<dyn SessionStore>,
    config: &Config,
) -> Router {
    let state = AppState {
        sessions: SessionRegistry::new(config.session_ttl()),
        llm,
        store,
        settings: config.session_settings(),
        llm_provider: configured_provider(config).map(|p| p.name()),
    };

    let rate_limiter = middleware::create_rate_limiter(config.rate_limit_rps);

    let api_routes = Router::new()
        .merge(routes::session_routes())
        .merge(routes::log_routes())
        .layer(axum_mw::from_fn(middleware::rate_limit_middleware))
        .layer(Extension(rate_limiter));

    // build_recorder() + set_global_recorder() so repeated calls in tests
    // don't panic; the second install is ignored and the handle still works.
    let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
    let prometheus_handle = recorder.handle();
    let _ = metrics::set_global_recorder(recorder);

    let public_routes = Router::new()
        .route("/health", get(routes::health::check))
        .route("/metrics", get(routes::health::metrics))
        .layer(Extension(prometheus_handle));

    let cors = if config.cors_origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .with_state(state)
        .layer(axum_mw::from_fn(middleware::audit_middleware))
        .layer(axum_mw::from_fn(middleware::request_id_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum_mw::from_fn(middleware::metrics_middleware))
}
