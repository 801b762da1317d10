//! intake-server: conversational questionnaire intake HTTP server.

use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use intake_server::config::Config;
use intake_server::store::FileLogStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = Config::from_env();

    match intake_server::configured_provider(&config) {
        Some(provider) => tracing::info!(provider = provider.name(), "LLM provider configured"),
        None => tracing::warn!(
            "No LLM API key set (GEMINI_API_KEY or OPENAI_API_KEY), interview turns will fail"
        ),
    }
    tracing::info!("Rate limiting: {} requests/second", config.rate_limit_rps);

    let store = FileLogStore::new(config.log_file());
    tracing::info!(path = %store.path().display(), "Session logs stored on disk");

    let llm = intake_server::build_interviewer(&config);
    let app = intake_server::build_app(Arc::new(llm), Arc::new(store), &config);

    let addr: SocketAddr = config.bind_address.parse()?;
    tracing::info!("Starting intake server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
