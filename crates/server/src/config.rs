//! Server configuration

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use intake_core::SessionSettings;

const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-pro-preview-05-06";
const DEFAULT_OPENAI_MODEL: &str = "gpt-3.5-turbo";

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub log_dir: PathBuf,
    pub cors_origins: Vec<String>,
    pub rate_limit_rps: u32,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub llm_max_retries: u32,
    pub advance_delay_ms: u64,
    pub chat_history_window: usize,
    /// Idle time after which a session is dropped from memory
    pub session_ttl_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".into(),
            log_dir: PathBuf::from("./data"),
            cors_origins: vec!["*".into()],
            rate_limit_rps: 50,
            gemini_api_key: None,
            gemini_model: DEFAULT_GEMINI_MODEL.into(),
            openai_api_key: None,
            openai_model: DEFAULT_OPENAI_MODEL.into(),
            llm_max_retries: 2,
            advance_delay_ms: 200,
            chat_history_window: 10,
            session_ttl_secs: 3600,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_address: std::env::var("BIND_ADDRESS").unwrap_or(defaults.bind_address),
            log_dir: std::env::var("LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.log_dir),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.cors_origins),
            rate_limit_rps: parsed("RATE_LIMIT_RPS", defaults.rate_limit_rps),
            gemini_api_key: secret("GEMINI_API_KEY"),
            gemini_model: std::env::var("GEMINI_MODEL").unwrap_or(defaults.gemini_model),
            openai_api_key: secret("OPENAI_API_KEY"),
            openai_model: std::env::var("OPENAI_MODEL").unwrap_or(defaults.openai_model),
            llm_max_retries: parsed("LLM_MAX_RETRIES", defaults.llm_max_retries),
            advance_delay_ms: parsed("ADVANCE_DELAY_MS", defaults.advance_delay_ms),
            chat_history_window: parsed("CHAT_HISTORY_WINDOW", defaults.chat_history_window),
            session_ttl_secs: parsed("SESSION_TTL_SECS", defaults.session_ttl_secs),
        }
    }

    /// Path of the session log document
    pub fn log_file(&self) -> PathBuf {
        self.log_dir.join("chat_logs.json")
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            advance_delay: Duration::from_millis(self.advance_delay_ms),
            history_window: self.chat_history_window,
        }
    }
}

fn secret(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T: FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(variable = name, value = %raw, "Invalid value, using default");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.bind_address, "0.0.0.0:8080");
        assert_eq!(config.rate_limit_rps, 50);
        assert_eq!(config.log_file(), PathBuf::from("./data/chat_logs.json"));

        let settings = config.session_settings();
        assert_eq!(settings.advance_delay, Duration::from_millis(200));
        assert_eq!(settings.history_window, 10);
        assert_eq!(config.session_ttl(), Duration::from_secs(3600));
    }
}
