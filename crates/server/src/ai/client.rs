//! Chat-completion client for the OpenAI and Gemini APIs

use intake_core::{IntakeError, LlmMessage, Role};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";
const GEMINI_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Initial backoff delay for retries
const INITIAL_BACKOFF_MS: u64 = 500;
/// Maximum backoff delay
const MAX_BACKOFF_MS: u64 = 5000;

/// LLM transport errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("No LLM API key set. Please set GEMINI_API_KEY or OPENAI_API_KEY.")]
    NotConfigured,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{provider} API error ({status}): {message}")]
    Api {
        provider: &'static str,
        status: reqwest::StatusCode,
        message: String,
    },

    #[error("No text in {0} response")]
    EmptyResponse(&'static str),
}

impl ClientError {
    /// Connection problems, timeouts, 5xx and 429 are worth another attempt
    fn is_retryable(&self) -> bool {
        match self {
            ClientError::Http(e) => e.is_connect() || e.is_timeout(),
            ClientError::Api { status, .. } => {
                status.is_server_error() || *status == reqwest::StatusCode::TOO_MANY_REQUESTS
            }
            ClientError::NotConfigured | ClientError::EmptyResponse(_) => false,
        }
    }
}

impl From<ClientError> for IntakeError {
    fn from(err: ClientError) -> Self {
        IntakeError::Llm(err.to_string())
    }
}

/// Which API answers chat requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provider {
    Gemini { api_key: String, model: String },
    OpenAi { api_key: String, model: String },
}

impl Provider {
    pub fn name(&self) -> &'static str {
        match self {
            Provider::Gemini { .. } => "Gemini",
            Provider::OpenAi { .. } => "OpenAI",
        }
    }

    /// Gemini wins when both keys are present
    pub fn select(
        gemini_key: Option<&str>,
        gemini_model: &str,
        openai_key: Option<&str>,
        openai_model: &str,
    ) -> Option<Self> {
        if let Some(key) = gemini_key {
            return Some(Provider::Gemini {
                api_key: key.to_string(),
                model: gemini_model.to_string(),
            });
        }
        openai_key.map(|key| Provider::OpenAi {
            api_key: key.to_string(),
            model: openai_model.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: &'a [LlmMessage],
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

/// `{"error": {"message": ...}}`, used by both providers
#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Map chat messages onto Gemini contents.
///
/// Gemini has no system role: a leading system message is moved to a user
/// message placed right before the first user message, or dropped when the
/// conversation has no user message yet.
fn gemini_contents(messages: &[LlmMessage]) -> Vec<GeminiContent> {
    let mut ordered: Vec<(Role, &str)> = Vec::with_capacity(messages.len());
    match messages.split_first() {
        Some((first, rest)) if first.role == Role::System => {
            let first_user = rest.iter().position(|m| m.role == Role::User);
            for (i, m) in rest.iter().enumerate() {
                if Some(i) == first_user {
                    ordered.push((Role::User, first.content.as_str()));
                }
                ordered.push((m.role, m.content.as_str()));
            }
        }
        _ => ordered.extend(messages.iter().map(|m| (m.role, m.content.as_str()))),
    }

    ordered
        .into_iter()
        .map(|(role, text)| GeminiContent {
            role: match role {
                Role::Assistant => "model",
                Role::User | Role::System => "user",
            }
            .to_string(),
            parts: vec![GeminiPart {
                text: Some(text.to_string()),
            }],
        })
        .collect()
}

/// Calculate backoff delay with exponential increase and jitter
fn calculate_backoff(attempt: u32) -> Duration {
    let base_delay = INITIAL_BACKOFF_MS.saturating_mul(2u64.saturating_pow(attempt));
    let capped_delay = base_delay.min(MAX_BACKOFF_MS);
    let jitter = u64::from(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_millis(),
    ) % 100;
    Duration::from_millis(capped_delay + jitter)
}

/// Client for whichever provider is configured
#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    provider: Option<Provider>,
    max_retries: u32,
}

impl LlmClient {
    /// Create a client; `None` yields a client whose every call fails
    pub fn new(provider: Option<Provider>, max_retries: u32) -> Self {
        Self {
            http: reqwest::Client::new(),
            provider,
            max_retries,
        }
    }

    pub fn provider(&self) -> Option<&Provider> {
        self.provider.as_ref()
    }

    /// Send a conversation and return the reply text, retrying transient
    /// failures with exponential backoff
    pub async fn complete(&self, messages: &[LlmMessage], temperature: f32) -> Result<String, ClientError> {
        let provider = self.provider.as_ref().ok_or(ClientError::NotConfigured)?;

        let mut attempt = 0;
        loop {
            match self.send(provider, messages, temperature).await {
                Ok(text) => return Ok(text),
                Err(e) if attempt < self.max_retries && e.is_retryable() => {
                    let backoff = calculate_backoff(attempt);
                    tracing::warn!(
                        provider = provider.name(),
                        attempt = attempt + 1,
                        error = %e,
                        "LLM request failed, retrying in {:?}",
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send(&self, provider: &Provider, messages: &[LlmMessage], temperature: f32) -> Result<String, ClientError> {
        let request = match provider {
            Provider::OpenAi { api_key, model } => self
                .http
                .post(OPENAI_URL)
                .bearer_auth(api_key)
                .json(&OpenAiRequest {
                    model,
                    messages,
                    temperature,
                }),
            Provider::Gemini { api_key, model } => self
                .http
                .post(format!("{GEMINI_URL}/{model}:generateContent"))
                .query(&[("key", api_key)])
                .json(&GeminiRequest {
                    contents: gemini_contents(messages),
                    generation_config: GenerationConfig { temperature },
                }),
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(ClientError::Api {
                provider: provider.name(),
                status,
                message,
            });
        }

        let text = match provider {
            Provider::OpenAi { .. } => response
                .json::<OpenAiResponse>()
                .await?
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content),
            Provider::Gemini { .. } => response
                .json::<GeminiResponse>()
                .await?
                .candidates
                .into_iter()
                .next()
                .and_then(|c| c.content)
                .and_then(|c| c.parts.into_iter().next())
                .and_then(|p| p.text),
        };

        text.map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or(ClientError::EmptyResponse(provider.name()))
    }
}
