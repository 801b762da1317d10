//! Contract between the interview core and the language model.
//!
//! The core never talks HTTP. It hands an [`InterviewLlm`] one of three
//! requests and interprets what comes back; transport, prompt templates and
//! provider selection live behind the trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::IntakeError;
use crate::questionnaire::{AnswerOption, ItemType, Question};

/// Bot text used whenever an LLM call fails or returns an unusable shape
pub const APOLOGY_TEXT: &str = "Sorry, there was an error processing your answer.";

/// Chat-completion role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A message in an LLM conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: Role,
    pub content: String,
}

impl LlmMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Language-model collaborator used by the controllers and the finalizer
#[async_trait]
pub trait InterviewLlm: Send + Sync {
    /// Free-form chat reply to an ongoing conversation
    async fn interpret_free_text(&self, messages: Vec<LlmMessage>) -> Result<String, IntakeError>;

    /// Next structured action of a fully LLM-driven interview
    async fn run_interview_turn(&self, request: &TurnRequest) -> Result<InterviewTurn, IntakeError>;

    /// Convert a finished markdown transcript into a structured response document
    async fn structure_transcript(&self, markdown: &str) -> Result<JsonValue, IntakeError>;
}

/// A question the LLM still has to ask
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingQuestion {
    pub link_id: String,
    pub text: String,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer_options: Option<Vec<AnswerOption>>,
}

impl From<&Question> for PendingQuestion {
    fn from(question: &Question) -> Self {
        Self {
            link_id: question.link_id.clone(),
            text: question.text.clone(),
            item_type: question.item_type,
            answer_options: question.answer_options().map(<[AnswerOption]>::to_vec),
        }
    }
}

/// A question already answered in this session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnsweredQuestion {
    pub link_id: String,
    pub question_text: String,
    pub answer: String,
}

/// Input of one full-interview turn
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRequest {
    pub unanswered: Vec<PendingQuestion>,
    pub answered: Vec<AnsweredQuestion>,
    pub chat_history: String,
}

/// Action tag of a turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnAction {
    Ask,
    Clarify,
    Summarize,
    Complete,
    Error,
    Unknown(String),
}

impl TurnAction {
    fn from_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "ask" => TurnAction::Ask,
            "clarify" => TurnAction::Clarify,
            "summarize" => TurnAction::Summarize,
            "complete" => TurnAction::Complete,
            "error" => TurnAction::Error,
            _ => TurnAction::Unknown(tag.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            TurnAction::Ask => "ask",
            TurnAction::Clarify => "clarify",
            TurnAction::Summarize => "summarize",
            TurnAction::Complete => "complete",
            TurnAction::Error => "error",
            TurnAction::Unknown(tag) => tag,
        }
    }
}

/// Structured reply of one full-interview turn
#[derive(Debug, Clone, PartialEq)]
pub struct InterviewTurn {
    pub action: TurnAction,
    pub text_response: String,
    pub link_id_asked: Option<String>,
    pub link_id_clarify: Option<String>,
    pub requires_answer_options: bool,
}

/// Wire shape of a turn as the model writes it
#[derive(Debug, Deserialize)]
struct RawTurn {
    action: String,
    text_response: String,
    #[serde(default, rename = "linkId_asked")]
    link_id_asked: Option<String>,
    #[serde(default, rename = "linkId_clarify")]
    link_id_clarify: Option<String>,
    #[serde(default)]
    requires_answer_options: Option<bool>,
}

impl InterviewTurn {
    /// Synthetic `error` action standing in for a failed or unusable reply
    pub fn apology() -> Self {
        Self {
            action: TurnAction::Error,
            text_response: APOLOGY_TEXT.to_string(),
            link_id_asked: None,
            link_id_clarify: None,
            requires_answer_options: false,
        }
    }

    /// Parse a model reply, tolerating markdown fences and surrounding prose
    pub fn parse(text: &str) -> Result<Self, IntakeError> {
        let json = extract_json_object(text).ok_or_else(|| {
            IntakeError::MalformedResponse(format!("no JSON object in turn reply: {}", text.trim()))
        })?;
        let raw: RawTurn = serde_json::from_str(json)
            .map_err(|e| IntakeError::MalformedResponse(format!("invalid turn reply: {e}")))?;

        Ok(Self {
            action: TurnAction::from_tag(&raw.action),
            text_response: raw.text_response,
            link_id_asked: raw.link_id_asked.filter(|id| !id.trim().is_empty()),
            link_id_clarify: raw.link_id_clarify.filter(|id| !id.trim().is_empty()),
            requires_answer_options: raw.requires_answer_options.unwrap_or(false),
        })
    }
}

/// Slice from the first `{` to the last `}` of a reply
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}
