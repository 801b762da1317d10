//! `InterviewLlm` implementation backed by the chat-completion client

use async_trait::async_trait;
use intake_core::llm::extract_json_object;
use intake_core::{IntakeError, InterviewLlm, InterviewTurn, LlmMessage, TurnRequest};
use serde_json::Value as JsonValue;

use super::client::LlmClient;

/// Temperature for conversational calls
const INTERVIEW_TEMPERATURE: f32 = 0.7;
/// Temperature for transcript structuring
const STRUCTURING_TEMPERATURE: f32 = 0.2;

const INTERVIEW_PROMPT: &str = r#"You are a friendly medical intake interviewer. Conduct a conversational interview that collects answers to the questionnaire below, one question at a time, in a natural order.

Questions still to ask (JSON):
{unanswered}

Questions already answered (JSON):
{answered}

Recent conversation:
{chat_history}

Decide the next step and reply with ONLY a JSON object of this shape:
{
  "action": "ask" | "clarify" | "summarize" | "complete" | "error",
  "text_response": "what you say to the patient",
  "linkId_asked": "linkId of the question you are asking (for ask)",
  "linkId_clarify": "linkId of the question you are clarifying (for clarify)",
  "requires_answer_options": true | false
}

Rules:
- Ask exactly one question per turn and set linkId_asked to its linkId.
- If the last answer is unclear, use "clarify" with linkId_clarify.
- When no questions remain, use "complete" and thank the patient.
- Keep text_response short and professional."#;

const STRUCTURE_PROMPT: &str = r#"Convert the following medical intake chat transcript into a FHIR R4 QuestionnaireResponse resource.

Use "resourceType": "QuestionnaireResponse" and "status": "completed". Add one item per answered question with its linkId, text and an answer array. Use valueCoding for chosen options, valueInteger for numeric scores and valueString for free text.

Return ONLY the JSON object, no other text.

Transcript:
{transcript}"#;

/// Interview LLM over OpenAI or Gemini
#[derive(Clone)]
pub struct LlmInterviewer {
    client: LlmClient,
}

impl LlmInterviewer {
    pub fn new(client: LlmClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &LlmClient {
        &self.client
    }
}

fn to_pretty_json<T: serde::Serialize>(value: &T) -> Result<String, IntakeError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| IntakeError::Llm(format!("failed to encode prompt data: {e}")))
}

fn interview_prompt(request: &TurnRequest) -> Result<String, IntakeError> {
    Ok(INTERVIEW_PROMPT
        .replace("{unanswered}", &to_pretty_json(&request.unanswered)?)
        .replace("{answered}", &to_pretty_json(&request.answered)?)
        .replace("{chat_history}", &request.chat_history))
}

/// Parse the structured document out of a reply that may carry prose or fences
fn parse_structured(reply: &str) -> Result<JsonValue, IntakeError> {
    let json = extract_json_object(reply).ok_or_else(|| {
        IntakeError::MalformedResponse(format!("no JSON found in structuring reply: {reply}"))
    })?;
    serde_json::from_str(json).map_err(|e| {
        IntakeError::MalformedResponse(format!("failed to parse structured response: {e}"))
    })
}

#[async_trait]
impl InterviewLlm for LlmInterviewer {
    async fn interpret_free_text(&self, messages: Vec<LlmMessage>) -> Result<String, IntakeError> {
        Ok(self.client.complete(&messages, INTERVIEW_TEMPERATURE).await?)
    }

    async fn run_interview_turn(&self, request: &TurnRequest) -> Result<InterviewTurn, IntakeError> {
        let prompt = interview_prompt(request)?;
        let reply = self
            .client
            .complete(&[LlmMessage::user(prompt)], INTERVIEW_TEMPERATURE)
            .await?;
        InterviewTurn::parse(&reply)
    }

    async fn structure_transcript(&self, markdown: &str) -> Result<JsonValue, IntakeError> {
        let prompt = STRUCTURE_PROMPT.replace("{transcript}", markdown);
        let reply = self
            .client
            .complete(&[LlmMessage::user(prompt)], STRUCTURING_TEMPERATURE)
            .await?;
        parse_structured(&reply)
    }
}
