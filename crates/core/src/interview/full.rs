use super::{AnswerRecord, Conversation};
use crate::classifier::classify;
use crate::error::IntakeError;
use crate::llm::{InterviewTurn, PendingQuestion, TurnAction, TurnRequest};
use crate::questionnaire::Question;

/// Outcome of applying one LLM turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnEffect {
    /// Waiting for the patient
    Continue,
    /// The LLM closed the interview
    Completed,
    /// The opening turn failed; no further input is accepted
    Halted,
}

/// Interview in which the LLM picks, asks and clarifies every question
#[derive(Debug, Clone)]
pub struct FullInterview {
    questions: Vec<Question>,
    current_asked: Option<String>,
    active: bool,
    history_window: usize,
}

impl FullInterview {
    pub fn new(questions: Vec<Question>, history_window: usize) -> Self {
        Self {
            questions,
            current_asked: None,
            active: true,
            history_window,
        }
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// linkId the LLM most recently asked about
    pub fn current_asked(&self) -> Option<&str> {
        self.current_asked.as_deref()
    }

    pub fn question(&self, link_id: &str) -> Option<&Question> {
        self.questions.iter().find(|q| q.link_id == link_id)
    }

    /// Request for the turn that opens the interview
    pub fn opening_request(&self, conv: &Conversation) -> TurnRequest {
        self.request(conv)
    }

    /// Record the utterance against the question last asked, then build the
    /// request for the next turn.
    ///
    /// The record is optimistic: a later answer to the same linkId replaces
    /// it.
    pub fn prepare_turn(&mut self, conv: &mut Conversation, utterance: &str) -> Result<TurnRequest, IntakeError> {
        if !self.active {
            return Err(IntakeError::InterviewInactive);
        }
        let utterance = utterance.trim();
        if utterance.is_empty() {
            return Err(IntakeError::InvalidInput("message text is empty".into()));
        }

        match self.current_asked.as_deref() {
            Some(link_id) => match self.question(link_id) {
                Some(question) => conv.answers.record(optimistic_record(question, utterance)),
                None => tracing::debug!(link_id = %link_id, "Asked linkId is not in the questionnaire"),
            },
            None => tracing::debug!("No question asked yet, answer not recorded"),
        }

        conv.transcript.push_user(utterance);
        Ok(self.request(conv))
    }

    /// Apply the LLM's turn to the conversation
    pub fn apply_turn(&mut self, conv: &mut Conversation, turn: InterviewTurn, opening: bool) -> TurnEffect {
        if !turn.text_response.trim().is_empty() {
            conv.transcript.push_bot(turn.text_response);
        }

        match turn.action {
            TurnAction::Ask => {
                self.current_asked = turn.link_id_asked;
                TurnEffect::Continue
            }
            TurnAction::Clarify => {
                if let Some(link_id) = turn.link_id_clarify {
                    self.current_asked = Some(link_id);
                }
                TurnEffect::Continue
            }
            TurnAction::Summarize => TurnEffect::Continue,
            TurnAction::Complete => {
                self.stop();
                TurnEffect::Completed
            }
            TurnAction::Error if opening => {
                tracing::warn!("Opening interview turn failed, halting interview");
                self.active = false;
                TurnEffect::Halted
            }
            TurnAction::Error => {
                tracing::warn!(
                    current_asked = ?self.current_asked,
                    "Interview turn reported an error, interview stays open"
                );
                TurnEffect::Continue
            }
            TurnAction::Unknown(tag) => {
                tracing::warn!(action = %tag, "Unknown interview action");
                TurnEffect::Continue
            }
        }
    }

    pub fn stop(&mut self) {
        self.active = false;
        self.current_asked = None;
    }

    fn request(&self, conv: &Conversation) -> TurnRequest {
        TurnRequest {
            unanswered: self
                .questions
                .iter()
                .filter(|q| !conv.answers.contains(&q.link_id))
                .map(PendingQuestion::from)
                .collect(),
            answered: conv.answers.answered(),
            chat_history: conv.transcript.history_window(self.history_window),
        }
    }
}

/// Keep the patient's words; score closed-choice answers the way the step
/// controller would
fn optimistic_record(question: &Question, utterance: &str) -> AnswerRecord {
    let classified = classify(question, utterance);
    let (code, score) = AnswerRecord::from_utterance(question, &classified, utterance)
        .map(|record| (record.code, record.score))
        .unwrap_or((None, 0.0));
    AnswerRecord {
        link_id: question.link_id.clone(),
        question_text: question.text.clone(),
        answer_text: utterance.to_string(),
        code,
        score,
    }
}
