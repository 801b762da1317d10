//! Interview controllers and the session that drives them.
//!
//! Two controllers share one [`Conversation`]: the step controller walks the
//! scored questions in order and only asks the LLM about free text, while the
//! full controller lets the LLM pick every next question. An
//! [`InterviewSession`] owns one controller, serializes turns, and hands the
//! finished transcript to the [`SessionFinalizer`] exactly once.

mod finalizer;
mod full;
mod session;
mod step;

pub use finalizer::{FinalizationStatus, FinalizeJob, SessionFinalizer};
pub use full::{FullInterview, TurnEffect};
pub use session::{CurrentQuestion, InterviewSession, SessionSettings, SessionView};
pub use step::{
    CHOOSE_OPTION_TEXT, NO_QUESTIONS_TEXT, StepInterview, StepPhase, StepProgress, WELCOME_TEXT,
};

use serde::{Deserialize, Serialize};

use crate::classifier::Utterance;
use crate::llm::AnsweredQuestion;
use crate::questionnaire::{AnswerCode, Question};
use crate::transcript::Transcript;

/// Which controller runs a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterviewMode {
    /// Rule-driven walk over the scored questions
    #[default]
    #[serde(rename = "step")]
    Step,
    /// The LLM chooses, asks and clarifies every question
    #[serde(rename = "llm-full")]
    LlmFull,
}

impl InterviewMode {
    pub fn as_str(self) -> &'static str {
        match self {
            InterviewMode::Step => "step",
            InterviewMode::LlmFull => "llm-full",
        }
    }
}

/// Lifecycle of a session as a whole
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Collecting,
    Completed,
}

/// A recorded answer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRecord {
    pub link_id: String,
    pub question_text: String,
    pub answer_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<AnswerCode>,
    pub score: f64,
}

impl AnswerRecord {
    /// Record for a classified utterance, `None` when it did not resolve.
    ///
    /// Denials keep the patient's words and score 0, digits score
    /// themselves, option matches use the option display and weight.
    pub fn from_utterance(question: &Question, utterance: &Utterance, raw: &str) -> Option<Self> {
        let (answer_text, code, score) = match utterance {
            Utterance::Denial => (raw.trim().to_string(), None, 0.0),
            Utterance::NumericScore(n) => (n.to_string(), None, f64::from(*n)),
            Utterance::OptionMatch(code) => {
                let key = code.to_string();
                let display = question
                    .find_option(&key)
                    .map(|opt| opt.display.clone())
                    .unwrap_or_else(|| key.clone());
                (display, Some(code.clone()), question.answer_score(&key))
            }
            Utterance::Unresolved => return None,
        };
        Some(Self {
            link_id: question.link_id.clone(),
            question_text: question.text.clone(),
            answer_text,
            code,
            score,
        })
    }
}

/// Answers keyed by linkId, in first-answered order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnswerBook {
    records: Vec<AnswerRecord>,
}

impl AnswerBook {
    /// Store an answer, replacing any earlier one for the same linkId
    pub fn record(&mut self, record: AnswerRecord) {
        match self.records.iter_mut().find(|r| r.link_id == record.link_id) {
            Some(existing) => *existing = record,
            None => self.records.push(record),
        }
    }

    pub fn get(&self, link_id: &str) -> Option<&AnswerRecord> {
        self.records.iter().find(|r| r.link_id == link_id)
    }

    pub fn contains(&self, link_id: &str) -> bool {
        self.get(link_id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AnswerRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Sum of all recorded scores
    pub fn grand_total(&self) -> f64 {
        self.records.iter().map(|r| r.score).sum()
    }

    /// Answered questions as the LLM sees them
    pub fn answered(&self) -> Vec<AnsweredQuestion> {
        self.records
            .iter()
            .map(|r| AnsweredQuestion {
                link_id: r.link_id.clone(),
                question_text: r.question_text.clone(),
                answer: r.answer_text.clone(),
            })
            .collect()
    }

    pub fn to_vec(&self) -> Vec<AnswerRecord> {
        self.records.clone()
    }
}

/// State shared by both controllers
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    pub transcript: Transcript,
    pub answers: AnswerBook,
}
