//! Rule-based classification of a raw utterance against a choice question

use crate::questionnaire::{AnswerCode, Question};

/// Phrases read as "the symptom is absent", compared after normalization
const DENIAL_PHRASES: &[&str] = &[
    "no",
    "nope",
    "not today",
    "not really",
    "none",
    "never",
    "not at all",
    "nah",
    "negative",
    "zero",
    "none at all",
];

/// Highest score accepted as a bare digit
const MAX_DIGIT_SCORE: u8 = 4;

/// How an utterance resolves against the active question
#[derive(Debug, Clone, PartialEq)]
pub enum Utterance {
    /// A negation phrase; scores 0
    Denial,
    /// A bare digit between 0 and 4
    NumericScore(u8),
    /// Equal to an option's code or display, ignoring case and spacing
    OptionMatch(AnswerCode),
    /// Needs a re-prompt (choice) or LLM interpretation (free text)
    Unresolved,
}

impl Utterance {
    /// Whether the utterance answers the question outright
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Utterance::Unresolved)
    }
}

/// Classify an utterance.
///
/// Only closed-choice questions are classified; every utterance to any
/// other question is `Unresolved`. Precedence is denial, then digit, then
/// option match.
pub fn classify(question: &Question, raw: &str) -> Utterance {
    if !question.is_closed_choice() {
        return Utterance::Unresolved;
    }

    if is_denial(raw) {
        return Utterance::Denial;
    }

    if let Some(score) = digit_score(raw) {
        return Utterance::NumericScore(score);
    }

    match match_option(question, raw) {
        Some(code) => Utterance::OptionMatch(code),
        None => Utterance::Unresolved,
    }
}

/// Lowercase, keep only letters and spaces, collapse runs of whitespace
fn letters_only(raw: &str) -> String {
    let kept: String = raw
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_whitespace())
        .collect();
    collapse_whitespace(&kept)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn is_denial(raw: &str) -> bool {
    let normalized = letters_only(raw);
    DENIAL_PHRASES.contains(&normalized.as_str())
}

fn digit_score(raw: &str) -> Option<u8> {
    let trimmed = raw.trim();
    let mut chars = trimmed.chars();
    let digit = chars.next()?.to_digit(10)?;
    if chars.next().is_some() {
        return None;
    }
    u8::try_from(digit).ok().filter(|d| *d <= MAX_DIGIT_SCORE)
}

/// Find the option whose code or display equals the utterance
pub fn match_option(question: &Question, raw: &str) -> Option<AnswerCode> {
    let wanted = collapse_whitespace(&raw.to_lowercase());
    if wanted.is_empty() {
        return None;
    }
    question
        .answer_options()?
        .iter()
        .find(|opt| {
            collapse_whitespace(&opt.code.to_string().to_lowercase()) == wanted
                || collapse_whitespace(&opt.display.to_lowercase()) == wanted
        })
        .map(|opt| opt.code.clone())
}
