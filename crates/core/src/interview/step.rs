use serde::Serialize;

use super::{AnswerRecord, Conversation};
use crate::classifier::{Utterance, classify};
use crate::error::IntakeError;
use crate::llm::{APOLOGY_TEXT, LlmMessage};
use crate::questionnaire::Question;
use crate::transcript::Transcript;

pub const WELCOME_TEXT: &str = "Welcome! I'll help you complete your intake. Let's get started.";
pub const CHOOSE_OPTION_TEXT: &str = "Please choose one of these options:";
pub const NO_QUESTIONS_TEXT: &str = "This questionnaire has no questions to answer.";

const SKIP_LABEL: &str = "Skip";
const SKIPPED_ANSWER: &str = "skipped";

/// Where the step controller is within the current question
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPhase {
    AwaitingFreeText,
    AwaitingScore,
    Completed,
}

/// What the session has to do after a step operation
#[derive(Debug, Clone, PartialEq)]
pub enum StepProgress {
    /// The next question is on screen
    Asked,
    /// An answer was stored; advance after the turn-taking delay
    Recorded,
    /// The options were offered again
    Reprompted,
    /// Free text needs an LLM reply before the user can continue
    Interpret(Vec<LlmMessage>),
    /// No questions remain
    Finished,
}

/// Positional walk over the scored questions
#[derive(Debug, Clone)]
pub struct StepInterview {
    questions: Vec<Question>,
    position: usize,
    phase: StepPhase,
}

impl StepInterview {
    pub fn new(questions: Vec<Question>) -> Self {
        Self {
            questions,
            position: 0,
            phase: StepPhase::AwaitingFreeText,
        }
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn phase(&self) -> StepPhase {
        self.phase
    }

    /// Question currently being asked
    pub fn current(&self) -> Option<&Question> {
        if self.phase == StepPhase::Completed {
            return None;
        }
        self.questions.get(self.position)
    }

    /// Greet and ask the first question
    pub fn start(&mut self, conv: &mut Conversation) -> StepProgress {
        conv.transcript.push_bot(WELCOME_TEXT);
        if self.questions.is_empty() {
            conv.transcript.push_bot(NO_QUESTIONS_TEXT);
            self.phase = StepPhase::Completed;
            return StepProgress::Finished;
        }
        self.ask_current(conv);
        StepProgress::Asked
    }

    /// Handle a typed utterance.
    ///
    /// Closed-choice questions are classified locally: a resolved utterance
    /// is recorded, anything else re-offers the options. Other questions are
    /// handed to the LLM and never advance on their own.
    pub fn submit(&mut self, conv: &mut Conversation, utterance: &str) -> Result<StepProgress, IntakeError> {
        if self.phase == StepPhase::Completed {
            return Err(IntakeError::SessionCompleted);
        }
        let utterance = utterance.trim();
        if utterance.is_empty() {
            return Err(IntakeError::InvalidInput("message text is empty".into()));
        }
        let Some(question) = self.questions.get(self.position) else {
            return Err(IntakeError::SessionCompleted);
        };

        if !question.is_closed_choice() {
            conv.transcript.push_user(utterance);
            return Ok(StepProgress::Interpret(interpretation_messages(
                question,
                &conv.transcript,
            )));
        }

        let classified = classify(question, utterance);
        conv.transcript.push_user(echo_text(question, &classified, utterance));
        match AnswerRecord::from_utterance(question, &classified, utterance) {
            Some(record) => {
                tracing::debug!(link_id = %record.link_id, score = record.score, "Answer recorded");
                conv.answers.record(record);
                Ok(StepProgress::Recorded)
            }
            None => {
                conv.transcript.push_bot(reprompt_text(question));
                self.phase = StepPhase::AwaitingScore;
                Ok(StepProgress::Reprompted)
            }
        }
    }

    /// Handle an explicit option choice; `None` skips the question with score 0
    pub fn select(&mut self, conv: &mut Conversation, code: Option<&str>) -> Result<StepProgress, IntakeError> {
        if self.phase == StepPhase::Completed {
            return Err(IntakeError::SessionCompleted);
        }
        if self.phase != StepPhase::AwaitingScore {
            return Err(IntakeError::InvalidInput(
                "no answer options are being offered".into(),
            ));
        }
        let Some(question) = self.questions.get(self.position) else {
            return Err(IntakeError::SessionCompleted);
        };

        let record = match code {
            None => {
                conv.transcript.push_user(SKIP_LABEL);
                AnswerRecord {
                    link_id: question.link_id.clone(),
                    question_text: question.text.clone(),
                    answer_text: SKIPPED_ANSWER.to_string(),
                    code: None,
                    score: 0.0,
                }
            }
            Some(code) => {
                let option = question.find_option(code).ok_or_else(|| {
                    IntakeError::InvalidInput(format!("unknown answer option '{code}'"))
                })?;
                conv.transcript.push_user(option.display.clone());
                AnswerRecord {
                    link_id: question.link_id.clone(),
                    question_text: question.text.clone(),
                    answer_text: option.display.clone(),
                    code: Some(option.code.clone()),
                    score: question.answer_score(code),
                }
            }
        };

        tracing::debug!(link_id = %record.link_id, score = record.score, "Option selected");
        conv.answers.record(record);
        Ok(StepProgress::Recorded)
    }

    /// Move past the current question
    pub fn advance(&mut self, conv: &mut Conversation) -> StepProgress {
        if self.phase == StepPhase::Completed {
            return StepProgress::Finished;
        }
        self.position += 1;
        if self.position < self.questions.len() {
            self.ask_current(conv);
            StepProgress::Asked
        } else {
            self.phase = StepPhase::Completed;
            StepProgress::Finished
        }
    }

    /// Append the LLM's free-text reply, or an apology if it failed
    pub fn apply_interpretation(&mut self, conv: &mut Conversation, reply: Result<String, IntakeError>) {
        let text = match reply {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                tracing::warn!("LLM returned an empty free-text reply");
                APOLOGY_TEXT.to_string()
            }
            Err(e) => {
                tracing::warn!(error = %e, "Free-text interpretation failed");
                APOLOGY_TEXT.to_string()
            }
        };
        conv.transcript.push_bot(text);
        if self.phase != StepPhase::Completed {
            self.phase = StepPhase::AwaitingFreeText;
        }
    }

    pub fn finish(&mut self) {
        self.phase = StepPhase::Completed;
    }

    fn ask_current(&mut self, conv: &mut Conversation) {
        let question = &self.questions[self.position];
        conv.transcript.push_bot(question.prompt());
        self.phase = if question.is_closed_choice() {
            StepPhase::AwaitingScore
        } else {
            StepPhase::AwaitingFreeText
        };
    }
}

/// User line for a typed answer: a matched option or score shows its label
fn echo_text(question: &Question, classified: &Utterance, utterance: &str) -> String {
    let code = match classified {
        Utterance::OptionMatch(code) => code.to_string(),
        Utterance::NumericScore(n) => n.to_string(),
        Utterance::Denial | Utterance::Unresolved => return utterance.to_string(),
    };
    question
        .find_option(&code)
        .map_or(code, |opt| opt.display.clone())
}

fn reprompt_text(question: &Question) -> String {
    let options = question
        .answer_options()
        .unwrap_or_default()
        .iter()
        .map(|opt| opt.display.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    format!("{CHOOSE_OPTION_TEXT} {options}")
}

/// System prompt describing the current question, then the whole chat
fn interpretation_messages(question: &Question, transcript: &Transcript) -> Vec<LlmMessage> {
    let mut context = format!("Current question: {}", question.text);
    if let Some(section) = &question.section {
        context.push_str(&format!("\nSection: {section}"));
    }
    context.push_str(&format!("\nType: {}", question.item_type.as_str()));
    if let Some(hint) = question.validation_hint() {
        context.push_str(&format!(" {hint}"));
    }

    let system = format!(
        "You are a friendly medical intake interviewer.\n\n{context}\n\n\
         Instructions:\n\
         - If the answer is ambiguous, ask a short clarifying question.\n\
         - If the patient wants to skip, acknowledge it politely.\n\
         - If the answer needs a specific format, check it and ask again when it does not fit.\n\
         - Keep replies concise and professional."
    );

    let mut messages = vec![LlmMessage::system(system)];
    messages.extend(transcript.to_llm_messages());
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Role;
    use crate::questionnaire::{QuestionView, Questionnaire};
    use crate::transcript::Sender;
    use serde_json::json;

    fn questions() -> Vec<Question> {
        Questionnaire::from_json(json!({
            "resourceType": "Questionnaire",
            "item": [
                {"linkId": "q1", "type": "choice", "text": "Experiencing headaches",
                 "answerOption": [{"valueCoding": {"code": "A", "display": "Often"}},
                                  {"valueCoding": {"code": "B", "display": "Rarely"}}]},
                {"linkId": "q2", "type": "choice", "text": "Nausea",
                 "answerOption": [{"valueInteger": 1}, {"valueInteger": 2}]}
            ]
        }))
        .unwrap()
        .questions(QuestionView::Scored)
    }

    fn started() -> (StepInterview, Conversation) {
        let mut step = StepInterview::new(questions());
        let mut conv = Conversation::default();
        assert_eq!(step.start(&mut conv), StepProgress::Asked);
        (step, conv)
    }

    #[test]
    fn start_greets_then_asks() {
        let (step, conv) = started();
        let msgs = conv.transcript.messages();
        assert_eq!(msgs[0].text, WELCOME_TEXT);
        assert_eq!(msgs[1].text, "Have you been experiencing headaches?");
        assert_eq!(step.phase(), StepPhase::AwaitingScore);
    }

    #[test]
    fn unresolved_choice_reprompts_with_options() {
        let (mut step, mut conv) = started();
        let progress = step.submit(&mut conv, "sort of").unwrap();
        assert_eq!(progress, StepProgress::Reprompted);
        assert_eq!(
            conv.transcript.last().unwrap().text,
            "Please choose one of these options: Often, Rarely"
        );
        assert!(conv.answers.is_empty());
        assert_eq!(step.position(), 0);
    }

    #[test]
    fn typed_code_is_recorded_once() {
        let (mut step, mut conv) = started();
        let before = conv.transcript.len();
        assert_eq!(step.submit(&mut conv, "b").unwrap(), StepProgress::Recorded);
        assert_eq!(conv.transcript.len(), before + 1);
        let echoed = conv.transcript.last().unwrap();
        assert_eq!(echoed.sender, Sender::User);
        assert_eq!(echoed.text, "Rarely");
        assert_eq!(conv.answers.get("q1").unwrap().answer_text, "Rarely");
        assert!(conv.transcript.to_markdown().ends_with("**Patient:** Rarely"));
    }

    #[test]
    fn typed_score_shows_matching_label_and_denial_stays_verbatim() {
        let (mut step, mut conv) = started();
        step.submit(&mut conv, "Never!").unwrap();
        assert_eq!(conv.transcript.last().unwrap().text, "Never!");

        step.advance(&mut conv);
        step.submit(&mut conv, "2").unwrap();
        assert_eq!(conv.transcript.last().unwrap().text, "2");
        assert_eq!(conv.answers.get("q2").unwrap().score, 2.0);
    }

    #[test]
    fn typed_score_without_matching_code_shows_the_digit() {
        let (mut step, mut conv) = started();
        step.submit(&mut conv, "3").unwrap();
        assert_eq!(conv.transcript.last().unwrap().text, "3");
    }

    #[test]
    fn skip_scores_zero_and_advances() {
        let (mut step, mut conv) = started();
        step.select(&mut conv, None).unwrap();
        assert_eq!(conv.transcript.last().unwrap().text, "Skip");
        assert_eq!(conv.answers.get("q1").unwrap().score, 0.0);

        assert_eq!(step.advance(&mut conv), StepProgress::Asked);
        assert_eq!(step.current().unwrap().link_id, "q2");
        step.select(&mut conv, Some("2")).unwrap();
        assert_eq!(conv.answers.grand_total(), 2.0);
        assert_eq!(step.advance(&mut conv), StepProgress::Finished);
        assert!(step.current().is_none());
    }

    #[test]
    fn unknown_code_is_rejected() {
        let (mut step, mut conv) = started();
        let err = step.select(&mut conv, Some("Z")).unwrap_err();
        assert!(matches!(err, IntakeError::InvalidInput(_)));
        assert!(conv.answers.is_empty());
    }

    #[test]
    fn empty_question_list_finishes_immediately() {
        let mut step = StepInterview::new(Vec::new());
        let mut conv = Conversation::default();
        assert_eq!(step.start(&mut conv), StepProgress::Finished);
        assert_eq!(step.phase(), StepPhase::Completed);
        assert_eq!(conv.transcript.last().unwrap().text, NO_QUESTIONS_TEXT);
    }

    #[test]
    fn free_text_goes_to_the_llm() {
        let free = Questionnaire::from_json(json!({
            "resourceType": "Questionnaire",
            "item": [{"linkId": "g", "type": "group", "text": "Contact",
                      "item": [{"linkId": "e", "type": "email", "text": "Email address"}]}]
        }))
        .unwrap()
        .questions(QuestionView::Answerable);

        let mut step = StepInterview::new(free);
        let mut conv = Conversation::default();
        step.start(&mut conv);
        assert_eq!(step.phase(), StepPhase::AwaitingFreeText);

        let StepProgress::Interpret(messages) = step.submit(&mut conv, "ada at home").unwrap() else {
            panic!("expected an interpretation request");
        };
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.contains("Section: Contact"));
        assert!(messages[0].content.contains("Type: email"));
        assert_eq!(messages.last().unwrap().content, "ada at home");

        step.apply_interpretation(&mut conv, Err(IntakeError::Llm("down".into())));
        assert_eq!(conv.transcript.last().unwrap().text, APOLOGY_TEXT);
        assert_eq!(step.position(), 0);
        assert!(conv.answers.is_empty());
    }
}
