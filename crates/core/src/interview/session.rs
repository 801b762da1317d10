use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::{
    AnswerRecord, Conversation, FinalizationStatus, FinalizeJob, FullInterview, InterviewMode,
    SessionFinalizer, SessionPhase, StepInterview, StepPhase, StepProgress, TurnEffect,
};
use crate::error::IntakeError;
use crate::llm::{InterviewLlm, InterviewTurn, LlmMessage, TurnRequest};
use crate::questionnaire::{AnswerOption, Question, QuestionView, Questionnaire};
use crate::store::{LogKey, SessionStore};
use crate::transcript::Transcript;

/// Tunables of a session
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Pause between recording an answer and asking the next question
    pub advance_delay: Duration,
    /// Trailing messages sent to the LLM as chat history
    pub history_window: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            advance_delay: Duration::from_millis(200),
            history_window: 10,
        }
    }
}

enum Controller {
    Step(StepInterview),
    Full(FullInterview),
}

struct SessionState {
    conversation: Conversation,
    controller: Controller,
    phase: SessionPhase,
    started: bool,
    log_saved: bool,
    finalization: FinalizationStatus,
    last_activity: Instant,
}

impl SessionState {
    /// Enter the completed phase.
    ///
    /// Returns the finalization job the first time only, so concurrent
    /// completion paths cannot persist twice.
    fn complete(&mut self, title: &str) -> Option<FinalizeJob> {
        self.phase = SessionPhase::Completed;
        self.last_activity = Instant::now();
        match &mut self.controller {
            Controller::Step(step) => step.finish(),
            Controller::Full(full) => full.stop(),
        }
        if self.log_saved {
            return None;
        }
        self.log_saved = true;
        self.finalization = FinalizationStatus::Saving;
        Some(FinalizeJob {
            key: LogKey::now(),
            title: title.to_string(),
            markdown: self.conversation.transcript.to_markdown(),
        })
    }

    fn ensure_collecting(&self) -> Result<(), IntakeError> {
        if self.phase == SessionPhase::Completed {
            return Err(IntakeError::SessionCompleted);
        }
        if !self.started {
            return Err(IntakeError::InvalidInput("session has not started".into()));
        }
        Ok(())
    }
}

/// Marks a turn as running until dropped
struct TurnGuard<'a>(&'a AtomicBool);

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn lock_state(state: &Mutex<SessionState>) -> MutexGuard<'_, SessionState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Work left after the state lock is released
enum Pending {
    Nothing,
    Advance,
    Interpret(Vec<LlmMessage>),
    Turn { request: TurnRequest, opening: bool },
    Finalize(FinalizeJob),
}

impl Pending {
    fn finalize(job: Option<FinalizeJob>) -> Self {
        job.map_or(Pending::Nothing, Pending::Finalize)
    }
}

/// The question the patient is currently answering
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentQuestion {
    pub link_id: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    /// Present when the patient should pick from a list
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer_options: Option<Vec<AnswerOption>>,
}

impl CurrentQuestion {
    fn new(question: &Question, offer_options: bool) -> Self {
        Self {
            link_id: question.link_id.clone(),
            text: question.text.clone(),
            section: question.section.clone(),
            answer_options: offer_options
                .then(|| question.answer_options().map(<[AnswerOption]>::to_vec))
                .flatten(),
        }
    }
}

/// Point-in-time snapshot of a session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub id: Uuid,
    pub mode: InterviewMode,
    pub questionnaire_title: String,
    pub phase: SessionPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_phase: Option<StepPhase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interview_active: Option<bool>,
    pub messages: Transcript,
    pub answers: Vec<AnswerRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_question: Option<CurrentQuestion>,
    pub grand_total: f64,
    pub turn_in_flight: bool,
    pub finalization: FinalizationStatus,
}

/// One patient conversation.
///
/// Turns are serialized: while a turn (including its LLM call and the
/// advance delay) is running, further input fails with
/// [`IntakeError::TurnInProgress`]. The state lock is never held across an
/// await, and results that arrive after the session completed are dropped.
/// Persisting a completed session runs on its own task, so it finishes even
/// if the caller stops waiting.
pub struct InterviewSession {
    id: Uuid,
    title: String,
    mode: InterviewMode,
    state: Arc<Mutex<SessionState>>,
    turn_in_flight: AtomicBool,
    llm: Arc<dyn InterviewLlm>,
    finalizer: SessionFinalizer,
    settings: SessionSettings,
}

impl InterviewSession {
    pub fn new(
        questionnaire: &Questionnaire,
        mode: InterviewMode,
        llm: Arc<dyn InterviewLlm>,
        store: Arc<dyn SessionStore>,
        settings: SessionSettings,
    ) -> Self {
        let controller = match mode {
            InterviewMode::Step => {
                Controller::Step(StepInterview::new(questionnaire.questions(QuestionView::Scored)))
            }
            InterviewMode::LlmFull => Controller::Full(FullInterview::new(
                questionnaire.questions(QuestionView::Answerable),
                settings.history_window,
            )),
        };

        Self {
            id: Uuid::new_v4(),
            title: questionnaire.display_title().to_string(),
            mode,
            state: Arc::new(Mutex::new(SessionState {
                conversation: Conversation::default(),
                controller,
                phase: SessionPhase::Collecting,
                started: false,
                log_saved: false,
                finalization: FinalizationStatus::Pending,
                last_activity: Instant::now(),
            })),
            turn_in_flight: AtomicBool::new(false),
            finalizer: SessionFinalizer::new(llm.clone(), store),
            llm,
            settings,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn mode(&self) -> InterviewMode {
        self.mode
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn phase(&self) -> SessionPhase {
        self.lock().phase
    }

    pub fn finalization(&self) -> FinalizationStatus {
        self.lock().finalization.clone()
    }

    /// Time since the last turn started or the session completed
    pub fn idle_for(&self) -> Duration {
        self.lock().last_activity.elapsed()
    }

    pub fn is_turn_in_flight(&self) -> bool {
        self.turn_in_flight.load(Ordering::Acquire)
    }

    /// Open the conversation: greet and ask in step mode, or run the
    /// opening LLM turn
    pub async fn start(&self) -> Result<SessionView, IntakeError> {
        let turn = self.begin_turn()?;
        let pending = {
            let mut guard = self.lock();
            let state = &mut *guard;
            if state.started {
                return Err(IntakeError::InvalidInput("session already started".into()));
            }
            state.started = true;

            match &mut state.controller {
                Controller::Step(step) => match step.start(&mut state.conversation) {
                    StepProgress::Finished => Pending::finalize(state.complete(&self.title)),
                    _ => Pending::Nothing,
                },
                Controller::Full(full) => Pending::Turn {
                    request: full.opening_request(&state.conversation),
                    opening: true,
                },
            }
        };

        tracing::info!(session_id = %self.id, mode = self.mode.as_str(), title = %self.title, "Interview started");
        self.drive(pending).await;
        drop(turn);
        Ok(self.view())
    }

    /// Submit a typed message
    pub async fn submit(&self, text: &str) -> Result<SessionView, IntakeError> {
        let turn = self.begin_turn()?;
        let pending = {
            let mut guard = self.lock();
            let state = &mut *guard;
            state.ensure_collecting()?;

            match &mut state.controller {
                Controller::Step(step) => match step.submit(&mut state.conversation, text)? {
                    StepProgress::Recorded => Pending::Advance,
                    StepProgress::Interpret(messages) => Pending::Interpret(messages),
                    _ => Pending::Nothing,
                },
                Controller::Full(full) => Pending::Turn {
                    request: full.prepare_turn(&mut state.conversation, text)?,
                    opening: false,
                },
            }
        };

        self.drive(pending).await;
        drop(turn);
        Ok(self.view())
    }

    /// Pick an offered option by code, or skip with `None`
    pub async fn select_option(&self, code: Option<&str>) -> Result<SessionView, IntakeError> {
        let turn = self.begin_turn()?;
        let pending = {
            let mut guard = self.lock();
            let state = &mut *guard;
            state.ensure_collecting()?;

            match &mut state.controller {
                Controller::Step(step) => {
                    step.select(&mut state.conversation, code)?;
                    Pending::Advance
                }
                Controller::Full(_) => {
                    return Err(IntakeError::NotSupported(
                        "option selection is only available in step mode".into(),
                    ));
                }
            }
        };

        self.drive(pending).await;
        drop(turn);
        Ok(self.view())
    }

    /// Finish now and persist whatever has been collected.
    ///
    /// Does not wait for an in-flight turn; its result is discarded when it
    /// lands. Calling this again is a no-op.
    pub async fn end_early(&self) -> Result<SessionView, IntakeError> {
        let job = self.lock().complete(&self.title);
        if let Some(job) = job {
            tracing::info!(session_id = %self.id, "Interview ended early");
            self.finish(job).await;
        }
        Ok(self.view())
    }

    pub fn view(&self) -> SessionView {
        let turn_in_flight = self.is_turn_in_flight();
        let state = self.lock();

        let (step_phase, interview_active, current_question) = match &state.controller {
            Controller::Step(step) => (
                Some(step.phase()),
                None,
                step.current()
                    .map(|q| CurrentQuestion::new(q, step.phase() == StepPhase::AwaitingScore)),
            ),
            Controller::Full(full) => (
                None,
                Some(full.is_active()),
                full.current_asked()
                    .and_then(|link_id| full.question(link_id))
                    .map(|q| CurrentQuestion::new(q, q.is_closed_choice())),
            ),
        };

        SessionView {
            id: self.id,
            mode: self.mode,
            questionnaire_title: self.title.clone(),
            phase: state.phase,
            step_phase,
            interview_active,
            messages: state.conversation.transcript.clone(),
            answers: state.conversation.answers.to_vec(),
            current_question,
            grand_total: state.conversation.answers.grand_total(),
            turn_in_flight,
            finalization: state.finalization.clone(),
        }
    }

    fn begin_turn(&self) -> Result<TurnGuard<'_>, IntakeError> {
        self.turn_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| IntakeError::TurnInProgress)?;
        self.lock().last_activity = Instant::now();
        Ok(TurnGuard(&self.turn_in_flight))
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        lock_state(&self.state)
    }

    /// Run the awaited part of a turn
    async fn drive(&self, mut pending: Pending) {
        loop {
            pending = match pending {
                Pending::Nothing => return,
                Pending::Finalize(job) => {
                    self.finish(job).await;
                    return;
                }
                Pending::Advance => {
                    if !self.settings.advance_delay.is_zero() {
                        tokio::time::sleep(self.settings.advance_delay).await;
                    }
                    self.resume(|state, title| {
                        let Controller::Step(step) = &mut state.controller else {
                            return Pending::Nothing;
                        };
                        match step.advance(&mut state.conversation) {
                            StepProgress::Finished => Pending::finalize(state.complete(title)),
                            _ => Pending::Nothing,
                        }
                    })
                }
                Pending::Interpret(messages) => {
                    let reply = self.llm.interpret_free_text(messages).await;
                    self.resume(|state, _| {
                        if let Controller::Step(step) = &mut state.controller {
                            step.apply_interpretation(&mut state.conversation, reply);
                        }
                        Pending::Nothing
                    })
                }
                Pending::Turn { request, opening } => {
                    let turn = match self.llm.run_interview_turn(&request).await {
                        Ok(turn) => turn,
                        Err(e) => {
                            tracing::warn!(session_id = %self.id, error = %e, "Interview turn failed");
                            InterviewTurn::apology()
                        }
                    };
                    tracing::debug!(session_id = %self.id, action = turn.action.as_str(), "Interview turn");
                    self.resume(|state, title| {
                        let Controller::Full(full) = &mut state.controller else {
                            return Pending::Nothing;
                        };
                        match full.apply_turn(&mut state.conversation, turn, opening) {
                            TurnEffect::Completed => Pending::finalize(state.complete(title)),
                            TurnEffect::Continue | TurnEffect::Halted => Pending::Nothing,
                        }
                    })
                }
            };
        }
    }

    /// Re-enter the state after an await, unless the session completed meanwhile
    fn resume(&self, apply: impl FnOnce(&mut SessionState, &str) -> Pending) -> Pending {
        let mut guard = self.lock();
        if guard.phase == SessionPhase::Completed {
            tracing::debug!(session_id = %self.id, "Discarding result for completed session");
            return Pending::Nothing;
        }
        apply(&mut guard, &self.title)
    }

    async fn finish(&self, job: FinalizeJob) {
        tracing::info!(session_id = %self.id, answers = self.lock().conversation.answers.len(), "Interview completed");
        let state = Arc::clone(&self.state);
        let finalizer = self.finalizer.clone();
        let task = tokio::spawn(async move {
            let status = finalizer.finalize(job).await;
            lock_state(&state).finalization = status;
        });
        if let Err(e) = task.await {
            tracing::error!(session_id = %self.id, error = %e, "Finalization task failed");
            self.lock().finalization = FinalizationStatus::Failed {
                error: e.to_string(),
            };
        }
    }
}
