//! Shared application state

use intake_core::{InterviewLlm, InterviewSession, SessionSettings, SessionStore};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use uuid::Uuid;

type Sessions = HashMap<Uuid, Arc<InterviewSession>>;

/// Live sessions by id.
///
/// Sessions idle for longer than the ttl, completed or abandoned, are evicted
/// whenever a new session is added. A session with a turn in flight is never
/// evicted.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<Sessions>>,
    ttl: Duration,
}

impl SessionRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Arc::default(),
            ttl,
        }
    }

    pub fn insert(&self, session: Arc<InterviewSession>) {
        let count = {
            let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
            self.evict_idle(&mut sessions);
            sessions.insert(session.id(), session);
            sessions.len()
        };
        metrics::gauge!("intake_active_sessions").set(count as f64);
    }

    fn evict_idle(&self, sessions: &mut Sessions) {
        let before = sessions.len();
        sessions.retain(|id, session| {
            let expired = !session.is_turn_in_flight() && session.idle_for() >= self.ttl;
            if expired {
                tracing::info!(session_id = %id, phase = ?session.phase(), "Evicting idle session");
            }
            !expired
        });
        let evicted = before - sessions.len();
        if evicted > 0 {
            metrics::counter!("intake_sessions_evicted_total").increment(evicted as u64);
        }
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<InterviewSession>> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }

    pub fn remove(&self, id: Uuid) -> Option<Arc<InterviewSession>> {
        let (removed, count) = {
            let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
            (sessions.remove(&id), sessions.len())
        };
        metrics::gauge!("intake_active_sessions").set(count as f64);
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// State handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionRegistry,
    pub llm: Arc<dyn InterviewLlm>,
    pub store: Arc<dyn SessionStore>,
    pub settings: SessionSettings,
    /// Name of the configured LLM provider, if any
    pub llm_provider: Option<&'static str>,
}
