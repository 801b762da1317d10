use serde::Serialize;
use std::sync::Arc;

use crate::llm::InterviewLlm;
use crate::store::{LogKey, SessionRecord, SessionStore};

/// Snapshot taken at the moment a session completes
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizeJob {
    pub key: LogKey,
    pub title: String,
    pub markdown: String,
}

/// Progress of the one-time export of a finished session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum FinalizationStatus {
    Pending,
    Saving,
    Saved {
        day: String,
        time: String,
    },
    /// Stored with the transcript only
    #[serde(rename_all = "camelCase")]
    SavedWithoutStructure {
        day: String,
        time: String,
        error: String,
    },
    Failed {
        error: String,
    },
}

/// Turns a finished transcript into a stored record
#[derive(Clone)]
pub struct SessionFinalizer {
    llm: Arc<dyn InterviewLlm>,
    store: Arc<dyn SessionStore>,
}

impl SessionFinalizer {
    pub fn new(llm: Arc<dyn InterviewLlm>, store: Arc<dyn SessionStore>) -> Self {
        Self { llm, store }
    }

    /// Structure the transcript and persist it.
    ///
    /// A failed structuring call still saves the markdown with an empty
    /// structured response.
    pub async fn finalize(&self, job: FinalizeJob) -> FinalizationStatus {
        let structured = match self.llm.structure_transcript(&job.markdown).await {
            Ok(document) => Ok(document),
            Err(e) => {
                tracing::warn!(error = %e, "Transcript structuring failed");
                Err(e.to_string())
            }
        };

        let record = SessionRecord {
            markdown: job.markdown,
            structured_response: structured.as_ref().ok().cloned(),
            questionnaire_title: job.title,
        };

        if let Err(e) = self.store.save(&job.key, &record).await {
            tracing::error!(error = %e, day = %job.key.day, time = %job.key.time, "Failed to save session log");
            return FinalizationStatus::Failed {
                error: e.to_string(),
            };
        }

        tracing::info!(
            day = %job.key.day,
            time = %job.key.time,
            structured = structured.is_ok(),
            "Session log saved"
        );

        let LogKey { day, time } = job.key;
        match structured {
            Ok(_) => FinalizationStatus::Saved { day, time },
            Err(error) => FinalizationStatus::SavedWithoutStructure { day, time, error },
        }
    }
}
