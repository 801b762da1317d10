//! Persisted session records and the store seam

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::IntakeError;

fn untitled() -> String {
    "Untitled".to_string()
}

/// What a finished session leaves behind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub markdown: String,

    /// QuestionnaireResponse produced from the transcript, `None` if structuring failed
    #[serde(default, alias = "fhir")]
    pub structured_response: Option<JsonValue>,

    #[serde(default = "untitled")]
    pub questionnaire_title: String,
}

/// Day/time key a record is stored under
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogKey {
    /// `YYYY-MM-DD`
    pub day: String,
    /// `HH-MM-SS-mmm`
    pub time: String,
}

impl LogKey {
    pub fn new(day: impl Into<String>, time: impl Into<String>) -> Self {
        Self {
            day: day.into(),
            time: time.into(),
        }
    }

    /// Key for the current local time
    pub fn now() -> Self {
        Self::at(Local::now())
    }

    pub fn at(instant: DateTime<Local>) -> Self {
        Self {
            day: instant.format("%Y-%m-%d").to_string(),
            time: instant.format("%H-%M-%S-%3f").to_string(),
        }
    }
}

/// All stored records, by day then time
pub type SessionLogs = BTreeMap<String, BTreeMap<String, SessionRecord>>;

/// Insert or replace a record
pub fn insert_record(logs: &mut SessionLogs, key: &LogKey, record: SessionRecord) {
    logs.entry(key.day.clone())
        .or_default()
        .insert(key.time.clone(), record);
}

/// Remove a record, dropping its day when it was the last one
pub fn remove_record(logs: &mut SessionLogs, key: &LogKey) -> bool {
    let Some(day) = logs.get_mut(&key.day) else {
        return false;
    };
    let removed = day.remove(&key.time).is_some();
    if day.is_empty() {
        logs.remove(&key.day);
    }
    removed
}

/// A stored log document.
///
/// A bare string entry is an old transcript-only record; object entries need
/// a `markdown` field. Entries that are neither, and days that are not
/// objects, are kept verbatim in `unrecognised` so rewriting the document
/// does not drop them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogDocument {
    pub logs: SessionLogs,
    pub unrecognised: JsonMap<String, JsonValue>,
}

impl LogDocument {
    /// `None` when the document is not a JSON object
    pub fn parse(document: JsonValue) -> Option<Self> {
        let JsonValue::Object(days) = document else {
            return None;
        };

        let mut parsed = Self::default();
        for (day, sessions) in days {
            let JsonValue::Object(sessions) = sessions else {
                tracing::warn!(day = %day, "Keeping malformed log day as is");
                parsed.unrecognised.insert(day, sessions);
                continue;
            };
            for (time, entry) in sessions {
                match parse_entry(&entry) {
                    Some(record) => insert_record(&mut parsed.logs, &LogKey::new(day.clone(), time), record),
                    None => {
                        tracing::warn!(day = %day, time = %time, "Keeping invalid log entry as is");
                        if let JsonValue::Object(raw) = parsed
                            .unrecognised
                            .entry(day.clone())
                            .or_insert_with(|| JsonValue::Object(JsonMap::new()))
                        {
                            raw.insert(time, entry);
                        }
                    }
                }
            }
        }
        Some(parsed)
    }

    /// Records and unrecognised entries merged back into one document.
    ///
    /// A record wins over an unrecognised value stored under the same key.
    pub fn to_json(&self) -> Result<JsonValue, serde_json::Error> {
        let mut days = self.unrecognised.clone();
        for (day, sessions) in &self.logs {
            let slot = days
                .entry(day.clone())
                .or_insert_with(|| JsonValue::Object(JsonMap::new()));
            if !slot.is_object() {
                tracing::warn!(day = %day, "Replacing malformed log day with new records");
                *slot = JsonValue::Object(JsonMap::new());
            }
            if let JsonValue::Object(entries) = slot {
                for (time, record) in sessions {
                    entries.insert(time.clone(), serde_json::to_value(record)?);
                }
            }
        }
        Ok(JsonValue::Object(days))
    }
}

fn parse_entry(entry: &JsonValue) -> Option<SessionRecord> {
    match entry {
        JsonValue::String(markdown) => Some(SessionRecord {
            markdown: markdown.clone(),
            structured_response: None,
            questionnaire_title: untitled(),
        }),
        JsonValue::Object(fields) if fields.contains_key("markdown") => {
            SessionRecord::deserialize(entry).ok()
        }
        _ => None,
    }
}

/// Durable home of finished sessions
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save(&self, key: &LogKey, record: &SessionRecord) -> Result<(), IntakeError>;

    async fn list(&self) -> Result<SessionLogs, IntakeError>;

    async fn get(&self, key: &LogKey) -> Result<Option<SessionRecord>, IntakeError>;

    /// Returns whether a record was removed
    async fn delete(&self, key: &LogKey) -> Result<bool, IntakeError>;
}

/// Process-local store
#[derive(Debug, Default)]
pub struct MemoryStore {
    logs: Mutex<SessionLogs>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.lock().values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionLogs> {
        self.logs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn save(&self, key: &LogKey, record: &SessionRecord) -> Result<(), IntakeError> {
        insert_record(&mut self.lock(), key, record.clone());
        Ok(())
    }

    async fn list(&self) -> Result<SessionLogs, IntakeError> {
        Ok(self.lock().clone())
    }

    async fn get(&self, key: &LogKey) -> Result<Option<SessionRecord>, IntakeError> {
        Ok(self
            .lock()
            .get(&key.day)
            .and_then(|day| day.get(&key.time))
            .cloned())
    }

    async fn delete(&self, key: &LogKey) -> Result<bool, IntakeError> {
        Ok(remove_record(&mut self.lock(), key))
    }
}
