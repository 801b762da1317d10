use async_trait::async_trait;
use intake_core::store::{LogDocument, insert_record, remove_record};
use intake_core::{IntakeError, LogKey, SessionLogs, SessionRecord, SessionStore};
use serde_json::Value as JsonValue;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// All session records in one JSON document, `{day: {time: record}}`.
///
/// Every mutation rewrites the whole document through a temp file and a
/// rename, serialized by an async mutex. A file that cannot be read as a
/// document is renamed to `<name>.corrupt-<day>_<time>` before the first
/// rewrite, and entries that are not records are written back untouched.
pub struct FileLogStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

/// What is on disk
enum Loaded {
    Document(LogDocument),
    /// The file exists but is not a log document
    Corrupt,
}

fn storage_error(action: &str, path: &Path, err: impl std::fmt::Display) -> IntakeError {
    IntakeError::Storage(format!("failed to {action} {}: {err}", path.display()))
}

impl FileLogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Loaded, IntakeError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Loaded::Document(LogDocument::default())),
            Err(e) => return Err(storage_error("read", &self.path, e)),
        };

        let document = match serde_json::from_slice::<JsonValue>(&bytes) {
            Ok(document) => document,
            Err(e) => {
                tracing::error!(path = %self.path.display(), error = %e, "Session log file is not valid JSON");
                return Ok(Loaded::Corrupt);
            }
        };
        match LogDocument::parse(document) {
            Some(document) => Ok(Loaded::Document(document)),
            None => {
                tracing::error!(path = %self.path.display(), "Session log file is not a JSON object");
                Ok(Loaded::Corrupt)
            }
        }
    }

    /// Load for a read; a corrupt file reads as empty
    async fn read_logs(&self) -> Result<SessionLogs, IntakeError> {
        Ok(match self.load().await? {
            Loaded::Document(document) => document.logs,
            Loaded::Corrupt => SessionLogs::new(),
        })
    }

    /// Load for a rewrite; a corrupt file is moved aside first
    async fn load_for_update(&self) -> Result<LogDocument, IntakeError> {
        match self.load().await? {
            Loaded::Document(document) => Ok(document),
            Loaded::Corrupt => {
                self.set_aside().await?;
                Ok(LogDocument::default())
            }
        }
    }

    async fn set_aside(&self) -> Result<(), IntakeError> {
        let stamp = LogKey::now();
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(format!(".corrupt-{}_{}", stamp.day, stamp.time));
        let target = self.path.with_file_name(name);
        tokio::fs::rename(&self.path, &target)
            .await
            .map_err(|e| storage_error("set aside", &self.path, e))?;
        tracing::warn!(path = %self.path.display(), moved_to = %target.display(), "Moved corrupt session log file aside");
        Ok(())
    }

    async fn write(&self, document: &LogDocument) -> Result<(), IntakeError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| storage_error("create", parent, e))?;
        }

        let json = document
            .to_json()
            .and_then(|value| serde_json::to_vec_pretty(&value))
            .map_err(|e| storage_error("encode", &self.path, e))?;
        let temp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, json)
            .await
            .map_err(|e| storage_error("write", &temp_path, e))?;
        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| storage_error("replace", &self.path, e))
    }
}

#[async_trait]
impl SessionStore for FileLogStore {
    async fn save(&self, key: &LogKey, record: &SessionRecord) -> Result<(), IntakeError> {
        let _guard = self.write_lock.lock().await;
        let mut document = self.load_for_update().await?;
        insert_record(&mut document.logs, key, record.clone());
        self.write(&document).await?;
        tracing::debug!(day = %key.day, time = %key.time, "Session record written");
        Ok(())
    }

    async fn list(&self) -> Result<SessionLogs, IntakeError> {
        let _guard = self.write_lock.lock().await;
        self.read_logs().await
    }

    async fn get(&self, key: &LogKey) -> Result<Option<SessionRecord>, IntakeError> {
        let mut logs = self.list().await?;
        Ok(logs
            .get_mut(&key.day)
            .and_then(|day| day.remove(&key.time)))
    }

    async fn delete(&self, key: &LogKey) -> Result<bool, IntakeError> {
        let _guard = self.write_lock.lock().await;
        let Loaded::Document(mut document) = self.load().await? else {
            return Ok(false);
        };
        if !remove_record(&mut document.logs, key) {
            return Ok(false);
        }
        self.write(&document).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intake_core::{Transcript, generate_markdown_transcript};
    use serde_json::json;

    fn store(dir: &tempfile::TempDir) -> FileLogStore {
        FileLogStore::new(dir.path().join("logs").join("chat_logs.json"))
    }

    fn record(markdown: &str) -> SessionRecord {
        SessionRecord {
            markdown: markdown.into(),
            structured_response: None,
            questionnaire_title: "Untitled".into(),
        }
    }

    #[tokio::test]
    async fn markdown_survives_save_and_reload_byte_for_byte() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        let mut transcript = Transcript::new();
        transcript.push_bot("Welcome! *Hi* \"there\"");
        transcript.push_user("ünïcødé\nand a newline");
        let markdown = generate_markdown_transcript(transcript.messages());

        let key = LogKey::new("2024-03-01", "08-15-30-123");
        let record = SessionRecord {
            markdown: markdown.clone(),
            structured_response: None,
            questionnaire_title: "PHQ-9".into(),
        };
        store.save(&key, &record).await.unwrap();

        let reopened = FileLogStore::new(store.path());
        let loaded = reopened.get(&key).await.unwrap().unwrap();
        assert_eq!(loaded.markdown, markdown);
        assert_eq!(loaded, record);
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn delete_prunes_empty_days() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let a = LogKey::new("2024-03-01", "08-00-00-000");
        let b = LogKey::new("2024-03-02", "09-00-00-000");
        let record = SessionRecord {
            markdown: "# log".into(),
            structured_response: Some(json!({"resourceType": "QuestionnaireResponse"})),
            questionnaire_title: "Untitled".into(),
        };
        store.save(&a, &record).await.unwrap();
        store.save(&b, &record).await.unwrap();

        assert!(store.delete(&a).await.unwrap());
        assert!(!store.delete(&a).await.unwrap());

        let logs = store.list().await.unwrap();
        assert!(!logs.contains_key("2024-03-01"));
        assert_eq!(logs["2024-03-02"].len(), 1);
    }

    #[tokio::test]
    async fn legacy_files_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat_logs.json");
        std::fs::write(
            &path,
            json!({"2023-01-01": {"10-00-00": "old transcript", "11-00-00": {"markdown": "m", "fhir": {"a": 1}}}})
                .to_string(),
        )
        .unwrap();
        let store = FileLogStore::new(&path);
        let logs = store.list().await.unwrap();
        assert_eq!(logs["2023-01-01"]["10-00-00"].markdown, "old transcript");
        assert_eq!(logs["2023-01-01"]["11-00-00"].structured_response, Some(json!({"a": 1})));
    }

    #[tokio::test]
    async fn corrupt_file_is_set_aside_before_saving() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat_logs.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = FileLogStore::new(&path);

        assert!(store.list().await.unwrap().is_empty());
        assert!(!store.delete(&LogKey::new("2023-01-01", "10-00-00")).await.unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{not json");

        let key = LogKey::new("2024-03-01", "08-00-00-000");
        store.save(&key, &record("# new")).await.unwrap();

        let aside: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("chat_logs.json.corrupt-"))
            })
            .collect();
        assert_eq!(aside.len(), 1);
        assert_eq!(std::fs::read_to_string(&aside[0]).unwrap(), "{not json");

        let logs = store.list().await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs["2024-03-01"]["08-00-00-000"].markdown, "# new");
    }

    #[tokio::test]
    async fn unrecognised_entries_are_written_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat_logs.json");
        std::fs::write(
            &path,
            json!({
                "2023-01-01": {"10-00-00": "old transcript", "11-00-00": {"draft": true}},
                "notes": "kept by hand"
            })
            .to_string(),
        )
        .unwrap();
        let store = FileLogStore::new(&path);

        store.save(&LogKey::new("2023-01-01", "12-00-00"), &record("# new")).await.unwrap();
        assert!(store.delete(&LogKey::new("2023-01-01", "10-00-00")).await.unwrap());

        let on_disk: JsonValue = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(on_disk["notes"], "kept by hand");
        assert_eq!(on_disk["2023-01-01"]["11-00-00"], json!({"draft": true}));
        assert_eq!(on_disk["2023-01-01"]["12-00-00"]["markdown"], "# new");
        assert!(on_disk["2023-01-01"].get("10-00-00").is_none());
    }

    #[tokio::test]
    async fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        assert!(store.list().await.unwrap().is_empty());
        assert!(store.get(&LogKey::new("2024-01-01", "00-00-00-000")).await.unwrap().is_none());
    }
}
