//! Session transcript persistence: one pretty-printed JSON file per session.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use super::session::Session;

const MAX_SESSION_ID_LEN: usize = 128;

/// Whether `id` can be used verbatim as part of a file name.
pub fn is_safe_session_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_SESSION_ID_LEN
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Writes session snapshots under a log directory.
///
/// Failures never propagate: they are logged and reported as `None`.
#[derive(Debug, Clone)]
pub struct SessionLogger {
    dir: PathBuf,
}

impl SessionLogger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path a live session is saved to.
    pub fn session_path(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("session_{session_id}.json"))
    }

    /// Path a client-supplied transcript is saved to.
    pub fn raw_path(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.json"))
    }

    /// Persist the session's snapshot record. Returns the written path.
    pub async fn save(&self, session: &Session) -> Option<PathBuf> {
        if !is_safe_session_id(session.id()) {
            tracing::error!(session_id = %session.id(), "Refusing to save session log: unsafe id");
            return None;
        }

        let path = self.session_path(session.id());
        let record = session.to_record();
        let result = match serde_json::to_vec_pretty(&record) {
            Ok(bytes) => self.write(&path, &bytes).await,
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(()) => {
                tracing::info!(path = %path.display(), "Session saved");
                Some(path)
            }
            Err(e) => {
                tracing::error!(session_id = %session.id(), "Error saving session log: {e:#}");
                None
            }
        }
    }

    /// Persist a client-supplied transcript verbatim under `session_id`.
    pub async fn save_raw(&self, session_id: &str, body: &serde_json::Value) -> Option<PathBuf> {
        if !is_safe_session_id(session_id) {
            tracing::error!(session_id, "Refusing to save chat log: unsafe id");
            return None;
        }

        let path = self.raw_path(session_id);
        let result = match serde_json::to_vec_pretty(body) {
            Ok(bytes) => self.write(&path, &bytes).await,
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(()) => {
                tracing::info!(path = %path.display(), "Chat log saved from request body");
                Some(path)
            }
            Err(e) => {
                tracing::error!(session_id, "Error saving chat log: {e:#}");
                None
            }
        }
    }

    /// Write through a temp file and rename so readers never see a partial file.
    /// Concurrent saves of one id are last-writer-wins.
    async fn write(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create log directory: {}", self.dir.display()))?;

        let file_name = path
            .file_name()
            .and_then(|v| v.to_str())
            .unwrap_or("session.json");
        let temp_path = self
            .dir
            .join(format!(".{file_name}.tmp-{}", uuid::Uuid::new_v4()));

        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("Failed to create temporary log file: {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .context("Failed to write session log contents")?;
        file.flush().await.context("Failed to flush session log")?;
        drop(file);

        if let Err(e) = fs::rename(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            anyhow::bail!("Failed to move session log into place: {e}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::{Role, SessionRecord};

    #[test]
    fn safe_ids() {
        assert!(is_safe_session_id("session_20250101_120000_ab12cd34"));
        assert!(is_safe_session_id("3f1c9a7e-0b7d-4c1e-9a55-1d2f3e4a5b6c"));
        assert!(!is_safe_session_id(""));
        assert!(!is_safe_session_id(".."));
        assert!(!is_safe_session_id("../etc/passwd"));
        assert!(!is_safe_session_id("a/b"));
        assert!(!is_safe_session_id(&"x".repeat(200)));
    }

    #[tokio::test]
    async fn save_round_trips_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        let logger = SessionLogger::new(tmp.path().join("logs"));

        let mut session = Session::new("roundtrip");
        session.append_turn(Role::User, "my name is Alice");
        session.append_turn(Role::Assistant, "Hello Alice");
        session.extract_and_set_name("my name is Alice");
        session.record_issue_resolution("upload failed", "use PDF under 10MB");

        let path = logger.save(&session).await.expect("log should be written");
        assert_eq!(path, tmp.path().join("logs").join("session_roundtrip.json"));

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let record: SessionRecord = serde_json::from_str(&contents).unwrap();
        assert_eq!(record.session_id, "roundtrip");
        assert_eq!(&record.user_data, session.data());

        let raw: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(raw["user_data"]["name"], "Alice");
        assert_eq!(raw["user_data"]["user_type"], "unknown");
        assert_eq!(raw["user_data"]["conversation_history"][0]["role"], "user");
        assert!(raw["end_time"].is_string());
    }

    #[tokio::test]
    async fn save_overwrites_previous_log() {
        let tmp = tempfile::tempdir().unwrap();
        let logger = SessionLogger::new(tmp.path());
        let mut session = Session::new("again");

        logger.save(&session).await.unwrap();
        session.append_turn(Role::User, "second save");
        let path = logger.save(&session).await.unwrap();

        let record: SessionRecord =
            serde_json::from_str(&tokio::fs::read_to_string(&path).await.unwrap()).unwrap();
        assert_eq!(record.user_data.conversation_history.len(), 1);
    }

    #[tokio::test]
    async fn save_failure_returns_none() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        tokio::fs::write(&blocker, b"file").await.unwrap();

        let logger = SessionLogger::new(&blocker);
        assert!(logger.save(&Session::new("s")).await.is_none());
    }

    #[tokio::test]
    async fn save_raw_writes_body_verbatim() {
        let tmp = tempfile::tempdir().unwrap();
        let logger = SessionLogger::new(tmp.path());
        let body = serde_json::json!({"messages": [{"from": "user", "text": "hi"}]});

        let path = logger.save_raw("client-42", &body).await.unwrap();
        assert_eq!(path, tmp.path().join("client-42.json"));
        let written: serde_json::Value =
            serde_json::from_str(&tokio::fs::read_to_string(&path).await.unwrap()).unwrap();
        assert_eq!(written, body);
    }

    #[tokio::test]
    async fn save_raw_rejects_unsafe_id() {
        let tmp = tempfile::tempdir().unwrap();
        let logger = SessionLogger::new(tmp.path());
        assert!(logger
            .save_raw("../escape", &serde_json::json!({"a": 1}))
            .await
            .is_none());
    }
}
