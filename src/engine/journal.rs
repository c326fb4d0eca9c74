//! Append-only session journal with file-based persistence.
//!
//! Events are stored as newline-delimited JSON (JSONL) per session, under
//! `$INTAKE_HOME/sessions/<uuid>/`. Replaying a journal reproduces the
//! session exactly, which is how interrupted sessions resume and how
//! submission retries detect an already-created subject record.
//!
//! An advisory file lock enforces the one-active-session rule: a second
//! journal open for the same session fails instead of racing the first.

use std::path::{Path, PathBuf};

use fs2::FileExt;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use uuid::Uuid;

use crate::domain::{Session, SessionEvent, SessionEventKind};

/// Errors raised by the journal
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Session {0} is already open elsewhere")]
    SessionLocked(Uuid),

    #[error("Session not found: {0}")]
    NotFound(Uuid),
}

/// File-based session journal using JSONL format
pub struct SessionJournal {
    session_dir: PathBuf,
    events_path: PathBuf,

    /// Held for the journal's lifetime; releasing it frees the session
    _lock: std::fs::File,
}

impl SessionJournal {
    /// Create or open the journal for a session under the given base
    /// directory, acquiring the session lock.
    pub async fn open(base_dir: &Path, session_id: Uuid) -> Result<Self, JournalError> {
        let session_dir = base_dir.join(session_id.to_string());
        fs::create_dir_all(&session_dir).await?;

        let lock_path = session_dir.join("lock");
        let lock = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)?;
        lock.try_lock_exclusive()
            .map_err(|_| JournalError::SessionLocked(session_id))?;

        Ok(Self {
            events_path: session_dir.join("events.jsonl"),
            session_dir,
            _lock: lock,
        })
    }

    /// Open the journal in the configured default location
    /// (`$INTAKE_HOME/sessions/<uuid>/`)
    pub async fn open_default(session_id: Uuid) -> anyhow::Result<Self> {
        let base = crate::config::sessions_dir()?;
        Ok(Self::open(&base, session_id).await?)
    }

    /// Directory holding this session's files
    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    /// Append an event to the log
    pub async fn append(&self, event: &SessionEvent) -> Result<(), JournalError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events_path)
            .await?;

        let json = serde_json::to_string(event)?;
        file.write_all(format!("{}\n", json).as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }

    /// Replay all events in order
    pub async fn replay(&self) -> Result<Vec<SessionEvent>, JournalError> {
        if !self.events_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.events_path).await?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut events = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let event: SessionEvent = serde_json::from_str(&line)?;
            events.push(event);
        }

        Ok(events)
    }

    /// Rebuild the session from its journal, if any events exist
    pub async fn load_session(&self) -> Result<Option<Session>, JournalError> {
        let events = self.replay().await?;
        Ok(Session::from_events(&events))
    }

    /// Subject record already created under this idempotency key?
    ///
    /// Submission retries use this to skip re-creating the subject after a
    /// partial failure.
    pub async fn find_subject(&self, idempotency_key: &str) -> Result<Option<Uuid>, JournalError> {
        let events = self.replay().await?;

        Ok(events.iter().find_map(|e| match &e.kind {
            SessionEventKind::SubjectCreated {
                idempotency_key: key,
                subject_id,
            } if key == idempotency_key => Some(*subject_id),
            _ => None,
        }))
    }

    /// List all session IDs under a base directory
    pub async fn list_sessions(base_dir: &Path) -> Result<Vec<Uuid>, JournalError> {
        if !base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut sessions = Vec::new();
        let mut entries = fs::read_dir(base_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    if let Ok(uuid) = Uuid::parse_str(name) {
                        sessions.push(uuid);
                    }
                }
            }
        }

        Ok(sessions)
    }
}

/// Generate an idempotency key for a persistence operation
pub fn idempotency_key(session_id: Uuid, operation: &str, payload: &str) -> String {
    format!("{}:{}:{}", session_id, operation, hash_payload(payload))
}

/// Hash a payload (first 16 hex chars of SHA256)
pub fn hash_payload(payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..8])
}
