//! Session events for the event-sourced intake engine.
//!
//! All session mutations are recorded as immutable events in an append-only
//! journal. Replaying a session's events reproduces its current state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::session::{DialogMode, SlotValue};

/// A single event in a session's append-only journal.
///
/// Events are the source of truth for session state. The current state of a
/// session can be reconstructed by replaying its events in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    /// When this event occurred
    pub timestamp: DateTime<Utc>,

    /// The session this event belongs to
    pub session_id: Uuid,

    /// What happened
    #[serde(flatten)]
    pub kind: SessionEventKind,
}

impl SessionEvent {
    /// Create a new event with the current timestamp
    pub fn new(session_id: Uuid, kind: SessionEventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            session_id,
            kind,
        }
    }
}

/// Types of events that occur during an intake session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEventKind {
    /// A session was opened against a definition
    SessionStarted { definition: String, mode: DialogMode },

    /// The user said or typed something (appended only after transcription
    /// completes, never before)
    UserTurn { text: String },

    /// The engine emitted a prompt (appended only after merge and prompt
    /// computation complete)
    SystemTurn { text: String },

    /// A slot write passed the merge policy and coercion
    SlotAccepted { slot: SlotValue },

    /// A slot write was rejected (confidence dominance or coercion)
    SlotRejected {
        field: String,
        value: String,
        reason: String,
    },

    /// The category pointer advanced to the given index
    CategoryAdvanced { index: usize },

    /// The subject record was created downstream
    SubjectCreated {
        idempotency_key: String,
        subject_id: Uuid,
    },

    /// The intake submission record was created downstream
    SubmissionCreated { submission_id: Uuid },

    /// A persistence step failed (informational; terminal state changes
    /// are recorded separately)
    SubmissionFailed { stage: String, error: String },

    /// The session completed successfully and accepts no further input
    SessionSubmitted,

    /// The session ended in a failed state
    SessionFailed { error: String },
}
