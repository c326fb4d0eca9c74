//! intake-engine - Voice-driven conversational intake engine
//!
//! The state-coordination core of a healthcare-practice intake flow: the
//! recording lifecycle, the turn-taking dialog state machine, the
//! slot-extraction merge policy, and the completion/submission
//! controller. UI rendering, form catalogs, and the speech-to-text /
//! language-understanding services themselves are external collaborators;
//! this crate owns only their call/response contracts.
//!
//! # Architecture
//!
//! The engine is event-sourced per session:
//! - All session mutations are recorded as immutable events
//! - Current state is derived by replaying events
//! - Interrupted sessions resume from the journal, and submission
//!   retries detect already-created records
//!
//! # Modules
//!
//! - `adapters`: External service boundaries (transcription, extraction,
//!   persistence)
//! - `capture`: Audio capture unit state machine
//! - `domain`: Data structures (IntakeDefinition, Session, SessionEvent)
//! - `engine`: Merge policy, dialog state machine, submission controller,
//!   session journal
//! - `cli`: Scripted-session driver for development
//!
//! # Usage
//!
//! ```bash
//! # Drive a session from a transcript script
//! intake run definition.yaml --script visit.txt
//!
//! # Inspect a session journal
//! intake status <session-id>
//! ```

pub mod adapters;
pub mod capture;
pub mod cli;
pub mod config;
pub mod domain;
pub mod engine;

// Re-export main types at crate root for convenience
pub use adapters::{
    ExtractionGateway, ExtractionRequest, ExtractionResult, GatewayError, PersistenceGateway,
    Priority, Transcript, TranscriptionGateway,
};
pub use capture::{AudioCaptureUnit, CaptureConfig, CaptureError, CaptureStage, RecordingClip};
pub use domain::{
    DataType, DialogMode, FieldSpec, IntakeDefinition, Session, SessionEvent, SessionState,
    SlotValue, Speaker, ValueSource,
};
pub use engine::{
    DialogEngine, DialogOutcome, MergePolicy, SessionJournal, SubmissionController,
    SubmissionPolicy, SubmissionReceipt, SubmitError,
};
