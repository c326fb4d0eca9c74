//! Gateway interfaces for external services.
//!
//! The engine calls three external collaborators: a speech-to-text
//! service, a language-understanding service for slot extraction, and the
//! downstream record store. Each is a single request/response boundary;
//! the engine never retries on its own, and a failed call leaves session
//! state untouched so the caller can safely re-issue.

pub mod extraction;
pub mod persistence;
pub mod transcription;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::capture::RecordingClip;
use crate::domain::catalog::{DataType, FieldSpec};

// Re-export the HTTP clients
pub use extraction::{HttpExtractionClient, RuleBasedExtractor};
pub use persistence::HttpPersistenceClient;
pub use transcription::HttpTranscriptionClient;

/// Errors crossing a gateway boundary
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Transcription failed: {0}")]
    TranscriptionFailed(String),

    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Persistence call failed: {0}")]
    PersistenceFailed(String),

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid gateway response: {0}")]
    InvalidResponse(String),
}

/// Transcription result: text plus an overall confidence score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    pub confidence: f64,
}

/// Wire-facing subset of a field spec sent to the extraction service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    pub label: String,
    pub data_type: DataType,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl From<&FieldSpec> for FieldSchema {
    fn from(spec: &FieldSpec) -> Self {
        Self {
            name: spec.name.clone(),
            label: spec.label.clone(),
            data_type: spec.data_type,
            required: spec.required,
            options: spec.options.clone(),
        }
    }
}

/// Request to the slot-extraction service.
///
/// The field schema is scoped to the fields currently in play, not the
/// whole catalog, and existing values are included so the service can
/// recognise incremental corrections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionRequest {
    pub transcript: String,
    pub fields: Vec<FieldSchema>,
    #[serde(default)]
    pub existing: BTreeMap<String, String>,
}

/// One candidate value returned by the extraction service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedValue {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// Partial map of field name to candidate value
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionResult {
    #[serde(rename = "extracted_values", default)]
    pub values: BTreeMap<String, ExtractedValue>,
}

impl ExtractionResult {
    /// True when the service found nothing
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Priority level attached to an intake submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Normal,
    Medium,
    High,
}

/// Subject (e.g. patient profile) record sent to the record store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectRecord {
    pub session_id: Uuid,
    pub idempotency_key: String,
    pub fields: BTreeMap<String, String>,
}

/// Intake submission record referencing a created subject
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub session_id: Uuid,
    pub subject_id: Uuid,
    pub idempotency_key: String,
    pub fields: BTreeMap<String, String>,
    pub summary: String,
    pub priority: Priority,
}

/// Speech-to-text boundary
#[async_trait]
pub trait TranscriptionGateway: Send + Sync {
    /// Transcribe a finished clip. One request, one response; retry policy
    /// belongs to the caller.
    async fn transcribe(&self, clip: &RecordingClip) -> Result<Transcript, GatewayError>;
}

/// Language-understanding boundary for slot extraction
#[async_trait]
pub trait ExtractionGateway: Send + Sync {
    /// Extract candidate slot values from a transcript
    async fn extract(&self, request: &ExtractionRequest) -> Result<ExtractionResult, GatewayError>;
}

/// Downstream record store boundary
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Create the primary subject record; returns its identifier
    async fn create_subject(&self, record: &SubjectRecord) -> Result<Uuid, GatewayError>;

    /// Create the intake submission record referencing the subject
    async fn create_submission(&self, record: &SubmissionRecord) -> Result<Uuid, GatewayError>;
}
