//! Submission controller: validation, triage, two-phase persistence.
//!
//! Persistence is two independent calls with no shared transaction:
//! create the subject record, then create the intake submission. A
//! journal-backed idempotency key lets a retry after partial failure skip
//! the already-created subject record instead of duplicating it. The
//! remaining gap (subject created, submission permanently failed, no
//! rollback) is surfaced distinctly so the host can remediate.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::adapters::{
    GatewayError, PersistenceGateway, Priority, SubjectRecord, SubmissionRecord,
};
use crate::domain::catalog::{DataType, IntakeDefinition};
use crate::domain::session::{Session, SessionState};
use crate::domain::{SessionEvent, SessionEventKind};

use super::journal::{idempotency_key, JournalError, SessionJournal};
use super::merge::coerce;

/// Submission gate and triage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionPolicy {
    /// Minimum completion percent required to submit. At 100 (strict,
    /// the default) every required field must hold a conformant value;
    /// lower values allow early submission in lenient flows.
    #[serde(default = "default_min_completion")]
    pub min_completion_percent: u8,

    /// Severity-scale value at or above which priority is high
    #[serde(default = "default_severity_high")]
    pub severity_high: f64,

    /// Severity-scale value at or above which priority is medium
    #[serde(default = "default_severity_medium")]
    pub severity_medium: f64,
}

fn default_min_completion() -> u8 {
    100
}
fn default_severity_high() -> f64 {
    8.0
}
fn default_severity_medium() -> f64 {
    5.0
}

impl Default for SubmissionPolicy {
    fn default() -> Self {
        Self {
            min_completion_percent: default_min_completion(),
            severity_high: default_severity_high(),
            severity_medium: default_severity_medium(),
        }
    }
}

/// Submission failures, distinguished because the user-visible remediation
/// differs at each step
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Session already submitted; no further input accepted")]
    AlreadySubmitted,

    #[error("Completion {completion}% is below the configured minimum {minimum}%")]
    BelowThreshold { completion: u8, minimum: u8 },

    #[error("Missing or non-conformant required fields: {}", missing.join(", "))]
    ValidationFailed { missing: Vec<String> },

    #[error("Creating the subject record failed: {0}")]
    SubjectRecord(#[source] GatewayError),

    #[error("Creating the submission record failed (subject {subject_id} was created and is not rolled back): {source}")]
    SubmissionRecord {
        subject_id: Uuid,
        #[source]
        source: GatewayError,
    },

    #[error("Journal error: {0}")]
    Journal(#[from] JournalError),
}

/// Identifiers and derived metadata from a successful submission
#[derive(Debug, Clone)]
pub struct SubmissionReceipt {
    pub subject_id: Uuid,
    pub submission_id: Uuid,
    pub summary: String,
    pub priority: Priority,
}

/// The submission controller
pub struct SubmissionController {
    persistence: Box<dyn PersistenceGateway>,
    policy: SubmissionPolicy,
}

impl SubmissionController {
    /// Create a controller over a persistence gateway
    pub fn new(persistence: Box<dyn PersistenceGateway>, policy: SubmissionPolicy) -> Self {
        Self {
            persistence,
            policy,
        }
    }

    /// Validate the session and hand it off to downstream storage.
    ///
    /// Retry after a partial failure is safe: the journal detects an
    /// already-created subject record and skips step two.
    #[instrument(skip(self, session, definition, journal), fields(session = %session.id))]
    pub async fn submit(
        &self,
        session: &mut Session,
        definition: &IntakeDefinition,
        journal: &SessionJournal,
    ) -> Result<SubmissionReceipt, SubmitError> {
        // A failed session may be retried; a submitted one may not.
        if session.state == SessionState::Submitted {
            return Err(SubmitError::AlreadySubmitted);
        }

        self.validate(session, definition)?;

        let fields: BTreeMap<String, String> = session
            .slots
            .iter()
            .map(|(name, slot)| (name.clone(), slot.value.clone()))
            .collect();
        let payload = serde_json::to_string(&fields).unwrap_or_default();

        // Step two: subject record, skipped when a prior attempt already
        // created it under the same key.
        let subject_key = idempotency_key(session.id, "subject", &payload);
        let subject_id = match journal.find_subject(&subject_key).await? {
            Some(existing) => {
                info!(subject_id = %existing, "Subject record already created; skipping");
                existing
            }
            None => {
                let record = SubjectRecord {
                    session_id: session.id,
                    idempotency_key: subject_key.clone(),
                    fields: fields.clone(),
                };
                match self.persistence.create_subject(&record).await {
                    Ok(id) => {
                        self.record(
                            journal,
                            session,
                            SessionEventKind::SubjectCreated {
                                idempotency_key: subject_key.clone(),
                                subject_id: id,
                            },
                        )
                        .await?;
                        id
                    }
                    Err(e) => {
                        // Nothing was persisted; the session stays active
                        // and the whole submit can simply be re-issued.
                        self.record(
                            journal,
                            session,
                            SessionEventKind::SubmissionFailed {
                                stage: "subject".to_string(),
                                error: e.to_string(),
                            },
                        )
                        .await?;
                        return Err(SubmitError::SubjectRecord(e));
                    }
                }
            }
        };

        // Step three: the submission record referencing the subject.
        let summary = derive_summary(session, definition);
        let priority = derive_priority(session, definition, &self.policy);
        let record = SubmissionRecord {
            session_id: session.id,
            subject_id,
            idempotency_key: idempotency_key(session.id, "submission", &payload),
            fields,
            summary: summary.clone(),
            priority,
        };

        match self.persistence.create_submission(&record).await {
            Ok(submission_id) => {
                self.record(
                    journal,
                    session,
                    SessionEventKind::SubmissionCreated { submission_id },
                )
                .await?;
                self.record(journal, session, SessionEventKind::SessionSubmitted)
                    .await?;

                info!(%subject_id, %submission_id, ?priority, "Intake submitted");
                Ok(SubmissionReceipt {
                    subject_id,
                    submission_id,
                    summary,
                    priority,
                })
            }
            Err(e) => {
                // The subject record exists but the submission does not;
                // surface this distinctly and keep the subject id in the
                // journal so a retry skips step two.
                error!(%subject_id, error = %e, "Submission record failed after subject creation");
                self.record(
                    journal,
                    session,
                    SessionEventKind::SubmissionFailed {
                        stage: "submission".to_string(),
                        error: e.to_string(),
                    },
                )
                .await?;
                self.record(
                    journal,
                    session,
                    SessionEventKind::SessionFailed {
                        error: e.to_string(),
                    },
                )
                .await?;

                Err(SubmitError::SubmissionRecord {
                    subject_id,
                    source: e,
                })
            }
        }
    }

    /// Re-check the session against the gate.
    ///
    /// This deliberately re-runs coercion on stored values so the dialog's
    /// advancement guard and the final submit gate cannot silently drift
    /// apart.
    fn validate(
        &self,
        session: &Session,
        definition: &IntakeDefinition,
    ) -> Result<(), SubmitError> {
        if self.policy.min_completion_percent >= 100 {
            let missing = nonconformant_required(session, definition);
            if !missing.is_empty() {
                return Err(SubmitError::ValidationFailed { missing });
            }
            return Ok(());
        }

        // Lenient flow: gate on the completion threshold, but values that
        // are present must still conform.
        let completion = session.completion_percent(definition);
        if completion < self.policy.min_completion_percent {
            return Err(SubmitError::BelowThreshold {
                completion,
                minimum: self.policy.min_completion_percent,
            });
        }

        let filled_nonconformant: Vec<String> = definition
            .fields
            .iter()
            .filter(|f| session.is_filled(&f.name))
            .filter(|f| {
                session
                    .slot(&f.name)
                    .map(|s| coerce(&s.value, f).is_err())
                    .unwrap_or(false)
            })
            .map(|f| f.name.clone())
            .collect();

        if !filled_nonconformant.is_empty() {
            return Err(SubmitError::ValidationFailed {
                missing: filled_nonconformant,
            });
        }

        Ok(())
    }

    async fn record(
        &self,
        journal: &SessionJournal,
        session: &mut Session,
        kind: SessionEventKind,
    ) -> Result<(), JournalError> {
        let event = SessionEvent::new(session.id, kind);
        journal.append(&event).await?;
        session.apply_event(&event);
        Ok(())
    }
}

/// Required fields that are missing, empty, or no longer coerce into
/// their data type
pub fn nonconformant_required(session: &Session, definition: &IntakeDefinition) -> Vec<String> {
    definition
        .required_fields()
        .iter()
        .filter(|f| match session.slot(&f.name) {
            Some(slot) => coerce(&slot.value, f).is_err(),
            None => true,
        })
        .map(|f| f.name.clone())
        .collect()
}

/// Deterministic one-line summary for the submission record
fn derive_summary(session: &Session, definition: &IntakeDefinition) -> String {
    // Display name: the first two filled text fields of the first category.
    let who = definition
        .categories
        .first()
        .map(|category| {
            definition
                .fields_in_category(&category.key)
                .into_iter()
                .filter(|f| f.data_type == DataType::Text)
                .filter_map(|f| session.slot(&f.name))
                .map(|s| s.value.as_str())
                .take(2)
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default();

    let who = if who.trim().is_empty() {
        format!("Intake {}", &session.id.to_string()[..8])
    } else {
        who
    };

    // Lead concern: the first filled long-text field, truncated.
    let concern = definition
        .fields
        .iter()
        .filter(|f| f.data_type == DataType::LongText)
        .filter_map(|f| session.slot(&f.name))
        .map(|s| s.value.as_str())
        .next();

    match concern {
        Some(text) => {
            let clipped: String = text.chars().take(80).collect();
            format!("{}: {}", who, clipped)
        }
        None => who,
    }
}

/// Priority from the definition's severity-scale field, if present
fn derive_priority(
    session: &Session,
    definition: &IntakeDefinition,
    policy: &SubmissionPolicy,
) -> Priority {
    let severity = definition
        .severity_field
        .as_deref()
        .and_then(|name| session.slot(name))
        .and_then(|slot| slot.value.trim().parse::<f64>().ok());

    match severity {
        Some(level) if level >= policy.severity_high => Priority::High,
        Some(level) if level >= policy.severity_medium => Priority::Medium,
        _ => Priority::Normal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::catalog::{Category, FieldSpec};
    use crate::domain::session::{DialogMode, SlotValue, ValueSource};
    use chrono::Utc;

    fn definition() -> IntakeDefinition {
        IntakeDefinition {
            name: "test".to_string(),
            description: String::new(),
            categories: vec![Category {
                key: "main".to_string(),
                title: "Main".to_string(),
            }],
            fields: vec![
                FieldSpec {
                    name: "first_name".to_string(),
                    label: "first name".to_string(),
                    data_type: DataType::Text,
                    required: true,
                    category: "main".to_string(),
                    options: vec![],
                    prompt: None,
                },
                FieldSpec {
                    name: "last_name".to_string(),
                    label: "last name".to_string(),
                    data_type: DataType::Text,
                    required: true,
                    category: "main".to_string(),
                    options: vec![],
                    prompt: None,
                },
                FieldSpec {
                    name: "chief_complaint".to_string(),
                    label: "main concern".to_string(),
                    data_type: DataType::LongText,
                    required: false,
                    category: "main".to_string(),
                    options: vec![],
                    prompt: None,
                },
                FieldSpec {
                    name: "pain_level".to_string(),
                    label: "pain level".to_string(),
                    data_type: DataType::Text,
                    required: false,
                    category: "main".to_string(),
                    options: vec![],
                    prompt: None,
                },
            ],
            severity_field: Some("pain_level".to_string()),
        }
    }

    fn session_with(values: &[(&str, &str)]) -> Session {
        let mut session =
            Session::new(Uuid::new_v4(), "test".to_string(), DialogMode::Stepwise);
        for (name, value) in values {
            session.slots.insert(
                name.to_string(),
                SlotValue {
                    field_name: name.to_string(),
                    value: value.to_string(),
                    source: ValueSource::Typed,
                    confidence: None,
                    updated_at: Utc::now(),
                },
            );
        }
        session
    }

    #[test]
    fn test_nonconformant_required_lists_missing() {
        let def = definition();
        let session = session_with(&[("first_name", "Jane")]);

        let missing = nonconformant_required(&session, &def);
        assert_eq!(missing, vec!["last_name".to_string()]);
    }

    #[test]
    fn test_derive_summary_uses_name_and_concern() {
        let def = definition();
        let session = session_with(&[
            ("first_name", "Jane"),
            ("last_name", "Doe"),
            ("chief_complaint", "knee pain after a fall"),
        ]);

        assert_eq!(
            derive_summary(&session, &def),
            "Jane Doe: knee pain after a fall"
        );
    }

    #[test]
    fn test_derive_summary_without_name_uses_session_id() {
        let def = definition();
        let session = session_with(&[]);

        let summary = derive_summary(&session, &def);
        assert!(summary.starts_with("Intake "));
    }

    #[test]
    fn test_priority_thresholds() {
        let def = definition();
        let policy = SubmissionPolicy::default();

        let high = session_with(&[("pain_level", "8")]);
        assert_eq!(derive_priority(&high, &def, &policy), Priority::High);

        let medium = session_with(&[("pain_level", "5")]);
        assert_eq!(derive_priority(&medium, &def, &policy), Priority::Medium);

        let normal = session_with(&[("pain_level", "3")]);
        assert_eq!(derive_priority(&normal, &def, &policy), Priority::Normal);

        let unset = session_with(&[]);
        assert_eq!(derive_priority(&unset, &def, &policy), Priority::Normal);

        let unparsable = session_with(&[("pain_level", "pretty bad")]);
        assert_eq!(derive_priority(&unparsable, &def, &policy), Priority::Normal);
    }
}
