//! Slot merge policy and type coercion.
//!
//! Extraction results arrive as partial, best-effort candidate values.
//! The merge decides which candidates become accepted slot values:
//! unset fields accept unconditionally; set fields are only overwritten
//! by a candidate whose confidence dominates the existing value. Values
//! without a confidence score (typed input, raw fallback) rank maximal,
//! so a low-confidence misheard correction can never clobber a
//! confidently typed answer.
//!
//! Every accepted write is coerced into the field's data type first; a
//! coercion failure rejects that single write and never aborts the
//! session.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::adapters::ExtractionResult;
use crate::domain::catalog::{DataType, FieldSpec, IntakeDefinition};
use crate::domain::session::{Session, SlotValue, ValueSource};

/// Why a candidate value was not coerced into its field's type
#[derive(Debug, Clone, Error)]
pub enum CoercionError {
    #[error("value is empty")]
    Empty,

    #[error("not a valid email address")]
    Email,

    #[error("phone numbers need 7 to 15 digits")]
    Phone,

    #[error("'{0}' is not one of the allowed options")]
    UnknownOption(String),

    #[error("unrecognized date format")]
    Date,
}

/// Tunable merge behavior.
///
/// The dominance comparison is an inferred product heuristic, not a hard
/// law, so both knobs are configuration rather than constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergePolicy {
    /// Effective confidence assigned to values that carry none (typed
    /// input, raw-transcript fallback)
    #[serde(default = "default_typed_trust")]
    pub typed_trust: f64,

    /// How much a new candidate must exceed the existing value's
    /// confidence by; zero means ties go to the newer value
    #[serde(default)]
    pub overwrite_margin: f64,
}

fn default_typed_trust() -> f64 {
    1.0
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self {
            typed_trust: default_typed_trust(),
            overwrite_margin: 0.0,
        }
    }
}

/// A candidate write the merge turned away
#[derive(Debug, Clone)]
pub struct RejectedWrite {
    pub field: String,
    pub value: String,
    pub reason: String,
}

/// What a merge pass accepted and rejected
#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    pub accepted: Vec<SlotValue>,
    pub rejected: Vec<RejectedWrite>,
}

impl MergeOutcome {
    /// True when nothing was accepted
    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty()
    }
}

/// Apply one extraction result against the session's current slots.
///
/// Pure with respect to the session: the outcome lists the writes; the
/// dialog engine journals and applies them as events.
pub fn merge_extraction(
    session: &Session,
    definition: &IntakeDefinition,
    result: &ExtractionResult,
    policy: &MergePolicy,
) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();

    for (field_name, candidate) in &result.values {
        let spec = match definition.field(field_name) {
            Some(spec) => spec,
            None => {
                outcome.rejected.push(RejectedWrite {
                    field: field_name.clone(),
                    value: candidate.value.clone(),
                    reason: "not a field of this intake".to_string(),
                });
                continue;
            }
        };

        let coerced = match coerce(&candidate.value, spec) {
            Ok(v) => v,
            Err(e) => {
                outcome.rejected.push(RejectedWrite {
                    field: field_name.clone(),
                    value: candidate.value.clone(),
                    reason: e.to_string(),
                });
                continue;
            }
        };

        if let Some(existing) = session.slot(field_name) {
            let existing_rank = existing.effective_confidence(policy.typed_trust);
            let dominates = candidate
                .confidence
                .map(|c| c >= existing_rank + policy.overwrite_margin)
                .unwrap_or(false);

            if !dominates {
                outcome.rejected.push(RejectedWrite {
                    field: field_name.clone(),
                    value: candidate.value.clone(),
                    reason: format!(
                        "confidence {} does not outrank existing value ({})",
                        candidate
                            .confidence
                            .map(|c| c.to_string())
                            .unwrap_or_else(|| "none".to_string()),
                        existing_rank
                    ),
                });
                continue;
            }
        }

        outcome.accepted.push(SlotValue {
            field_name: field_name.clone(),
            value: coerced,
            source: ValueSource::VoiceExtracted,
            confidence: candidate.confidence,
            updated_at: Utc::now(),
        });
    }

    outcome
}

/// Store the raw transcript into a targeted field when extraction found
/// nothing. Only valid in per-field voice mode; still type-coerced.
pub fn raw_fallback(
    transcript: &str,
    spec: &FieldSpec,
) -> Result<SlotValue, RejectedWrite> {
    match coerce(transcript, spec) {
        Ok(value) => Ok(SlotValue {
            field_name: spec.name.clone(),
            value,
            source: ValueSource::VoiceRaw,
            confidence: None,
            updated_at: Utc::now(),
        }),
        Err(e) => Err(RejectedWrite {
            field: spec.name.clone(),
            value: transcript.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// A deliberate typed write: coerced, then accepted unconditionally
pub fn typed_write(value: &str, spec: &FieldSpec) -> Result<SlotValue, RejectedWrite> {
    match coerce(value, spec) {
        Ok(coerced) => Ok(SlotValue {
            field_name: spec.name.clone(),
            value: coerced,
            source: ValueSource::Typed,
            confidence: None,
            updated_at: Utc::now(),
        }),
        Err(e) => Err(RejectedWrite {
            field: spec.name.clone(),
            value: value.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Coerce a raw string into a field's data type.
///
/// Returns the canonical stored form; failure leaves the caller's prior
/// value untouched.
pub fn coerce(raw: &str, spec: &FieldSpec) -> Result<String, CoercionError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CoercionError::Empty);
    }

    match spec.data_type {
        DataType::Text | DataType::LongText => Ok(trimmed.to_string()),

        DataType::Email => {
            let mut parts = trimmed.splitn(2, '@');
            let local = parts.next().unwrap_or("");
            let domain = parts.next().unwrap_or("");
            if local.is_empty()
                || domain.is_empty()
                || !domain.contains('.')
                || domain.ends_with('.')
                || trimmed.chars().any(char::is_whitespace)
                || trimmed.matches('@').count() != 1
            {
                return Err(CoercionError::Email);
            }
            Ok(trimmed.to_string())
        }

        DataType::Phone => {
            let plus = trimmed.starts_with('+');
            let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
            let separators_only = trimmed
                .chars()
                .all(|c| c.is_ascii_digit() || "+-(). ".contains(c));
            if !separators_only || !(7..=15).contains(&digits.len()) {
                return Err(CoercionError::Phone);
            }
            Ok(if plus { format!("+{}", digits) } else { digits })
        }

        DataType::Enumerated => spec
            .options
            .iter()
            .find(|opt| opt.eq_ignore_ascii_case(trimmed))
            .cloned()
            .ok_or_else(|| CoercionError::UnknownOption(trimmed.to_string())),

        DataType::Date => {
            let cleaned = trimmed.replace(',', "");
            for format in ["%Y-%m-%d", "%m/%d/%Y", "%B %d %Y"] {
                if let Ok(date) = NaiveDate::parse_from_str(&cleaned, format) {
                    return Ok(date.format("%Y-%m-%d").to_string());
                }
            }
            Err(CoercionError::Date)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ExtractedValue;
    use crate::domain::session::DialogMode;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn spec(name: &str, data_type: DataType) -> FieldSpec {
        FieldSpec {
            name: name.to_string(),
            label: name.replace('_', " "),
            data_type,
            required: true,
            category: "main".to_string(),
            options: vec![],
            prompt: None,
        }
    }

    fn definition(fields: Vec<FieldSpec>) -> IntakeDefinition {
        IntakeDefinition {
            name: "test".to_string(),
            description: String::new(),
            categories: vec![crate::domain::catalog::Category {
                key: "main".to_string(),
                title: "Main".to_string(),
            }],
            fields,
            severity_field: None,
        }
    }

    fn result_with(entries: &[(&str, &str, Option<f64>)]) -> ExtractionResult {
        let mut values = BTreeMap::new();
        for (name, value, confidence) in entries {
            values.insert(
                name.to_string(),
                ExtractedValue {
                    value: value.to_string(),
                    confidence: *confidence,
                },
            );
        }
        ExtractionResult { values }
    }

    #[test]
    fn test_unset_field_accepts_unconditionally() {
        let def = definition(vec![spec("first_name", DataType::Text)]);
        let session = Session::new(Uuid::new_v4(), "test".to_string(), DialogMode::Stepwise);

        let outcome = merge_extraction(
            &session,
            &def,
            &result_with(&[("first_name", "Jane", Some(0.1))]),
            &MergePolicy::default(),
        );

        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.accepted[0].value, "Jane");
        assert_eq!(outcome.accepted[0].source, ValueSource::VoiceExtracted);
    }

    #[test]
    fn test_low_confidence_never_beats_typed() {
        let def = definition(vec![spec("first_name", DataType::Text)]);
        let mut session = Session::new(Uuid::new_v4(), "test".to_string(), DialogMode::Stepwise);
        let typed = typed_write("Jane", def.field("first_name").unwrap()).unwrap();
        session.slots.insert(typed.field_name.clone(), typed);

        let outcome = merge_extraction(
            &session,
            &def,
            &result_with(&[("first_name", "Jane", Some(0.4))]),
            &MergePolicy::default(),
        );

        assert!(outcome.accepted.is_empty());
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(outcome.rejected[0].field, "first_name");
    }

    #[test]
    fn test_higher_confidence_overwrites_lower() {
        let def = definition(vec![spec("first_name", DataType::Text)]);
        let mut session = Session::new(Uuid::new_v4(), "test".to_string(), DialogMode::Stepwise);
        session.slots.insert(
            "first_name".to_string(),
            SlotValue {
                field_name: "first_name".to_string(),
                value: "Joan".to_string(),
                source: ValueSource::VoiceExtracted,
                confidence: Some(0.5),
                updated_at: Utc::now(),
            },
        );

        let outcome = merge_extraction(
            &session,
            &def,
            &result_with(&[("first_name", "Jane", Some(0.9))]),
            &MergePolicy::default(),
        );

        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.accepted[0].value, "Jane");
    }

    #[test]
    fn test_equal_confidence_ties_go_to_newer() {
        let def = definition(vec![spec("first_name", DataType::Text)]);
        let mut session = Session::new(Uuid::new_v4(), "test".to_string(), DialogMode::Stepwise);
        session.slots.insert(
            "first_name".to_string(),
            SlotValue {
                field_name: "first_name".to_string(),
                value: "Joan".to_string(),
                source: ValueSource::VoiceExtracted,
                confidence: Some(0.7),
                updated_at: Utc::now(),
            },
        );

        let outcome = merge_extraction(
            &session,
            &def,
            &result_with(&[("first_name", "Jane", Some(0.7))]),
            &MergePolicy::default(),
        );

        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.accepted[0].value, "Jane");
    }

    #[test]
    fn test_missing_confidence_cannot_overwrite() {
        let def = definition(vec![spec("first_name", DataType::Text)]);
        let mut session = Session::new(Uuid::new_v4(), "test".to_string(), DialogMode::Stepwise);
        session.slots.insert(
            "first_name".to_string(),
            SlotValue {
                field_name: "first_name".to_string(),
                value: "Joan".to_string(),
                source: ValueSource::VoiceExtracted,
                confidence: Some(0.2),
                updated_at: Utc::now(),
            },
        );

        let outcome = merge_extraction(
            &session,
            &def,
            &result_with(&[("first_name", "Jane", None)]),
            &MergePolicy::default(),
        );

        assert!(outcome.accepted.is_empty());
    }

    #[test]
    fn test_coercion_failure_rejects_single_write() {
        let def = definition(vec![
            spec("contact_email", DataType::Email),
            spec("first_name", DataType::Text),
        ]);
        let session = Session::new(Uuid::new_v4(), "test".to_string(), DialogMode::Stepwise);

        let outcome = merge_extraction(
            &session,
            &def,
            &result_with(&[
                ("contact_email", "not an email", Some(0.9)),
                ("first_name", "Jane", Some(0.9)),
            ]),
            &MergePolicy::default(),
        );

        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.accepted[0].field_name, "first_name");
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(outcome.rejected[0].field, "contact_email");
    }

    #[test]
    fn test_unknown_field_rejected() {
        let def = definition(vec![spec("first_name", DataType::Text)]);
        let session = Session::new(Uuid::new_v4(), "test".to_string(), DialogMode::Stepwise);

        let outcome = merge_extraction(
            &session,
            &def,
            &result_with(&[("favorite_color", "blue", Some(0.9))]),
            &MergePolicy::default(),
        );

        assert!(outcome.accepted.is_empty());
        assert_eq!(outcome.rejected[0].field, "favorite_color");
    }

    #[test]
    fn test_raw_fallback_is_coerced() {
        let text_spec = spec("chief_complaint", DataType::LongText);
        let slot = raw_fallback("my knee has been hurting", &text_spec).unwrap();
        assert_eq!(slot.source, ValueSource::VoiceRaw);
        assert_eq!(slot.confidence, None);

        let email_spec = spec("contact_email", DataType::Email);
        assert!(raw_fallback("my knee has been hurting", &email_spec).is_err());
    }

    #[test]
    fn test_coerce_phone() {
        let s = spec("phone", DataType::Phone);
        assert_eq!(coerce("(555) 867-5309", &s).unwrap(), "5558675309");
        assert_eq!(coerce("+1 555 867 5309", &s).unwrap(), "+15558675309");
        assert!(coerce("call me maybe", &s).is_err());
        assert!(coerce("123", &s).is_err());
    }

    #[test]
    fn test_coerce_email() {
        let s = spec("contact_email", DataType::Email);
        assert_eq!(
            coerce(" jane@example.com ", &s).unwrap(),
            "jane@example.com"
        );
        assert!(coerce("jane@", &s).is_err());
        assert!(coerce("jane at example.com", &s).is_err());
        assert!(coerce("a@b@c.com", &s).is_err());
    }

    #[test]
    fn test_coerce_date_to_iso() {
        let s = spec("date_of_birth", DataType::Date);
        assert_eq!(coerce("1990-04-12", &s).unwrap(), "1990-04-12");
        assert_eq!(coerce("04/12/1990", &s).unwrap(), "1990-04-12");
        assert_eq!(coerce("April 12, 1990", &s).unwrap(), "1990-04-12");
        assert!(coerce("last spring", &s).is_err());
    }

    #[test]
    fn test_coerce_enumerated_canonicalizes() {
        let mut s = spec("plan_type", DataType::Enumerated);
        s.options = vec!["HMO".to_string(), "PPO".to_string()];
        assert_eq!(coerce("ppo", &s).unwrap(), "PPO");
        assert!(coerce("gold plan", &s).is_err());
    }
}
