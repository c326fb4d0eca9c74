//! Session state and reconstruction from events.
//!
//! A Session is an explicit, serializable value owned by the engine and
//! passed through transition functions, so tests can construct arbitrary
//! states without driving a UI. All mutations go through `apply_event`;
//! replaying a journal reproduces the session exactly.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::catalog::{FieldSpec, IntakeDefinition};
use super::events::{SessionEvent, SessionEventKind};

/// Who produced a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    System,
    User,
}

/// One entry in the append-only conversation transcript
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// How a slot value entered the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValueSource {
    /// Entered directly through a form control
    Typed,

    /// Raw transcript stored without extraction (targeted-field fallback)
    VoiceRaw,

    /// Extracted from a transcript by the language-understanding gateway
    VoiceExtracted,
}

/// The currently accepted value for one field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotValue {
    /// Field this value belongs to
    pub field_name: String,

    /// The accepted, type-coerced value
    pub value: String,

    /// How the value entered the session
    pub source: ValueSource,

    /// Extraction confidence, present only for voice-extracted values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,

    /// When the value was accepted
    pub updated_at: DateTime<Utc>,
}

impl SlotValue {
    /// Effective confidence used by the merge policy: values without a
    /// confidence score (typed input, raw fallback) rank maximal.
    pub fn effective_confidence(&self, typed_trust: f64) -> f64 {
        self.confidence.unwrap_or(typed_trust)
    }
}

/// Dialog traversal mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogMode {
    /// Walk categories in fixed order; remain until required fields are met
    Stepwise,

    /// Any-order input; missing fields computed globally, grouped by
    /// category for phrasing only
    FreeForm,
}

impl Default for DialogMode {
    fn default() -> Self {
        Self::Stepwise
    }
}

/// Terminal state of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum SessionState {
    /// Accepting input
    Active,

    /// Persisted downstream; accepts no further input
    Submitted,

    /// Persistence failed after partial success
    Failed { error: String },
}

/// One intake in progress
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique identifier for this session
    pub id: Uuid,

    /// Name of the intake definition in use
    pub definition_name: String,

    /// Dialog traversal mode
    pub mode: DialogMode,

    /// Current state of the session
    pub state: SessionState,

    /// Index into the definition's category list; only ever advances
    pub current_category: usize,

    /// Accepted slot values keyed by field name
    pub slots: BTreeMap<String, SlotValue>,

    /// Append-only conversation transcript
    pub turns: Vec<ConversationTurn>,

    /// Identifier of the subject record once created downstream
    pub subject_id: Option<Uuid>,

    /// When the session started
    pub started_at: DateTime<Utc>,

    /// When the session reached a terminal state (if applicable)
    pub completed_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Create a new active session
    pub fn new(id: Uuid, definition_name: String, mode: DialogMode) -> Self {
        Self {
            id,
            definition_name,
            mode,
            state: SessionState::Active,
            current_category: 0,
            slots: BTreeMap::new(),
            turns: Vec::new(),
            subject_id: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Reconstruct session state from a sequence of events
    pub fn from_events(events: &[SessionEvent]) -> Option<Self> {
        let first = events.first()?;

        let mut session = Self {
            id: first.session_id,
            definition_name: String::new(),
            mode: DialogMode::default(),
            state: SessionState::Active,
            current_category: 0,
            slots: BTreeMap::new(),
            turns: Vec::new(),
            subject_id: None,
            started_at: first.timestamp,
            completed_at: None,
        };

        for event in events {
            session.apply_event(event);
        }

        Some(session)
    }

    /// Apply a single event to update session state
    pub fn apply_event(&mut self, event: &SessionEvent) {
        match &event.kind {
            SessionEventKind::SessionStarted { definition, mode } => {
                self.definition_name = definition.clone();
                self.mode = *mode;
                self.started_at = event.timestamp;
            }
            SessionEventKind::UserTurn { text } => {
                self.turns.push(ConversationTurn {
                    speaker: Speaker::User,
                    text: text.clone(),
                    timestamp: event.timestamp,
                });
            }
            SessionEventKind::SystemTurn { text } => {
                self.turns.push(ConversationTurn {
                    speaker: Speaker::System,
                    text: text.clone(),
                    timestamp: event.timestamp,
                });
            }
            SessionEventKind::SlotAccepted { slot } => {
                self.slots.insert(slot.field_name.clone(), slot.clone());
            }
            SessionEventKind::SlotRejected { .. } => {
                // Rejections never touch the slot map.
            }
            SessionEventKind::CategoryAdvanced { index } => {
                // The pointer only moves forward.
                if *index > self.current_category {
                    self.current_category = *index;
                }
            }
            SessionEventKind::SubjectCreated { subject_id, .. } => {
                self.subject_id = Some(*subject_id);
            }
            SessionEventKind::SubmissionCreated { .. } => {}
            SessionEventKind::SubmissionFailed { .. } => {}
            SessionEventKind::SessionSubmitted => {
                self.state = SessionState::Submitted;
                self.completed_at = Some(event.timestamp);
            }
            SessionEventKind::SessionFailed { error } => {
                self.state = SessionState::Failed {
                    error: error.clone(),
                };
                self.completed_at = Some(event.timestamp);
            }
        }
    }

    /// Check if the session still accepts input
    pub fn is_active(&self) -> bool {
        matches!(self.state, SessionState::Active)
    }

    /// Current value of a field, if any
    pub fn slot(&self, field_name: &str) -> Option<&SlotValue> {
        self.slots.get(field_name)
    }

    /// Required fields of one category that have no accepted value yet
    pub fn missing_required_in<'a>(
        &self,
        definition: &'a IntakeDefinition,
        category_key: &str,
    ) -> Vec<&'a FieldSpec> {
        definition
            .fields_in_category(category_key)
            .into_iter()
            .filter(|f| f.required && !self.is_filled(&f.name))
            .collect()
    }

    /// Required fields across the whole definition that are still missing,
    /// in definition order
    pub fn missing_required<'a>(&self, definition: &'a IntakeDefinition) -> Vec<&'a FieldSpec> {
        definition
            .required_fields()
            .into_iter()
            .filter(|f| !self.is_filled(&f.name))
            .collect()
    }

    /// Whether a field holds a non-empty accepted value
    pub fn is_filled(&self, field_name: &str) -> bool {
        self.slots
            .get(field_name)
            .map(|s| !s.value.trim().is_empty())
            .unwrap_or(false)
    }

    /// Derived completion metric: filled required fields over all required
    /// fields, rounded to a whole percent. Optional fields never count.
    ///
    /// This is a pure function of the slot map and the definition; it is
    /// never stored.
    pub fn completion_percent(&self, definition: &IntakeDefinition) -> u8 {
        let total = definition.required_count();
        if total == 0 {
            return 100;
        }

        let filled = definition
            .required_fields()
            .iter()
            .filter(|f| self.is_filled(&f.name))
            .count();

        ((100.0 * filled as f64 / total as f64).round()) as u8
    }

    /// Secondary richness metric blending optional-field completion with a
    /// dominant required-field weight. Never feeds the submission gate.
    ///
    /// The required weight is clamped to at least 0.8 so optional data can
    /// never mask missing mandatory data.
    pub fn richness_score(&self, definition: &IntakeDefinition, required_weight: f64) -> f64 {
        let weight = required_weight.clamp(0.8, 1.0);

        let required = definition.required_fields();
        let required_ratio = if required.is_empty() {
            1.0
        } else {
            required.iter().filter(|f| self.is_filled(&f.name)).count() as f64
                / required.len() as f64
        };

        let optional: Vec<_> = definition.fields.iter().filter(|f| !f.required).collect();
        let optional_ratio = if optional.is_empty() {
            1.0
        } else {
            optional.iter().filter(|f| self.is_filled(&f.name)).count() as f64
                / optional.len() as f64
        };

        weight * required_ratio + (1.0 - weight) * optional_ratio
    }

    /// Whether every required field across all categories is satisfied
    pub fn is_ready_to_submit(&self, definition: &IntakeDefinition) -> bool {
        self.missing_required(definition).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::catalog::{Category, DataType, FieldSpec};

    fn test_definition() -> IntakeDefinition {
        IntakeDefinition {
            name: "test".to_string(),
            description: String::new(),
            categories: vec![Category {
                key: "personal".to_string(),
                title: "Personal".to_string(),
            }],
            fields: vec![
                FieldSpec {
                    name: "first_name".to_string(),
                    label: "first name".to_string(),
                    data_type: DataType::Text,
                    required: true,
                    category: "personal".to_string(),
                    options: vec![],
                    prompt: None,
                },
                FieldSpec {
                    name: "nickname".to_string(),
                    label: "nickname".to_string(),
                    data_type: DataType::Text,
                    required: false,
                    category: "personal".to_string(),
                    options: vec![],
                    prompt: None,
                },
            ],
            severity_field: None,
        }
    }

    fn slot(name: &str, value: &str) -> SlotValue {
        SlotValue {
            field_name: name.to_string(),
            value: value.to_string(),
            source: ValueSource::Typed,
            confidence: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_session_creation() {
        let id = Uuid::new_v4();
        let session = Session::new(id, "test".to_string(), DialogMode::Stepwise);

        assert_eq!(session.id, id);
        assert!(session.is_active());
        assert_eq!(session.current_category, 0);
    }

    #[test]
    fn test_completion_percent_is_pure() {
        let def = test_definition();
        let mut session = Session::new(Uuid::new_v4(), "test".to_string(), DialogMode::Stepwise);

        assert_eq!(session.completion_percent(&def), 0);
        // Recomputing without writes yields the same result.
        assert_eq!(session.completion_percent(&def), 0);

        session
            .slots
            .insert("first_name".to_string(), slot("first_name", "Jane"));

        assert_eq!(session.completion_percent(&def), 100);
        assert_eq!(session.completion_percent(&def), 100);
    }

    #[test]
    fn test_optional_fields_never_block() {
        let def = test_definition();
        let mut session = Session::new(Uuid::new_v4(), "test".to_string(), DialogMode::Stepwise);

        session
            .slots
            .insert("first_name".to_string(), slot("first_name", "Jane"));

        // nickname is unset but the session is still complete.
        assert!(session.is_ready_to_submit(&def));
        assert_eq!(session.completion_percent(&def), 100);
    }

    #[test]
    fn test_richness_required_weight_dominates() {
        let def = test_definition();
        let mut session = Session::new(Uuid::new_v4(), "test".to_string(), DialogMode::Stepwise);

        // Only the optional field filled: richness must stay below what a
        // filled required field alone would score, even with a low weight
        // request (clamped to 0.8).
        session
            .slots
            .insert("nickname".to_string(), slot("nickname", "JJ"));
        let optional_only = session.richness_score(&def, 0.5);

        session.slots.clear();
        session
            .slots
            .insert("first_name".to_string(), slot("first_name", "Jane"));
        let required_only = session.richness_score(&def, 0.5);

        assert!(optional_only <= 0.2 + f64::EPSILON);
        assert!(required_only >= 0.8 - f64::EPSILON);
    }

    #[test]
    fn test_empty_value_is_not_filled() {
        let def = test_definition();
        let mut session = Session::new(Uuid::new_v4(), "test".to_string(), DialogMode::Stepwise);

        session
            .slots
            .insert("first_name".to_string(), slot("first_name", "   "));

        assert!(!session.is_filled("first_name"));
        assert_eq!(session.completion_percent(&def), 0);
    }

    #[test]
    fn test_from_events_replay() {
        let id = Uuid::new_v4();
        let events = vec![
            SessionEvent::new(
                id,
                SessionEventKind::SessionStarted {
                    definition: "test".to_string(),
                    mode: DialogMode::FreeForm,
                },
            ),
            SessionEvent::new(
                id,
                SessionEventKind::SystemTurn {
                    text: "Welcome".to_string(),
                },
            ),
            SessionEvent::new(
                id,
                SessionEventKind::UserTurn {
                    text: "Hi, I'm Jane".to_string(),
                },
            ),
            SessionEvent::new(
                id,
                SessionEventKind::SlotAccepted {
                    slot: slot("first_name", "Jane"),
                },
            ),
            SessionEvent::new(id, SessionEventKind::SessionSubmitted),
        ];

        let session = Session::from_events(&events).unwrap();

        assert_eq!(session.id, id);
        assert_eq!(session.definition_name, "test");
        assert_eq!(session.mode, DialogMode::FreeForm);
        assert_eq!(session.turns.len(), 2);
        assert_eq!(session.slot("first_name").unwrap().value, "Jane");
        assert_eq!(session.state, SessionState::Submitted);
        assert!(session.completed_at.is_some());
    }

    #[test]
    fn test_category_pointer_never_regresses() {
        let id = Uuid::new_v4();
        let mut session = Session::new(id, "test".to_string(), DialogMode::Stepwise);

        session.apply_event(&SessionEvent::new(
            id,
            SessionEventKind::CategoryAdvanced { index: 2 },
        ));
        assert_eq!(session.current_category, 2);

        session.apply_event(&SessionEvent::new(
            id,
            SessionEventKind::CategoryAdvanced { index: 1 },
        ));
        assert_eq!(session.current_category, 2);
    }
}
