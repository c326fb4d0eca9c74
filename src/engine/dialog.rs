//! Dialog state machine: turn handling, category traversal, prompting.
//!
//! The engine takes the session by mutable reference across every await,
//! so no two gateway calls for the same session can be in flight and every
//! merge runs against settled state. Turn ordering is structural: the user
//! turn is journaled before extraction, the system turn only after merge
//! and prompt computation complete.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::adapters::{ExtractionGateway, ExtractionRequest, FieldSchema};
use crate::domain::catalog::{FieldSpec, IntakeDefinition};
use crate::domain::session::{DialogMode, Session};
use crate::domain::{SessionEvent, SessionEventKind, SlotValue};

use super::journal::SessionJournal;
use super::merge::{self, MergeOutcome, MergePolicy, RejectedWrite};
use super::prompts;

/// What one dialog step produced
#[derive(Debug)]
pub struct DialogOutcome {
    /// The next system prompt, already appended to the transcript
    pub prompt: String,

    /// Slot writes accepted this step
    pub accepted: Vec<SlotValue>,

    /// Slot writes rejected this step
    pub rejected: Vec<RejectedWrite>,

    /// Derived completion after the step
    pub completion_percent: u8,

    /// Whether every required field everywhere is satisfied
    pub ready_to_submit: bool,

    /// The extraction gateway failed; the step degraded to no slot
    /// updates (or the raw-transcript fallback in targeted mode)
    pub extraction_failed: bool,
}

/// The dialog engine for one intake definition
pub struct DialogEngine {
    definition: Arc<IntakeDefinition>,
    extraction: Box<dyn ExtractionGateway>,
    policy: MergePolicy,
    mode: DialogMode,
}

impl DialogEngine {
    /// Create an engine over a validated definition
    pub fn new(
        definition: Arc<IntakeDefinition>,
        extraction: Box<dyn ExtractionGateway>,
        policy: MergePolicy,
        mode: DialogMode,
    ) -> Self {
        Self {
            definition,
            extraction,
            policy,
            mode,
        }
    }

    /// The definition this engine runs against
    pub fn definition(&self) -> &IntakeDefinition {
        &self.definition
    }

    /// Open a fresh session: journal the start event and the opening
    /// prompt, and return both the session and the prompt.
    pub async fn open_session(
        &self,
        session_id: Uuid,
        journal: &SessionJournal,
    ) -> Result<(Session, DialogOutcome)> {
        let mut session = Session::new(
            session_id,
            self.definition.name.clone(),
            self.mode,
        );

        self.record(
            journal,
            &mut session,
            SessionEventKind::SessionStarted {
                definition: self.definition.name.clone(),
                mode: self.mode,
            },
        )
        .await?;

        // A leading category with no required fields would stall the
        // opening prompt on nothing; skip past it.
        self.advance(journal, &mut session).await?;

        let prompt = prompts::greeting(
            &self.definition,
            session.current_category,
            &self.scoped_missing(&session),
        );
        self.record(
            journal,
            &mut session,
            SessionEventKind::SystemTurn {
                text: prompt.clone(),
            },
        )
        .await?;

        let outcome = self.outcome(&session, prompt, MergeOutcome::default(), false);
        Ok((session, outcome))
    }

    /// Handle one transcribed utterance in conversational mode.
    ///
    /// Extraction failures degrade to a re-prompt with no slot updates;
    /// they never abort the session.
    #[instrument(skip(self, session, journal, text), fields(session = %session.id))]
    pub async fn handle_transcript(
        &self,
        session: &mut Session,
        journal: &SessionJournal,
        text: &str,
    ) -> Result<DialogOutcome> {
        self.ensure_active(session)?;

        self.record(
            journal,
            session,
            SessionEventKind::UserTurn {
                text: text.to_string(),
            },
        )
        .await?;

        let scope = self.extraction_scope(session);
        let request = self.build_request(session, text, &scope);

        let (result, extraction_failed) = match self.extraction.extract(&request).await {
            Ok(result) => (result, false),
            Err(e) => {
                warn!(error = %e, "Extraction failed; continuing without slot updates");
                (Default::default(), true)
            }
        };

        let outcome = merge::merge_extraction(session, &self.definition, &result, &self.policy);
        self.apply_merge(journal, session, &outcome).await?;
        self.finish_step(journal, session, outcome, extraction_failed)
            .await
    }

    /// Handle a transcribed utterance targeted at one specific field
    /// (per-field voice input).
    ///
    /// When extraction fails or finds nothing, the raw transcript is
    /// stored into the targeted field, still type-coerced.
    #[instrument(skip(self, session, journal, text), fields(session = %session.id))]
    pub async fn handle_field_transcript(
        &self,
        session: &mut Session,
        journal: &SessionJournal,
        field: &str,
        text: &str,
    ) -> Result<DialogOutcome> {
        self.ensure_active(session)?;

        let spec = self
            .definition
            .field(field)
            .with_context(|| format!("Unknown field: {}", field))?;

        self.record(
            journal,
            session,
            SessionEventKind::UserTurn {
                text: text.to_string(),
            },
        )
        .await?;

        let scope = vec![spec];
        let request = self.build_request(session, text, &scope);

        let (result, extraction_failed) = match self.extraction.extract(&request).await {
            Ok(result) => (result, false),
            Err(e) => {
                warn!(error = %e, "Extraction failed; falling back to raw transcript");
                (Default::default(), true)
            }
        };

        let outcome = if result.is_empty() {
            // Targeted fallback: the utterance itself becomes the value.
            let mut outcome = MergeOutcome::default();
            match merge::raw_fallback(text, spec) {
                Ok(slot) => outcome.accepted.push(slot),
                Err(rejected) => outcome.rejected.push(rejected),
            }
            outcome
        } else {
            merge::merge_extraction(session, &self.definition, &result, &self.policy)
        };

        self.apply_merge(journal, session, &outcome).await?;
        self.finish_step(journal, session, outcome, extraction_failed)
            .await
    }

    /// Handle a deliberate typed write into one field
    #[instrument(skip(self, session, journal, value), fields(session = %session.id))]
    pub async fn handle_typed(
        &self,
        session: &mut Session,
        journal: &SessionJournal,
        field: &str,
        value: &str,
    ) -> Result<DialogOutcome> {
        self.ensure_active(session)?;

        let spec = self
            .definition
            .field(field)
            .with_context(|| format!("Unknown field: {}", field))?;

        let mut outcome = MergeOutcome::default();
        match merge::typed_write(value, spec) {
            Ok(slot) => outcome.accepted.push(slot),
            Err(rejected) => outcome.rejected.push(rejected),
        }

        self.apply_merge(journal, session, &outcome).await?;
        self.finish_step(journal, session, outcome, false).await
    }

    fn ensure_active(&self, session: &Session) -> Result<()> {
        if !session.is_active() {
            anyhow::bail!("Session {} no longer accepts input", session.id);
        }
        Ok(())
    }

    /// Fields sent to the extraction service: the current category in
    /// stepwise mode (scoping reduces ambiguity), the whole catalog in
    /// free-form mode.
    fn extraction_scope(&self, session: &Session) -> Vec<&FieldSpec> {
        match self.mode {
            DialogMode::Stepwise => {
                match self.definition.category_at(session.current_category) {
                    Some(category) => self.definition.fields_in_category(&category.key),
                    None => self.definition.fields.iter().collect(),
                }
            }
            DialogMode::FreeForm => self.definition.fields.iter().collect(),
        }
    }

    fn build_request(
        &self,
        session: &Session,
        transcript: &str,
        scope: &[&FieldSpec],
    ) -> ExtractionRequest {
        let existing: BTreeMap<String, String> = session
            .slots
            .iter()
            .map(|(name, slot)| (name.clone(), slot.value.clone()))
            .collect();

        ExtractionRequest {
            transcript: transcript.to_string(),
            fields: scope.iter().map(|s| FieldSchema::from(*s)).collect(),
            existing,
        }
    }

    /// Journal and apply the merge outcome's slot events
    async fn apply_merge(
        &self,
        journal: &SessionJournal,
        session: &mut Session,
        outcome: &MergeOutcome,
    ) -> Result<()> {
        for slot in &outcome.accepted {
            self.record(
                journal,
                session,
                SessionEventKind::SlotAccepted { slot: slot.clone() },
            )
            .await?;
        }

        for rejected in &outcome.rejected {
            debug!(
                field = %rejected.field,
                reason = %rejected.reason,
                "Slot write rejected"
            );
            self.record(
                journal,
                session,
                SessionEventKind::SlotRejected {
                    field: rejected.field.clone(),
                    value: rejected.value.clone(),
                    reason: rejected.reason.clone(),
                },
            )
            .await?;
        }

        Ok(())
    }

    /// Advance the category pointer, compute the next prompt from the
    /// post-merge state, and journal the system turn.
    async fn finish_step(
        &self,
        journal: &SessionJournal,
        session: &mut Session,
        outcome: MergeOutcome,
        extraction_failed: bool,
    ) -> Result<DialogOutcome> {
        let advanced_from = self.advance(journal, session).await?;
        let prompt = self.next_prompt(session, advanced_from);

        self.record(
            journal,
            session,
            SessionEventKind::SystemTurn {
                text: prompt.clone(),
            },
        )
        .await?;

        Ok(self.outcome(session, prompt, outcome, extraction_failed))
    }

    /// Stepwise: move forward while the current category has no missing
    /// required fields. Returns the index advancement started from, if
    /// any movement happened.
    async fn advance(
        &self,
        journal: &SessionJournal,
        session: &mut Session,
    ) -> Result<Option<usize>> {
        if self.mode != DialogMode::Stepwise {
            return Ok(None);
        }

        let started_at = session.current_category;
        let last = self.definition.categories.len().saturating_sub(1);

        while session.current_category < last {
            let category = match self.definition.category_at(session.current_category) {
                Some(c) => c,
                None => break,
            };
            if !session
                .missing_required_in(&self.definition, &category.key)
                .is_empty()
            {
                break;
            }

            let next = session.current_category + 1;
            self.record(
                journal,
                session,
                SessionEventKind::CategoryAdvanced { index: next },
            )
            .await?;
        }

        if session.current_category > started_at {
            Ok(Some(started_at))
        } else {
            Ok(None)
        }
    }

    /// Deterministic next prompt, reproducible from session state alone
    fn next_prompt(&self, session: &Session, advanced_from: Option<usize>) -> String {
        let missing_all = session.missing_required(&self.definition);
        if missing_all.is_empty() {
            return prompts::completion_prompt();
        }

        match self.mode {
            DialogMode::FreeForm => {
                prompts::freeform_missing_prompt(&self.definition, &missing_all)
            }
            DialogMode::Stepwise => {
                let missing_here = self.scoped_missing(session);

                match advanced_from.and_then(|from| {
                    let completed = self.definition.category_at(from)?;
                    let current = self.definition.category_at(session.current_category)?;
                    Some((completed, current))
                }) {
                    Some((completed, current)) => {
                        prompts::transition_prompt(completed, current, &missing_here)
                    }
                    None => prompts::missing_prompt(&missing_here),
                }
            }
        }
    }

    /// Missing required fields in the prompt scope for the current mode
    fn scoped_missing<'a>(&'a self, session: &Session) -> Vec<&'a FieldSpec> {
        match self.mode {
            DialogMode::Stepwise => match self.definition.category_at(session.current_category) {
                Some(category) => session.missing_required_in(&self.definition, &category.key),
                None => session.missing_required(&self.definition),
            },
            DialogMode::FreeForm => session.missing_required(&self.definition),
        }
    }

    fn outcome(
        &self,
        session: &Session,
        prompt: String,
        merge: MergeOutcome,
        extraction_failed: bool,
    ) -> DialogOutcome {
        DialogOutcome {
            prompt,
            accepted: merge.accepted,
            rejected: merge.rejected,
            completion_percent: session.completion_percent(&self.definition),
            ready_to_submit: session.is_ready_to_submit(&self.definition),
            extraction_failed,
        }
    }

    /// Append an event to the journal, then apply it to the session.
    ///
    /// Keeping this the single mutation path guarantees that replaying
    /// the journal reproduces the live session.
    async fn record(
        &self,
        journal: &SessionJournal,
        session: &mut Session,
        kind: SessionEventKind,
    ) -> Result<()> {
        let event = SessionEvent::new(session.id, kind);
        journal.append(&event).await.context("Failed to journal event")?;
        session.apply_event(&event);
        Ok(())
    }
}
