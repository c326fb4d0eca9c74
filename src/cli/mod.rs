//! Command-line interface for the intake engine.
//!
//! A host-layer driver for development and scripted testing: it feeds
//! typed turns or canned transcript lines through the dialog engine and
//! prints prompts and completion. The engine itself owns no interactive
//! surface.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use uuid::Uuid;

use crate::adapters::{
    ExtractionGateway, HttpExtractionClient, HttpPersistenceClient, RuleBasedExtractor,
};
use crate::config;
use crate::domain::{DialogMode, IntakeDefinition, Session, SessionState};
use crate::engine::{
    DialogEngine, DialogOutcome, SessionJournal, SubmissionController, SubmitError,
};

/// intake - Voice-driven conversational intake engine
#[derive(Parser, Debug)]
#[command(name = "intake")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Drive a session against a definition, from a script or stdin
    Run {
        /// Path to the intake definition YAML
        definition: PathBuf,

        /// Dialog mode
        #[arg(short, long, value_enum, default_value = "stepwise")]
        mode: ModeArg,

        /// Script file of input lines (reads stdin if not provided)
        #[arg(short, long)]
        script: Option<PathBuf>,

        /// Resume an existing session by ID instead of starting fresh
        #[arg(long)]
        resume: Option<String>,
    },

    /// List recorded sessions
    Sessions {
        /// Maximum number of sessions to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show the state of a session
    Status {
        /// Session ID (UUID)
        session_id: String,
    },

    /// Validate and summarize an intake definition
    Definition {
        /// Path to the definition YAML
        path: PathBuf,
    },

    /// Show resolved configuration (debug)
    Config,
}

/// Dialog mode for the CLI (maps to DialogMode)
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ModeArg {
    /// Fixed category walk
    Stepwise,

    /// Any-order input
    Freeform,
}

impl From<ModeArg> for DialogMode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::Stepwise => DialogMode::Stepwise,
            ModeArg::Freeform => DialogMode::FreeForm,
        }
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run {
                definition,
                mode,
                script,
                resume,
            } => run_session(&definition, mode.into(), script, resume).await,
            Commands::Sessions { limit } => list_sessions(limit).await,
            Commands::Status { session_id } => show_status(&session_id).await,
            Commands::Definition { path } => show_definition(&path),
            Commands::Config => show_config(),
        }
    }
}

/// Pick the extraction gateway: the HTTP client when an endpoint is
/// configured, the built-in rule-based extractor otherwise
fn extraction_gateway() -> Box<dyn ExtractionGateway> {
    match HttpExtractionClient::from_env() {
        Ok(client) => {
            eprintln!("Using extraction endpoint from environment");
            Box::new(client)
        }
        Err(_) => {
            eprintln!("No extraction endpoint configured; using rule-based extraction");
            Box::new(RuleBasedExtractor::new())
        }
    }
}

/// Drive a session from a script file or stdin
async fn run_session(
    definition_path: &PathBuf,
    mode: DialogMode,
    script: Option<PathBuf>,
    resume: Option<String>,
) -> Result<()> {
    let definition = IntakeDefinition::from_file(definition_path)?;
    definition.validate()?;
    let definition = Arc::new(definition);

    let cfg = config::config()?;
    let engine = DialogEngine::new(
        definition.clone(),
        extraction_gateway(),
        cfg.merge.clone(),
        mode,
    );

    let (journal, mut session) = if let Some(resume_id) = resume {
        let session_id = Uuid::parse_str(&resume_id)
            .with_context(|| format!("Invalid session ID: {}", resume_id))?;
        let journal = SessionJournal::open_default(session_id).await?;
        let session = journal
            .load_session()
            .await?
            .with_context(|| format!("No journal found for session {}", session_id))?;

        if session.definition_name != definition.name {
            anyhow::bail!(
                "Session {} was recorded against definition '{}', not '{}'",
                session_id,
                session.definition_name,
                definition.name
            );
        }

        println!("Resuming session {}", session_id);
        println!(
            "  Completion: {}%",
            session.completion_percent(&definition)
        );
        (journal, session)
    } else {
        let session_id = Uuid::new_v4();
        let journal = SessionJournal::open_default(session_id).await?;
        let (session, outcome) = engine.open_session(session_id, &journal).await?;
        println!("Session {}", session_id);
        println!();
        println!("assistant> {}", outcome.prompt);
        (journal, session)
    };

    let lines: Vec<String> = match script {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read script: {}", path.display()))?
            .lines()
            .map(|l| l.to_string())
            .collect(),
        None => {
            println!("(type utterances; /set <field> <value>, /say <field> <text>, /submit, /quit)");
            std::io::stdin()
                .lock()
                .lines()
                .collect::<std::io::Result<Vec<_>>>()?
        }
    };

    for line in lines {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if line == "/quit" {
            break;
        }

        if line == "/submit" {
            match submit_session(&mut session, &definition, &journal).await {
                Ok(()) => break,
                Err(e) => {
                    println!("submit failed: {}", e);
                    continue;
                }
            }
        }

        println!("user> {}", line);
        let outcome = dispatch_line(&engine, &mut session, &journal, line).await?;
        print_outcome(&outcome);
    }

    println!();
    println!(
        "Session {} — completion {}%, state {:?}",
        session.id,
        session.completion_percent(&definition),
        session.state
    );
    if session.is_active() {
        println!("Resume later with: intake run {} --resume {}", definition_path.display(), session.id);
    }

    Ok(())
}

/// Route one input line to the right engine entry point
async fn dispatch_line(
    engine: &DialogEngine,
    session: &mut Session,
    journal: &SessionJournal,
    line: &str,
) -> Result<DialogOutcome> {
    if let Some(rest) = line.strip_prefix("/set ") {
        let (field, value) = rest
            .split_once(' ')
            .context("Usage: /set <field> <value>")?;
        return engine.handle_typed(session, journal, field, value).await;
    }

    if let Some(rest) = line.strip_prefix("/say ") {
        let (field, text) = rest.split_once(' ').context("Usage: /say <field> <text>")?;
        return engine
            .handle_field_transcript(session, journal, field, text)
            .await;
    }

    engine.handle_transcript(session, journal, line).await
}

fn print_outcome(outcome: &DialogOutcome) {
    for slot in &outcome.accepted {
        println!("  [{}] = {:?}", slot.field_name, slot.value);
    }
    for rejected in &outcome.rejected {
        println!("  [{}] rejected: {}", rejected.field, rejected.reason);
    }
    if outcome.extraction_failed {
        println!("  (extraction unavailable this turn)");
    }
    println!("assistant> {}", outcome.prompt);
    println!("  -- {}% complete --", outcome.completion_percent);
}

/// Submit through the persistence gateway configured in the environment
async fn submit_session(
    session: &mut Session,
    definition: &IntakeDefinition,
    journal: &SessionJournal,
) -> Result<()> {
    let persistence = HttpPersistenceClient::from_env().context(
        "Submission needs INTAKE_PERSIST_ENDPOINT; use /quit to keep the session open",
    )?;

    let cfg = config::config()?;
    let controller = SubmissionController::new(Box::new(persistence), cfg.submission.clone());

    match controller.submit(session, definition, journal).await {
        Ok(receipt) => {
            println!("Submitted.");
            println!("  Subject:    {}", receipt.subject_id);
            println!("  Submission: {}", receipt.submission_id);
            println!("  Summary:    {}", receipt.summary);
            println!("  Priority:   {:?}", receipt.priority);
            Ok(())
        }
        Err(SubmitError::ValidationFailed { missing }) => {
            anyhow::bail!("missing required fields: {}", missing.join(", "))
        }
        Err(e) => Err(e.into()),
    }
}

/// List recorded sessions
async fn list_sessions(limit: usize) -> Result<()> {
    let base = config::sessions_dir()?;
    let ids = SessionJournal::list_sessions(&base).await?;

    if ids.is_empty() {
        println!("No sessions found under {}", base.display());
        return Ok(());
    }

    println!("{:<38} {:<12} {:<10}", "SESSION ID", "STATE", "TURNS");
    println!("{}", "-".repeat(62));

    let mut shown = 0;
    for id in ids {
        if shown >= limit {
            break;
        }

        // Skip sessions that are open elsewhere rather than fail the listing.
        let journal = match SessionJournal::open(&base, id).await {
            Ok(j) => j,
            Err(_) => continue,
        };
        if let Some(session) = journal.load_session().await? {
            let state = match session.state {
                SessionState::Active => "active".to_string(),
                SessionState::Submitted => "submitted".to_string(),
                SessionState::Failed { .. } => "failed".to_string(),
            };
            println!("{:<38} {:<12} {:<10}", session.id, state, session.turns.len());
            shown += 1;
        }
    }

    Ok(())
}

/// Show the state of a session
async fn show_status(session_id_str: &str) -> Result<()> {
    let session_id = Uuid::parse_str(session_id_str)
        .with_context(|| format!("Invalid session ID: {}", session_id_str))?;

    let base = config::sessions_dir()?;
    let journal = SessionJournal::open(&base, session_id).await?;
    let session = journal
        .load_session()
        .await?
        .with_context(|| format!("Session {} not found", session_id))?;

    println!("Session ID: {}", session.id);
    println!("Definition: {}", session.definition_name);
    println!("Mode: {:?}", session.mode);
    println!("State: {:?}", session.state);
    println!("Started: {}", session.started_at);
    if let Some(completed) = session.completed_at {
        println!("Completed: {}", completed);
    }
    println!("Category index: {}", session.current_category);

    println!("\nSlots:");
    for (name, slot) in &session.slots {
        println!(
            "  {} = {:?} ({:?}{})",
            name,
            slot.value,
            slot.source,
            slot.confidence
                .map(|c| format!(", {:.2}", c))
                .unwrap_or_default()
        );
    }

    println!("\nTranscript:");
    for turn in &session.turns {
        let who = match turn.speaker {
            crate::domain::Speaker::System => "assistant",
            crate::domain::Speaker::User => "user",
        };
        println!("  {}> {}", who, turn.text);
    }

    Ok(())
}

/// Validate and summarize a definition
fn show_definition(path: &PathBuf) -> Result<()> {
    let definition = IntakeDefinition::from_file(path)?;
    definition.validate()?;

    println!("Definition: {}", definition.name);
    if !definition.description.is_empty() {
        println!("  {}", definition.description);
    }
    println!();

    for category in &definition.categories {
        println!("[{}] {}", category.key, category.title);
        for field in definition.fields_in_category(&category.key) {
            println!(
                "  {:<24} {:?}{}",
                field.name,
                field.data_type,
                if field.required { " (required)" } else { "" }
            );
        }
    }

    println!();
    println!(
        "{} fields, {} required",
        definition.fields.len(),
        definition.required_count()
    );

    Ok(())
}

/// Show the resolved configuration (for debugging)
fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("Config file: {}", cfg
        .config_file
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(none - using defaults)".to_string()));
    println!();
    println!("Paths:");
    println!("  Home (engine state): {}", cfg.home.display());
    println!("  Sessions:            {}", cfg.home.join("sessions").display());
    println!();
    println!("Engine:");
    println!("  Max recording: {}s", cfg.max_recording_secs);
    println!("  Typed trust:   {}", cfg.merge.typed_trust);
    println!("  Min completion for submit: {}%", cfg.submission.min_completion_percent);

    Ok(())
}
