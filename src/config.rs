//! Configuration for intake engine paths and policies.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (INTAKE_HOME)
//! 2. Config file (.intake/config.yaml)
//! 3. Defaults (~/.intake)
//!
//! Config file discovery searches the current directory and parents for
//! `.intake/config.yaml`; paths in the file are relative to its parent
//! directory.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::engine::merge::MergePolicy;
use crate::engine::submission::SubmissionPolicy;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub engine: Option<EngineConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to the config file)
    pub home: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    /// Recording duration cap in seconds
    pub max_recording_secs: Option<u64>,
    #[serde(default)]
    pub merge: Option<MergePolicy>,
    #[serde(default)]
    pub submission: Option<SubmissionPolicy>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to intake home (engine state)
    pub home: PathBuf,

    /// Path to the config file (if found)
    pub config_file: Option<PathBuf>,

    /// Recording duration cap in seconds
    pub max_recording_secs: u64,

    /// Merge policy applied by dialog engines
    pub merge: MergePolicy,

    /// Submission gate and triage policy
    pub submission: SubmissionPolicy,
}

/// Find the config file by searching the current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".intake").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse the config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".intake");

    let config_file = find_config_file();

    let (home, engine) = if let Some(ref config_path) = config_file {
        let config = load_config_file(config_path)?;

        let home = if let Ok(env_home) = std::env::var("INTAKE_HOME") {
            PathBuf::from(env_home)
        } else if let Some(ref home_path) = config.paths.home {
            let intake_dir = config_path.parent().unwrap_or(Path::new("."));
            resolve_path(intake_dir, home_path)
        } else {
            default_home.clone()
        };

        (home, config.engine.unwrap_or_default())
    } else {
        let home = std::env::var("INTAKE_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_home.clone());

        (home, EngineConfig::default())
    };

    Ok(ResolvedConfig {
        home,
        config_file,
        max_recording_secs: engine.max_recording_secs.unwrap_or(120),
        merge: engine.merge.unwrap_or_default(),
        submission: engine.submission.unwrap_or_default(),
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

/// Get the intake home directory (engine state)
pub fn intake_home() -> Result<PathBuf> {
    Ok(config()?.home.clone())
}

/// Get the sessions directory ($INTAKE_HOME/sessions)
pub fn sessions_dir() -> Result<PathBuf> {
    Ok(config()?.home.join("sessions"))
}
