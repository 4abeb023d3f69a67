//! Error taxonomy for the runner.
//!
//! Attempt-level failures (`JobError`, `ValidationProblem`, `StabilityDivergence`)
//! are consumed by the orchestrator state machine. `PersistenceError` and
//! `OrchestratorError` escape to the caller.

use crate::runner::record::exit_codes;
use std::path::PathBuf;
use std::time::Duration;

// =============================================================================
// JOB LAUNCH / EXECUTION
// =============================================================================

/// Failure to obtain an exit code from a job.
#[derive(Debug)]
pub enum JobError {
    /// Executable or script does not exist. Reported before any launch.
    NotFound(PathBuf),
    /// The OS refused to start the process.
    Spawn(std::io::Error),
    /// Log file or pipe I/O failed while the child was running.
    Io(std::io::Error),
    /// Wall-clock budget exhausted; the child was killed.
    Timeout { after: Duration },
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(path) => write!(f, "executable not found: {}", path.display()),
            Self::Spawn(e) => write!(f, "failed to launch process: {}", e),
            Self::Io(e) => write!(f, "I/O error while running process: {}", e),
            Self::Timeout { after } => {
                write!(f, "process timed out after {}s and was killed", after.as_secs())
            }
        }
    }
}

impl std::error::Error for JobError {}

impl From<std::io::Error> for JobError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

// =============================================================================
// OUTPUT CONTRACT
// =============================================================================

/// A single violation of the output contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationProblem {
    MissingArtifact { path: PathBuf },
    EmptyArtifact { path: PathBuf },
    SchemaMismatch {
        path: PathBuf,
        missing_columns: Vec<String>,
    },
    /// Exists but could not be opened or its header read.
    Unreadable { path: PathBuf, reason: String },
}

impl std::fmt::Display for ValidationProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingArtifact { path } => {
                write!(f, "MissingArtifact: output not created: {}", path.display())
            }
            Self::EmptyArtifact { path } => {
                write!(f, "EmptyArtifact: output is empty: {}", path.display())
            }
            Self::SchemaMismatch {
                path,
                missing_columns,
            } => write!(
                f,
                "SchemaMismatch: {} missing columns [{}]",
                path.display(),
                missing_columns.join(", ")
            ),
            Self::Unreadable { path, reason } => {
                write!(f, "Unreadable: {}: {}", path.display(), reason)
            }
        }
    }
}

// =============================================================================
// STABILITY
// =============================================================================

/// Fresh output hash differs from the last known-good hash for the same RunKey.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StabilityDivergence {
    /// Which artifact diverged ("output" or "top_artifact").
    pub artifact: String,
    pub recorded_sha256: String,
    pub fresh_sha256: String,
}

impl std::fmt::Display for StabilityDivergence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "StabilityDivergence: {} hash changed for unchanged run key (recorded={}, fresh={})",
            self.artifact, self.recorded_sha256, self.fresh_sha256
        )
    }
}

impl std::error::Error for StabilityDivergence {}

// =============================================================================
// PERSISTENCE
// =============================================================================

/// Status or ledger write failed after retries.
#[derive(Debug)]
pub enum PersistenceError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Serialization {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl std::fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to persist {}: {}", path.display(), source)
            }
            Self::Serialization { path, source } => {
                write!(f, "failed to serialize {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for PersistenceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Serialization { source, .. } => Some(source),
        }
    }
}

// =============================================================================
// CONFIGURATION
// =============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Parse { path: PathBuf, source: toml::de::Error },
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "cannot read config {}: {}", path.display(), source)
            }
            Self::Parse { path, source } => {
                write!(f, "invalid config {}: {}", path.display(), source)
            }
            Self::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

// =============================================================================
// ORCHESTRATOR
// =============================================================================

/// Errors that abort a cycle instead of being recorded as an attempt failure.
#[derive(Debug)]
pub enum OrchestratorError {
    Persistence(PersistenceError),
    Io(std::io::Error),
    /// Another orchestration holds the output directory lock.
    LocationBusy(PathBuf),
}

impl std::fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Persistence(e) => write!(f, "persistence error: {}", e),
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::LocationBusy(path) => write!(
                f,
                "output location is locked by another run: {}",
                path.display()
            ),
        }
    }
}

impl OrchestratorError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Persistence(_) => exit_codes::PERSISTENCE_FAILED,
            Self::Io(_) => exit_codes::INTERNAL_ERROR,
            Self::LocationBusy(_) => exit_codes::LOCATION_BUSY,
        }
    }
}

impl std::error::Error for OrchestratorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Persistence(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::LocationBusy(_) => None,
        }
    }
}

impl From<PersistenceError> for OrchestratorError {
    fn from(e: PersistenceError) -> Self {
        Self::Persistence(e)
    }
}

impl From<std::io::Error> for OrchestratorError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
