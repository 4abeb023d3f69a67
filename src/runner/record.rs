//! Run Records
//!
//! `ExecutionAttempt` is the ephemeral view of one child-process invocation.
//! `RunRecord` is the immutable summary of one orchestration cycle, written to
//! the status store and flattened into the ledger.

use crate::runner::hasher::sha256_file;
use crate::runner::run_key::RunKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// =============================================================================
// ENUMS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunResult {
    Success,
    Failed,
}

impl RunResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }
}

/// Which tier produced the final outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UsedCore {
    Primary,
    Fallback,
    None,
}

impl UsedCore {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "PRIMARY",
            Self::Fallback => "FALLBACK",
            Self::None => "NONE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    Primary,
    Fallback,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "PRIMARY",
            Self::Fallback => "FALLBACK",
        }
    }
}

/// Terminal state of a cycle. Each maps to a distinct process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunOutcome {
    /// Primary tier succeeded.
    Healthy,
    /// Primary failed, fallback succeeded.
    Degraded,
    /// Input or primary executable missing before anything ran.
    MissingPrerequisite,
    /// Both tiers failed.
    Failed,
    /// Primary output diverged from its known-good baseline.
    PrimaryDivergence,
    /// Fallback output diverged from its known-good baseline.
    FallbackDivergence,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Healthy | Self::Degraded => exit_codes::SUCCESS,
            Self::MissingPrerequisite => exit_codes::MISSING_PREREQUISITE,
            Self::Failed => exit_codes::BOTH_FAILED,
            Self::PrimaryDivergence => exit_codes::PRIMARY_DIVERGENCE,
            Self::FallbackDivergence => exit_codes::FALLBACK_DIVERGENCE,
        }
    }

    pub fn result(&self) -> RunResult {
        match self {
            Self::Healthy | Self::Degraded => RunResult::Success,
            _ => RunResult::Failed,
        }
    }
}

/// Process exit codes of `oneclick_run`.
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const INTERNAL_ERROR: i32 = 1;
    pub const MISSING_PREREQUISITE: i32 = 2;
    pub const BOTH_FAILED: i32 = 3;
    pub const PERSISTENCE_FAILED: i32 = 4;
    pub const LOCATION_BUSY: i32 = 5;
    pub const DRY_RUN_FAILED: i32 = 10;
    pub const PRIMARY_DIVERGENCE: i32 = 20;
    pub const FALLBACK_DIVERGENCE: i32 = 21;
}

// =============================================================================
// ARTIFACT SUMMARY
// =============================================================================

/// Existence, size and digest of one artifact at record time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSummary {
    pub path: PathBuf,
    pub exists: bool,
    pub bytes: u64,
    /// Empty when the file is missing, empty or unreadable.
    pub sha256: String,
}

impl ArtifactSummary {
    /// Inspect `path` now. Never fails; unreadable files summarize as absent.
    pub fn inspect(path: &Path) -> Self {
        let (exists, bytes) = match std::fs::metadata(path) {
            Ok(m) if m.is_file() => (true, m.len()),
            _ => (false, 0),
        };
        let sha256 = if exists && bytes > 0 {
            sha256_file(path).unwrap_or_default()
        } else {
            String::new()
        };
        Self {
            path: path.to_path_buf(),
            exists,
            bytes,
            sha256,
        }
    }

    /// Summary with a digest computed earlier in the same cycle.
    pub fn with_hash(path: &Path, bytes: u64, sha256: String) -> Self {
        Self {
            path: path.to_path_buf(),
            exists: true,
            bytes,
            sha256,
        }
    }
}

// =============================================================================
// EXECUTION ATTEMPT
// =============================================================================

/// One child-process invocation. Owned by the orchestrator for one cycle.
#[derive(Debug, Clone)]
pub struct ExecutionAttempt {
    pub tier: Tier,
    pub script: PathBuf,
    /// `None` when the process never produced an exit code (not found, timeout).
    pub exit_code: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub log_path: PathBuf,
    pub output: PathBuf,
    pub top_artifact: Option<PathBuf>,
    /// Why the attempt did not succeed, if it did not.
    pub error: Option<String>,
}

impl ExecutionAttempt {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0) && self.error.is_none()
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

// =============================================================================
// RUN RECORD
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
    pub run_key: RunKey,
    pub result: RunResult,
    pub used_core: UsedCore,
    pub outcome: RunOutcome,
    pub output: ArtifactSummary,
    pub top_artifact: Option<ArtifactSummary>,
    pub log: PathBuf,
    pub primary_returncode: Option<i32>,
    pub fallback_returncode: Option<i32>,
    pub primary_error: Option<String>,
    pub fallback_error: Option<String>,
}

impl RunRecord {
    pub fn mode(&self) -> &str {
        &self.run_key.mode
    }

    pub fn input(&self) -> &Path {
        &self.run_key.input
    }

    pub fn is_success(&self) -> bool {
        self.result == RunResult::Success
    }

    /// Human-readable `key: value` rendering.
    pub fn render_text(&self) -> String {
        fn opt_code(code: Option<i32>) -> String {
            code.map(|c| c.to_string()).unwrap_or_default()
        }

        let top = self.top_artifact.clone().unwrap_or_default();
        let mut lines = vec![
            format!(
                "timestamp: {}",
                self.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
            ),
            format!("run_id: {}", self.run_id),
            format!("run_key: {}", self.run_key.id()),
            format!("mode: {}", self.mode()),
            format!("input: {}", self.input().display()),
            format!("input_sha256: {}", self.run_key.input_sha256),
            format!("output: {}", self.output.path.display()),
            format!(
                "top20: {}",
                self.top_artifact
                    .as_ref()
                    .map(|t| t.path.display().to_string())
                    .unwrap_or_default()
            ),
            format!("result: {}", self.result.as_str()),
            format!("used_core: {}", self.used_core.as_str()),
            format!("outcome: {:?}", self.outcome),
            format!("exit_code: {}", self.outcome.exit_code()),
            format!("log: {}", self.log.display()),
            format!("primary_returncode: {}", opt_code(self.primary_returncode)),
            format!("fallback_returncode: {}", opt_code(self.fallback_returncode)),
            format!("output_exists: {}", self.output.exists),
            format!("output_bytes: {}", self.output.bytes),
            format!("output_sha256: {}", self.output.sha256),
            format!("top20_exists: {}", top.exists),
            format!("top20_bytes: {}", top.bytes),
            format!("top20_sha256: {}", top.sha256),
        ];
        if let Some(e) = &self.primary_error {
            lines.push("primary_error:".to_string());
            lines.push(e.clone());
        }
        if let Some(e) = &self.fallback_error {
            lines.push("fallback_error:".to_string());
            lines.push(e.clone());
        }
        lines.join("\n") + "\n"
    }
}
