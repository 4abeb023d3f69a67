//! Rolling Run Ledger
//!
//! Append-only history of run outcomes, one flattened JSON object per line.
//! Every append rewrites the whole file with exactly the retained set:
//!
//! 1. load existing entries (missing file -> empty, malformed lines dropped)
//! 2. append the new entry
//! 3. drop entries older than the retention window (unparseable timestamps kept)
//! 4. optionally cap to the newest `max_entries`
//! 5. atomic replace
//!
//! Entry order is insertion order and is never changed. The file is read by the
//! health gate on every invocation, so bounded size is a hard requirement.

use crate::runner::error::PersistenceError;
use crate::runner::persist::{write_atomic, RetryPolicy};
use crate::runner::record::RunRecord;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default rolling window.
pub const DEFAULT_RETENTION_DAYS: i64 = 30;

/// Longest window accepted anywhere a day count becomes a `chrono::Duration`.
pub const MAX_RETENTION_DAYS: i64 = 36_500;

// =============================================================================
// ENTRY
// =============================================================================

/// Flattened copy of a `RunRecord`.
///
/// Every field defaults so that entries written by older builds still load.
/// `timestamp` stays a string so an unparseable value survives a rewrite.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerEntry {
    pub timestamp: String,
    pub run_id: String,
    pub run_key: String,
    pub mode: String,
    pub input: String,
    pub input_sha256: String,
    pub output: String,
    pub top20: String,
    pub result: String,
    pub used_core: String,
    pub outcome: String,
    pub exit_code: i32,
    pub primary_returncode: Option<i32>,
    pub fallback_returncode: Option<i32>,
    pub output_exists: bool,
    pub output_bytes: u64,
    pub output_sha256: String,
    pub top20_exists: bool,
    pub top20_bytes: u64,
    pub top20_sha256: String,
    pub log: String,
    pub primary_error: String,
    pub fallback_error: String,
}

impl LedgerEntry {
    pub fn from_record(record: &RunRecord) -> Self {
        let top = record.top_artifact.clone().unwrap_or_default();
        Self {
            timestamp: record.timestamp.to_rfc3339(),
            run_id: record.run_id.clone(),
            run_key: record.run_key.id(),
            mode: record.mode().to_string(),
            input: record.input().display().to_string(),
            input_sha256: record.run_key.input_sha256.clone(),
            output: record.output.path.display().to_string(),
            top20: record
                .top_artifact
                .as_ref()
                .map(|t| t.path.display().to_string())
                .unwrap_or_default(),
            result: record.result.as_str().to_string(),
            used_core: record.used_core.as_str().to_string(),
            outcome: serde_json::to_value(record.outcome)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default(),
            exit_code: record.outcome.exit_code(),
            primary_returncode: record.primary_returncode,
            fallback_returncode: record.fallback_returncode,
            output_exists: record.output.exists,
            output_bytes: record.output.bytes,
            output_sha256: record.output.sha256.clone(),
            top20_exists: top.exists,
            top20_bytes: top.bytes,
            top20_sha256: top.sha256,
            log: record.log.display().to_string(),
            primary_error: record.primary_error.clone().unwrap_or_default(),
            fallback_error: record.fallback_error.clone().unwrap_or_default(),
        }
    }

    /// Parsed timestamp, `None` on format drift.
    pub fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(self.timestamp.trim())
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    pub fn is_success(&self) -> bool {
        self.result.trim().eq_ignore_ascii_case("SUCCESS")
    }

    pub fn is_failed(&self) -> bool {
        self.result.trim().eq_ignore_ascii_case("FAILED")
    }

    pub fn used_fallback(&self) -> bool {
        self.used_core.trim().eq_ignore_ascii_case("FALLBACK")
    }
}

// =============================================================================
// RETENTION
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub window: Duration,
    /// Keep at most this many newest entries.
    pub max_entries: Option<usize>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::days(DEFAULT_RETENTION_DAYS)
    }
}

impl RetentionPolicy {
    /// Window of `days`, capped at `MAX_RETENTION_DAYS`.
    pub fn days(days: i64) -> Self {
        Self {
            window: Duration::days(days.min(MAX_RETENTION_DAYS)),
            max_entries: None,
        }
    }

    pub fn with_max_entries(mut self, max_entries: Option<usize>) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Filter `entries` in place, preserving order.
    pub fn apply(&self, entries: &mut Vec<LedgerEntry>, now: DateTime<Utc>) {
        let cutoff = now - self.window;
        entries.retain(|e| match e.parsed_timestamp() {
            Some(t) => t >= cutoff,
            None => true,
        });
        if let Some(max) = self.max_entries {
            if entries.len() > max {
                let excess = entries.len() - max;
                entries.drain(..excess);
            }
        }
    }
}

// =============================================================================
// LEDGER
// =============================================================================

#[derive(Debug, Clone)]
pub struct RunLedger {
    path: PathBuf,
    retry: RetryPolicy,
}

impl RunLedger {
    pub fn new(path: impl Into<PathBuf>, retry: RetryPolicy) -> Self {
        Self {
            path: path.into(),
            retry,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All readable entries, oldest first. Never fails.
    pub fn load(&self) -> Vec<LedgerEntry> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!("Cannot read ledger {}: {}; treating as empty", self.path.display(), e);
                return Vec::new();
            }
        };

        let mut entries = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LedgerEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(
                    "Dropping malformed ledger line {} in {}: {}",
                    lineno + 1,
                    self.path.display(),
                    e
                ),
            }
        }
        entries
    }

    pub fn append(&self, record: &RunRecord, policy: &RetentionPolicy) -> Result<(), PersistenceError> {
        self.append_at(record, policy, Utc::now())
    }

    /// `append` with an explicit clock.
    pub fn append_at(
        &self,
        record: &RunRecord,
        policy: &RetentionPolicy,
        now: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        let mut entries = self.load();
        entries.push(LedgerEntry::from_record(record));
        let before = entries.len();
        policy.apply(&mut entries, now);

        let mut body = String::new();
        for entry in &entries {
            let line =
                serde_json::to_string(entry).map_err(|source| PersistenceError::Serialization {
                    path: self.path.clone(),
                    source,
                })?;
            body.push_str(&line);
            body.push('\n');
        }
        write_atomic(&self.path, body.as_bytes(), &self.retry)?;

        debug!(
            "Ledger {}: {} entries retained ({} pruned)",
            self.path.display(),
            entries.len(),
            before - entries.len()
        );
        Ok(())
    }
}
