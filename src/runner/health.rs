//! Ledger Health Gate
//!
//! Reads the tail of the run ledger and decides whether the pipeline needs
//! attention. Checks run in order and the first hit wins:
//!
//! 1. no history at all
//! 2. any FAILED run within `recent_hours`
//! 3. share of FALLBACK among recent SUCCESS runs above `fallback_ratio`
//!
//! A non-healthy verdict writes an alert file; a healthy one removes it.

use crate::runner::error::PersistenceError;
use crate::runner::ledger::{LedgerEntry, MAX_RETENTION_DAYS};
use crate::runner::persist::{write_atomic, RetryPolicy};
use chrono::{DateTime, Duration, Local, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

pub const ALERT_FILE_NAME: &str = "HEALTH_ALERT.txt";

/// Exit codes of `health_gate`.
pub mod health_exit_codes {
    pub const HEALTHY: i32 = 0;
    pub const NO_HISTORY: i32 = 30;
    pub const RECENT_FAILURE: i32 = 31;
    pub const FALLBACK_RATIO_EXCEEDED: i32 = 32;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Days of SUCCESS runs considered for the fallback ratio.
    pub window_days: i64,
    /// Alert when the fallback share is strictly above this (0..=1).
    pub fallback_ratio: f64,
    /// SUCCESS runs required before the ratio is evaluated.
    pub min_samples: usize,
    /// Only the newest N ledger entries are read. 0 reads all.
    pub max_rows: usize,
    pub recent_hours: i64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            window_days: 7,
            fallback_ratio: 0.40,
            min_samples: 5,
            max_rows: 200,
            recent_hours: 48,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HealthVerdict {
    Healthy,
    NoHistory,
    RecentFailure {
        timestamp: String,
        mode: String,
        output: String,
        log: String,
    },
    FallbackRatioExceeded {
        fallback_count: usize,
        success_count: usize,
        ratio: f64,
        threshold: f64,
        window_days: i64,
    },
}

impl HealthVerdict {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Healthy => health_exit_codes::HEALTHY,
            Self::NoHistory => health_exit_codes::NO_HISTORY,
            Self::RecentFailure { .. } => health_exit_codes::RECENT_FAILURE,
            Self::FallbackRatioExceeded { .. } => health_exit_codes::FALLBACK_RATIO_EXCEEDED,
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// Alert body, `None` when healthy.
    pub fn alert_message(&self) -> Option<String> {
        match self {
            Self::Healthy => None,
            Self::NoHistory => {
                Some("No run ledger or empty ledger; cannot assess health.".to_string())
            }
            Self::RecentFailure {
                timestamp,
                mode,
                output,
                log,
            } => Some(format!(
                "FAILED detected in recent window.\ntimestamp={}\nmode={}\noutput={}\nlog={}",
                timestamp, mode, output, log
            )),
            Self::FallbackRatioExceeded {
                fallback_count,
                success_count,
                ratio,
                threshold,
                window_days,
            } => Some(format!(
                "Risk: FALLBACK ratio exceeded threshold (SUCCESS runs only)\n\
                 fallback_count={}\nsuccess_count={}\nratio={:.2}%\nthreshold={:.2}%\nwindow_days={}",
                fallback_count,
                success_count,
                ratio * 100.0,
                threshold * 100.0,
                window_days
            )),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HealthGate {
    config: HealthConfig,
}

impl HealthGate {
    pub fn new(config: HealthConfig) -> Self {
        Self { config }
    }

    pub fn evaluate(&self, entries: &[LedgerEntry], now: DateTime<Utc>) -> HealthVerdict {
        let cfg = &self.config;
        let rows = if cfg.max_rows > 0 && entries.len() > cfg.max_rows {
            &entries[entries.len() - cfg.max_rows..]
        } else {
            entries
        };
        if rows.is_empty() {
            return HealthVerdict::NoHistory;
        }

        let recent_hours = cfg.recent_hours.clamp(1, MAX_RETENTION_DAYS * 24);
        let failed_cutoff = now - Duration::hours(recent_hours);
        let recent_failure = rows.iter().find(|e| {
            e.is_failed()
                && e
                    .parsed_timestamp()
                    .map(|t| t >= failed_cutoff)
                    .unwrap_or(false)
        });
        if let Some(e) = recent_failure {
            return HealthVerdict::RecentFailure {
                timestamp: e.timestamp.clone(),
                mode: e.mode.clone(),
                output: e.output.clone(),
                log: e.log.clone(),
            };
        }

        let window_days = cfg.window_days.clamp(1, MAX_RETENTION_DAYS);
        let ratio_cutoff = now - Duration::days(window_days);
        let mut successes: Vec<&LedgerEntry> = rows
            .iter()
            .filter(|e| {
                e.is_success()
                    && e
                        .parsed_timestamp()
                        .map(|t| t >= ratio_cutoff)
                        .unwrap_or(false)
            })
            .collect();

        // Sparse window: judge the most recent successes instead.
        if successes.len() < cfg.min_samples {
            let all: Vec<&LedgerEntry> = rows.iter().filter(|e| e.is_success()).collect();
            let take = cfg.min_samples.max(1);
            successes = all[all.len().saturating_sub(take)..].to_vec();
        }

        if !successes.is_empty() && successes.len() >= cfg.min_samples {
            let fallback_count = successes.iter().filter(|e| e.used_fallback()).count();
            let ratio = fallback_count as f64 / successes.len() as f64;
            if ratio > cfg.fallback_ratio {
                return HealthVerdict::FallbackRatioExceeded {
                    fallback_count,
                    success_count: successes.len(),
                    ratio,
                    threshold: cfg.fallback_ratio,
                    window_days,
                };
            }
        }

        HealthVerdict::Healthy
    }
}

/// Write the alert file for a non-healthy verdict, remove it otherwise.
pub fn apply_alert(
    path: &Path,
    verdict: &HealthVerdict,
    retry: &RetryPolicy,
) -> Result<(), PersistenceError> {
    match verdict.alert_message() {
        Some(message) => {
            let stamp = Local::now().to_rfc3339_opts(SecondsFormat::Secs, false);
            write_atomic(path, format!("[{}] {}\n", stamp, message).as_bytes(), retry)?;
            warn!("Health alert written to {}", path.display());
        }
        None => match std::fs::remove_file(path) {
            Ok(()) => info!("Cleared health alert {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to clear health alert {}: {}", path.display(), e),
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    fn entry(hours_ago: i64, result: &str, used_core: &str) -> LedgerEntry {
        LedgerEntry {
            timestamp: (now() - Duration::hours(hours_ago)).to_rfc3339(),
            result: result.to_string(),
            used_core: used_core.to_string(),
            mode: "pre".to_string(),
            ..Default::default()
        }
    }

    fn gate() -> HealthGate {
        HealthGate::new(HealthConfig::default())
    }

    #[test]
    fn test_empty_ledger_is_no_history() {
        let verdict = gate().evaluate(&[], now());
        assert_eq!(verdict, HealthVerdict::NoHistory);
        assert_eq!(verdict.exit_code(), 30);
    }

    #[test]
    fn test_recent_failure_wins() {
        let mut entries: Vec<LedgerEntry> =
            (0..10).map(|i| entry(100 + i, "SUCCESS", "FALLBACK")).collect();
        entries.push(entry(3, "FAILED", "NONE"));

        let verdict = gate().evaluate(&entries, now());
        assert_eq!(verdict.exit_code(), 31);
        assert!(verdict.alert_message().unwrap().contains("mode=pre"));
    }

    #[test]
    fn test_old_failure_is_ignored() {
        let mut entries = vec![entry(72, "FAILED", "NONE")];
        entries.extend((0..5).map(|i| entry(i, "SUCCESS", "PRIMARY")));
        assert!(gate().evaluate(&entries, now()).is_healthy());
    }

    #[test]
    fn test_fallback_ratio_exceeded() {
        let mut entries: Vec<LedgerEntry> =
            (0..3).map(|i| entry(60 + i, "SUCCESS", "PRIMARY")).collect();
        entries.extend((0..3).map(|i| entry(50 + i, "SUCCESS", "FALLBACK")));

        match gate().evaluate(&entries, now()) {
            HealthVerdict::FallbackRatioExceeded {
                fallback_count,
                success_count,
                ..
            } => {
                assert_eq!(fallback_count, 3);
                assert_eq!(success_count, 6);
            }
            other => panic!("expected ratio alert, got {:?}", other),
        }
    }

    #[test]
    fn test_ratio_at_threshold_is_healthy() {
        let mut entries: Vec<LedgerEntry> =
            (0..3).map(|i| entry(60 + i, "SUCCESS", "PRIMARY")).collect();
        entries.extend((0..2).map(|i| entry(50 + i, "SUCCESS", "FALLBACK")));
        assert!(gate().evaluate(&entries, now()).is_healthy());
    }

    #[test]
    fn test_sparse_window_uses_latest_successes() {
        // Only two successes inside 7 days; the older fallback-heavy ones count.
        let mut entries: Vec<LedgerEntry> = (0..4)
            .map(|i| entry(24 * 30 + i, "SUCCESS", "FALLBACK"))
            .collect();
        entries.push(entry(5, "SUCCESS", "PRIMARY"));
        entries.push(entry(4, "SUCCESS", "PRIMARY"));

        let verdict = gate().evaluate(&entries, now());
        assert_eq!(verdict.exit_code(), 32);
    }

    #[test]
    fn test_huge_windows_do_not_overflow() {
        let gate = HealthGate::new(HealthConfig {
            window_days: i64::MAX,
            recent_hours: i64::MAX,
            ..HealthConfig::default()
        });
        let entries = vec![entry(24 * 365, "FAILED", "NONE")];
        assert_eq!(gate.evaluate(&entries, now()).exit_code(), 31);
    }

    #[test]
    fn test_too_few_samples_is_healthy() {
        let entries: Vec<LedgerEntry> = (0..4).map(|i| entry(i, "SUCCESS", "FALLBACK")).collect();
        assert!(gate().evaluate(&entries, now()).is_healthy());
    }

    #[test]
    fn test_alert_file_written_then_cleared() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(ALERT_FILE_NAME);
        let retry = RetryPolicy::immediate(1);

        apply_alert(&path, &HealthVerdict::NoHistory, &retry).unwrap();
        assert!(std::fs::read_to_string(&path)
            .unwrap()
            .contains("cannot assess health"));

        apply_alert(&path, &HealthVerdict::Healthy, &retry).unwrap();
        assert!(!path.exists());
        apply_alert(&path, &HealthVerdict::Healthy, &retry).unwrap();
    }
}
