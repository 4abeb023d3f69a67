//! Runner Configuration
//!
//! Everything the orchestrator needs is passed in through `RunnerConfig`; there
//! are no module-level base directories. Values come from (lowest to highest
//! precedence) built-in defaults, an optional TOML file, then CLI flags.
//!
//! ```toml
//! interpreter = "python3"
//! log_dir = "logs"
//! ledger_path = "run_summary.jsonl"
//! retention_days = 30
//! job_timeout_secs = 1800
//! required_columns = ["code", "light"]
//!
//! [primary]
//! script = "daily_auto_run_final.py"
//!
//! [fallback]
//! script = "fallback_core/daily_auto_run_final.py"
//!
//! [status_retry]
//! attempts = 3
//! delays_ms = [200, 500, 1000]
//! ```

use crate::runner::error::ConfigError;
use crate::runner::ledger::{RetentionPolicy, DEFAULT_RETENTION_DAYS, MAX_RETENTION_DAYS};
use crate::runner::paths::DEFAULT_FALLBACK_TAG;
use crate::runner::persist::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Flag the job receives for the secondary artifact path.
pub const DEFAULT_TOP_ARTIFACT_FLAG: &str = "--top20";

/// One tier's job: the script and where to run it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSpec {
    pub script: PathBuf,
    /// Defaults to the script's directory.
    pub working_dir: Option<PathBuf>,
}

impl JobSpec {
    pub fn new(script: impl Into<PathBuf>) -> Self {
        Self {
            script: script.into(),
            working_dir: None,
        }
    }

    pub fn resolved_working_dir(&self) -> PathBuf {
        match &self.working_dir {
            Some(dir) => dir.clone(),
            None => self
                .script
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub primary: JobSpec,
    pub fallback: JobSpec,
    /// Program that runs the scripts (e.g. `python3`). `None` executes the script directly.
    pub interpreter: Option<PathBuf>,
    pub log_dir: PathBuf,
    /// Where status documents go. `None` means the output's directory.
    pub status_dir: Option<PathBuf>,
    pub ledger_path: PathBuf,
    pub retention_days: i64,
    pub ledger_max_entries: Option<usize>,
    /// Wall-clock budget per child process.
    pub job_timeout_secs: Option<u64>,
    pub required_columns: Vec<String>,
    pub top_required_columns: Vec<String>,
    pub fallback_tag: String,
    pub top_artifact_flag: String,
    pub status_retry: RetryPolicy,
    /// Take an exclusive lock file in the output directory for the whole cycle.
    pub lock_output_dir: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            primary: JobSpec::new("daily_auto_run_final.py"),
            fallback: JobSpec::new("fallback_core/daily_auto_run_final.py"),
            interpreter: None,
            log_dir: PathBuf::from("logs"),
            status_dir: None,
            ledger_path: PathBuf::from("run_summary.jsonl"),
            retention_days: DEFAULT_RETENTION_DAYS,
            ledger_max_entries: None,
            job_timeout_secs: None,
            required_columns: Vec::new(),
            top_required_columns: Vec::new(),
            fallback_tag: DEFAULT_FALLBACK_TAG.to_string(),
            top_artifact_flag: DEFAULT_TOP_ARTIFACT_FLAG.to_string(),
            status_retry: RetryPolicy::default(),
            lock_output_dir: false,
        }
    }
}

impl RunnerConfig {
    /// Load from a TOML file. Missing keys take defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fallback_tag.is_empty() {
            return Err(ConfigError::Invalid(
                "fallback_tag must be non-empty so fallback outputs never collide".into(),
            ));
        }
        if self.status_retry.attempts == 0 {
            return Err(ConfigError::Invalid("status_retry.attempts must be >= 1".into()));
        }
        if self.retention_days <= 0 || self.retention_days > MAX_RETENTION_DAYS {
            return Err(ConfigError::Invalid(format!(
                "retention_days must be in 1..={}",
                MAX_RETENTION_DAYS
            )));
        }
        if self.job_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid("job_timeout_secs must be > 0".into()));
        }
        if self.top_artifact_flag.trim().is_empty() {
            return Err(ConfigError::Invalid("top_artifact_flag must be non-empty".into()));
        }
        Ok(())
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_secs.map(Duration::from_secs)
    }

    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy::days(self.retention_days).with_max_entries(self.ledger_max_entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let config = RunnerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.fallback_tag, "__FALLBACK");
        assert_eq!(config.status_retry.attempts, 3);
        assert_eq!(config.retention().window, chrono::Duration::days(30));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("runner.toml");
        std::fs::write(
            &path,
            r#"
interpreter = "python3"
job_timeout_secs = 60
required_columns = ["code", "light"]

[primary]
script = "/opt/ts/daily_auto_run_final.py"

[fallback]
script = "/opt/ts/fallback_core/daily_auto_run_final.py"
working_dir = "/opt/ts"
"#,
        )
        .unwrap();

        let config = RunnerConfig::from_file(&path).unwrap();
        assert_eq!(config.interpreter, Some(PathBuf::from("python3")));
        assert_eq!(config.job_timeout(), Some(Duration::from_secs(60)));
        assert_eq!(config.required_columns, vec!["code", "light"]);
        assert_eq!(
            config.primary.resolved_working_dir(),
            PathBuf::from("/opt/ts")
        );
        assert_eq!(
            config.fallback.resolved_working_dir(),
            PathBuf::from("/opt/ts")
        );
        assert_eq!(config.ledger_path, PathBuf::from("run_summary.jsonl"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_error_reports_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "retention_days = \"thirty\"").unwrap();
        let err = RunnerConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("bad.toml"));
    }

    #[test]
    fn test_validate_rejects_empty_tag_and_zero_retries() {
        let mut config = RunnerConfig::default();
        config.fallback_tag.clear();
        assert!(config.validate().is_err());

        let mut config = RunnerConfig::default();
        config.status_retry.attempts = 0;
        assert!(config.validate().is_err());

        let mut config = RunnerConfig::default();
        config.job_timeout_secs = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bounds_retention_days() {
        let mut config = RunnerConfig::default();
        config.retention_days = MAX_RETENTION_DAYS;
        assert!(config.validate().is_ok());

        config.retention_days = i64::MAX;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("retention_days"));

        config.retention_days = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retention_policy_caps_huge_window() {
        let policy = RetentionPolicy::days(i64::MAX);
        assert_eq!(policy.window, chrono::Duration::days(MAX_RETENTION_DAYS));
    }

    #[test]
    fn test_bare_script_name_runs_in_current_dir() {
        assert_eq!(
            JobSpec::new("job.sh").resolved_working_dir(),
            PathBuf::from(".")
        );
    }
}
