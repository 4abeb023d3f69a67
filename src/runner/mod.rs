//! Resilient Run Orchestration
//!
//! Runs a daily computation job with a two-tier fallback, enforces its output
//! contract, detects output drift and keeps a durable record of every cycle.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Orchestrator                            │
//! │  (RunKey, tier sequencing, banners, exit codes)                 │
//! └─────────────────────────────────────────────────────────────────┘
//!        │                       │                       │
//!        ▼                       ▼                       ▼
//! ┌─────────────┐        ┌─────────────┐        ┌─────────────┐
//! │ JobExecutor │        │ Output      │        │ Stability   │
//! │ (JobRunner) │        │ Validator   │        │ Checker     │
//! └─────────────┘        └─────────────┘        └──────┬──────┘
//!                                                      │ last-good record
//!                                                      ▼
//! ┌─────────────────────────────┐        ┌─────────────────────────────┐
//! │ StatusStore                 │        │ RunLedger                   │
//! │ RUN_STATUS{,__FALLBACK}.json│        │ run_summary.jsonl (30 days) │
//! └─────────────────────────────┘        └──────────────┬──────────────┘
//!                                                       ▼
//!                                               ┌─────────────┐
//!                                               │ HealthGate  │
//!                                               └─────────────┘
//! ```
//!
//! # Guarantees
//!
//! - **Tier isolation**: fallback artifacts and status live at tagged paths
//! - **Atomic state**: status and ledger files are replaced by rename, never
//!   written in place
//! - **Bounded history**: the ledger is pruned to its retention window on
//!   every append
//! - **Drift is fatal**: a changed output hash under an unchanged RunKey stops
//!   the cycle without fallback, and keeps stopping it: FAILED cycles never
//!   replace the last SUCCESS baseline

pub mod config;
pub mod error;
pub mod hasher;
pub mod health;
pub mod job;
pub mod ledger;
pub mod lock;
pub mod orchestrator;
pub mod paths;
pub mod persist;
pub mod record;
pub mod retention;
pub mod run_key;
pub mod stability;
pub mod status_store;
pub mod validator;

#[cfg(test)]
mod status_store_tests;

pub use config::{JobSpec, RunnerConfig, DEFAULT_TOP_ARTIFACT_FLAG};
pub use error::{
    ConfigError, JobError, OrchestratorError, PersistenceError, StabilityDivergence,
    ValidationProblem,
};
pub use hasher::{sha256_bytes, sha256_file};
pub use health::{apply_alert, HealthConfig, HealthGate, HealthVerdict, ALERT_FILE_NAME};
pub use job::{JobExecutor, JobInvocation, JobRunner};
pub use ledger::{LedgerEntry, RetentionPolicy, RunLedger, DEFAULT_RETENTION_DAYS};
pub use lock::OutputLock;
pub use orchestrator::{DryRunReport, Orchestrator, RunReport, RunRequest};
pub use paths::{tagged_path, DEFAULT_FALLBACK_TAG};
pub use persist::{write_atomic, write_json_atomic, RetryPolicy};
pub use record::{
    exit_codes, ArtifactSummary, ExecutionAttempt, RunOutcome, RunRecord, RunResult, Tier,
    UsedCore,
};
pub use retention::{cleanup_dir, DEFAULT_LOG_KEEP_DAYS};
pub use run_key::{RunKey, RUN_KEY_VERSION};
pub use stability::StabilityChecker;
pub use status_store::{StatusLocation, StatusStore};
pub use validator::{OutputValidator, ValidationReport};
