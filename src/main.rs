//! Oneclick Run CLI
//!
//! Runs the daily job through the primary tier, falls back to the fallback
//! tier on failure or invalid output, and records the outcome.
//!
//! # Usage
//!
//! ```bash
//! oneclick_run --mode pre \
//!   --input  data/daily_input.csv \
//!   --output data/daily_output.csv \
//!   --top20  data/top20.csv \
//!   --config runner.toml
//! ```
//!
//! # Exit Codes
//!
//! - 0: Success (primary, or degraded via fallback)
//! - 1: Unexpected internal error
//! - 2: Input or primary script missing
//! - 3: Both tiers failed
//! - 4: Status or ledger could not be persisted
//! - 5: Output location locked by another run
//! - 10: Dry run found problems
//! - 20: Primary output diverged for an unchanged run key
//! - 21: Fallback output diverged for an unchanged run key

use anyhow::{Context, Result};
use betterbot_runner::runner::{
    exit_codes, JobRunner, JobSpec, Orchestrator, OrchestratorError, RunRequest, RunnerConfig,
};
use clap::Parser;
use dotenv::dotenv;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// CLI ARGUMENTS
// =============================================================================

#[derive(Parser, Debug)]
#[command(name = "oneclick_run")]
#[command(about = "Daily run with primary/fallback tiers, output checks, hashing and status records")]
struct Args {
    /// Run mode passed through to the job
    #[arg(long, env = "ONECLICK_MODE", default_value = "pre", value_parser = ["pre", "post"])]
    mode: String,

    /// Input dataset path
    #[arg(long, env = "ONECLICK_INPUT")]
    input: PathBuf,

    /// Output dataset path
    #[arg(long, env = "ONECLICK_OUTPUT")]
    output: PathBuf,

    /// Optional top-20 artifact path
    #[arg(long, env = "ONECLICK_TOP20")]
    top20: Option<PathBuf>,

    /// TOML runner configuration
    #[arg(long, env = "ONECLICK_CONFIG")]
    config: Option<PathBuf>,

    /// Status document directory (default: the output's directory)
    #[arg(long, env = "ONECLICK_STATUS_DIR")]
    status_dir: Option<PathBuf>,

    /// Program that runs the job scripts, e.g. python3
    #[arg(long, alias = "python", env = "ONECLICK_INTERPRETER")]
    interpreter: Option<PathBuf>,

    #[arg(long, env = "ONECLICK_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Run identifier (default: local start time)
    #[arg(long, env = "ONECLICK_RUN_ID")]
    run_id: Option<String>,

    /// Primary job script
    #[arg(long, env = "ONECLICK_PRIMARY")]
    primary: Option<PathBuf>,

    /// Fallback job script
    #[arg(long, env = "ONECLICK_FALLBACK")]
    fallback: Option<PathBuf>,

    /// Run ledger path
    #[arg(long, env = "ONECLICK_LEDGER")]
    ledger: Option<PathBuf>,

    /// Kill a job after this many seconds
    #[arg(long, env = "ONECLICK_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    /// Column the output must contain (repeatable or comma-separated)
    #[arg(long = "require-column", value_delimiter = ',')]
    require_columns: Vec<String>,

    /// Column the top-20 artifact must contain
    #[arg(long = "top-require-column", value_delimiter = ',')]
    top_require_columns: Vec<String>,

    /// Hold an exclusive lock on the output directory
    #[arg(long)]
    lock: bool,

    /// Validate prerequisites only, run nothing
    #[arg(long, alias = "dry_run")]
    dry_run: bool,

    /// Create a sample input if the input is missing
    #[arg(long, alias = "self_check")]
    self_check: bool,
}

impl Args {
    fn runner_config(&self) -> Result<RunnerConfig> {
        let mut config = match &self.config {
            Some(path) => RunnerConfig::from_file(path)?,
            None => RunnerConfig::default(),
        };

        if let Some(dir) = &self.status_dir {
            config.status_dir = Some(dir.clone());
        }
        if let Some(interpreter) = &self.interpreter {
            config.interpreter = Some(interpreter.clone());
        }
        if let Some(dir) = &self.log_dir {
            config.log_dir = dir.clone();
        }
        if let Some(script) = &self.primary {
            config.primary = JobSpec::new(script);
        }
        if let Some(script) = &self.fallback {
            config.fallback = JobSpec::new(script);
        }
        if let Some(path) = &self.ledger {
            config.ledger_path = path.clone();
        }
        if let Some(secs) = self.timeout_secs {
            config.job_timeout_secs = Some(secs);
        }
        if !self.require_columns.is_empty() {
            config.required_columns = self.require_columns.clone();
        }
        if !self.top_require_columns.is_empty() {
            config.top_required_columns = self.top_require_columns.clone();
        }
        if self.lock {
            config.lock_output_dir = true;
        }
        Ok(config)
    }

    fn request(&self) -> RunRequest {
        RunRequest {
            mode: self.mode.clone(),
            input: self.input.clone(),
            output: self.output.clone(),
            top_artifact: self.top20.clone(),
            run_id: self.run_id.clone(),
            self_check: self.self_check,
        }
    }
}

// =============================================================================
// MAIN
// =============================================================================

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenv().ok();
    init_tracing();

    let args = Args::parse();
    let code = match run(&args).await {
        Ok(code) => code,
        Err(e) => {
            error!("oneclick_run failed: {:#}", e);
            exit_code_for(&e)
        }
    };
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

async fn run(args: &Args) -> Result<i32> {
    let config = args.runner_config()?;
    let orchestrator =
        Orchestrator::new(config, JobRunner::new()).context("invalid runner configuration")?;
    let request = args.request();

    if args.dry_run {
        let report = orchestrator.dry_run(&request)?;
        info!("Dry run log: {}", report.log_path.display());
        return Ok(report.exit_code());
    }

    let report = orchestrator.run(&request).await?;
    Ok(report.exit_code())
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<OrchestratorError>()
        .map(OrchestratorError::exit_code)
        .unwrap_or(exit_codes::INTERNAL_ERROR)
}

/// Logs go to stderr; stdout carries the job's own output and the run narrative.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "betterbot_runner=info,oneclick_run=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
