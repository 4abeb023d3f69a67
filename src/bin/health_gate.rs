//! Health Gate
//!
//! Reads the run ledger and exits non-zero when the pipeline needs attention,
//! leaving an alert file behind for whoever watches it.
//!
//! # Exit Codes
//!
//! - 0: Healthy (alert file removed)
//! - 30: No history
//! - 31: FAILED run in the recent window
//! - 32: Fallback share of SUCCESS runs above threshold

use anyhow::Result;
use betterbot_runner::runner::{
    apply_alert, HealthConfig, HealthGate, RetryPolicy, RunLedger, ALERT_FILE_NAME,
};
use chrono::Utc;
use clap::Parser;
use dotenv::dotenv;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "health_gate")]
#[command(about = "Pipeline health gate based on the run ledger")]
struct Args {
    #[arg(long, env = "ONECLICK_LEDGER", default_value = "run_summary.jsonl")]
    ledger: PathBuf,

    /// Alert file (default: HEALTH_ALERT.txt next to the ledger)
    #[arg(long, env = "ONECLICK_HEALTH_ALERT")]
    alert: Option<PathBuf>,

    /// Window (days) for the fallback ratio
    #[arg(long, alias = "window_days", default_value_t = 7)]
    window_days: i64,

    /// Alert if the fallback ratio is above this (0..1)
    #[arg(long, alias = "fb_ratio", default_value_t = 0.40)]
    fb_ratio: f64,

    /// SUCCESS samples required to evaluate the ratio
    #[arg(long, alias = "min_samples", default_value_t = 5)]
    min_samples: usize,

    /// Read only the newest N entries (0 = all)
    #[arg(long, alias = "max_rows", default_value_t = 200)]
    max_rows: usize,

    /// Window (hours) in which any FAILED run alerts
    #[arg(long, alias = "recent_hours", default_value_t = 48)]
    recent_hours: i64,
}

fn main() -> Result<ExitCode> {
    dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "betterbot_runner=info,health_gate=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let alert_path = args.alert.clone().unwrap_or_else(|| {
        args.ledger
            .parent()
            .map(|dir| dir.join(ALERT_FILE_NAME))
            .unwrap_or_else(|| PathBuf::from(ALERT_FILE_NAME))
    });

    let retry = RetryPolicy::default();
    let ledger = RunLedger::new(&args.ledger, retry.clone());
    let entries = ledger.load();
    let gate = HealthGate::new(HealthConfig {
        window_days: args.window_days,
        fallback_ratio: args.fb_ratio,
        min_samples: args.min_samples,
        max_rows: args.max_rows,
        recent_hours: args.recent_hours,
    });

    let verdict = gate.evaluate(&entries, Utc::now());
    apply_alert(&alert_path, &verdict, &retry)?;

    match verdict.alert_message() {
        Some(message) => println!("[HEALTH] ALERT\n{}", message),
        None => println!(
            "[HEALTH] OK ({} entries in {})",
            entries.len(),
            ledger.path().display()
        ),
    }
    info!("Health verdict exit_code={}", verdict.exit_code());

    Ok(ExitCode::from(u8::try_from(verdict.exit_code()).unwrap_or(1)))
}
