//! Log Cleanup
//!
//! Deletes run logs older than the retention period.

use anyhow::{Context, Result};
use betterbot_runner::runner::{cleanup_dir, DEFAULT_LOG_KEEP_DAYS};
use chrono::Utc;
use clap::Parser;
use dotenv::dotenv;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "cleanup_logs")]
#[command(about = "Delete run logs older than N days")]
struct Args {
    #[arg(long, env = "ONECLICK_LOG_DIR", default_value = "logs")]
    dir: PathBuf,

    #[arg(long, alias = "keep_days", default_value_t = DEFAULT_LOG_KEEP_DAYS)]
    keep_days: i64,
}

fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "betterbot_runner=info,cleanup_logs=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let removed = cleanup_dir(&args.dir, args.keep_days, Utc::now())
        .with_context(|| format!("cannot scan {}", args.dir.display()))?;

    info!("Removed {} file(s) from {}", removed, args.dir.display());
    println!("[CLEANUP] removed={} dir={}", removed, args.dir.display());
    Ok(())
}
