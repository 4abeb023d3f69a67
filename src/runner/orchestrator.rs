//! Two-Tier Orchestrator
//!
//! One cycle is a fixed state machine:
//!
//! ```text
//! START -> RUN_PRIMARY -> VALIDATE_PRIMARY -+-> DONE_SUCCESS (PRIMARY)
//!                                           +-> DONE_FAILED  (divergence, no fallback)
//!                                           +-> RUN_FALLBACK -> VALIDATE_FALLBACK -+-> DONE_SUCCESS (FALLBACK)
//!                                                                                  +-> DONE_FAILED
//! ```
//!
//! The fallback writes to tagged paths (`out__FALLBACK.csv`) and its records go
//! to the tagged status location, so a fallback cycle never replaces a primary
//! artifact or the primary's last known-good record. Every terminal state
//! writes one status document and one ledger entry.
//!
//! Stability is judged against the location's last SUCCESS record, never the
//! current one: a divergence or missing-input record does not reset the
//! baseline, so a repeated regression keeps failing.

use crate::runner::config::{JobSpec, RunnerConfig};
use crate::runner::error::{ConfigError, OrchestratorError, StabilityDivergence};
use crate::runner::hasher::sha256_file;
use crate::runner::job::{append_log_line, JobExecutor, JobInvocation};
use crate::runner::ledger::RunLedger;
use crate::runner::lock::OutputLock;
use crate::runner::paths::{absolutize, default_run_id, log_file_path, tagged_path};
use crate::runner::record::{
    exit_codes, ArtifactSummary, ExecutionAttempt, RunOutcome, RunRecord, Tier, UsedCore,
};
use crate::runner::run_key::RunKey;
use crate::runner::stability::StabilityChecker;
use crate::runner::status_store::{StatusLocation, StatusStore};
use crate::runner::validator::OutputValidator;
use chrono::{Local, SecondsFormat, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Input written by `--self-check` when the input file is missing.
pub const SELF_CHECK_SAMPLE: &str = "\
code,name,market,close,volume,trade_value,turnover,short_used_ratio,margin_used_ratio
2330,TSMC,TWSE,600,1000000,600000000,0.08,0.05,0.20
2317,HonHai,TWSE,120,2000000,240000000,0.05,0.02,0.10
6488,GlobalWafers,TWO,900,300000,270000000,0.10,0.12,0.45
";

// =============================================================================
// REQUEST / REPORTS
// =============================================================================

/// One orchestration request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub mode: String,
    pub input: PathBuf,
    pub output: PathBuf,
    pub top_artifact: Option<PathBuf>,
    /// Defaults to the local start time.
    pub run_id: Option<String>,
    /// Create a sample input if the input file is missing.
    pub self_check: bool,
}

impl RunRequest {
    pub fn new(mode: impl Into<String>, input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            mode: mode.into(),
            input: input.into(),
            output: output.into(),
            top_artifact: None,
            run_id: None,
            self_check: false,
        }
    }

    pub fn with_top_artifact(mut self, path: impl Into<PathBuf>) -> Self {
        self.top_artifact = Some(path.into());
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }
}

/// Result of a completed cycle. The record has already been persisted.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub record: RunRecord,
    pub status_location: StatusLocation,
}

impl RunReport {
    pub fn outcome(&self) -> RunOutcome {
        self.record.outcome
    }

    pub fn exit_code(&self) -> i32 {
        self.record.outcome.exit_code()
    }
}

#[derive(Debug, Clone)]
pub struct DryRunReport {
    pub problems: Vec<String>,
    pub log_path: PathBuf,
}

impl DryRunReport {
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_ok() {
            exit_codes::SUCCESS
        } else {
            exit_codes::DRY_RUN_FAILED
        }
    }
}

// =============================================================================
// INTERNAL STATE
// =============================================================================

/// Absolute paths for one cycle.
#[derive(Debug)]
struct Cycle {
    mode: String,
    input: PathBuf,
    output: PathBuf,
    top: Option<PathBuf>,
    run_id: String,
    log_path: PathBuf,
    status_dir: PathBuf,
}

#[derive(Debug)]
struct ResolvedTier {
    tier: Tier,
    script: PathBuf,
    working_dir: PathBuf,
}

impl ResolvedTier {
    fn resolve(tier: Tier, spec: &JobSpec) -> io::Result<Self> {
        let spec = JobSpec {
            script: absolutize(&spec.script)?,
            working_dir: spec.working_dir.as_deref().map(absolutize).transpose()?,
        };
        Ok(Self {
            tier,
            working_dir: spec.resolved_working_dir(),
            script: spec.script,
        })
    }
}

/// How an attempt's outputs were judged.
enum Verdict {
    Accepted {
        output: ArtifactSummary,
        top: Option<ArtifactSummary>,
    },
    Rejected(String),
    Diverged(StabilityDivergence),
}

// =============================================================================
// ORCHESTRATOR
// =============================================================================

pub struct Orchestrator<E: JobExecutor> {
    config: RunnerConfig,
    executor: E,
    validator: OutputValidator,
    stability: StabilityChecker,
    status: StatusStore,
    ledger: RunLedger,
}

impl<E: JobExecutor> Orchestrator<E> {
    pub fn new(config: RunnerConfig, executor: E) -> Result<Self, ConfigError> {
        config.validate()?;
        let validator = OutputValidator::new(
            config.required_columns.clone(),
            config.top_required_columns.clone(),
        );
        let status = StatusStore::new(config.status_retry.clone());
        let ledger = RunLedger::new(config.ledger_path.clone(), config.status_retry.clone());
        Ok(Self {
            config,
            executor,
            validator,
            stability: StabilityChecker::new(),
            status,
            ledger,
        })
    }

    pub fn ledger(&self) -> &RunLedger {
        &self.ledger
    }

    /// Run one full cycle and persist its record.
    ///
    /// Attempt failures are part of the returned report. `Err` means the cycle
    /// could not be recorded (persistence, lock, unreadable input).
    pub async fn run(&self, req: &RunRequest) -> Result<RunReport, OrchestratorError> {
        let cycle = self.resolve(req)?;
        let primary = ResolvedTier::resolve(Tier::Primary, &self.config.primary)?;
        let fallback = ResolvedTier::resolve(Tier::Fallback, &self.config.fallback)?;

        if let Some(parent) = cycle.output.parent() {
            fs::create_dir_all(parent)?;
        }
        if let Some(parent) = cycle.top.as_deref().and_then(Path::parent) {
            fs::create_dir_all(parent)?;
        }

        let _lock = match (self.config.lock_output_dir, cycle.output.parent()) {
            (true, Some(dir)) => {
                let lock = OutputLock::acquire(dir)?;
                info!("Holding output lock {}", lock.path().display());
                Some(lock)
            }
            _ => None,
        };

        self.write_header(&cycle, &primary, &fallback);
        info!(
            "Cycle {} started: mode={} input={} output={}",
            cycle.run_id,
            cycle.mode,
            cycle.input.display(),
            cycle.output.display()
        );

        if req.self_check && !cycle.input.exists() {
            write_self_check_input(&cycle.input)?;
            narrate(
                &cycle.log_path,
                &format!("[SELF_CHECK] Created test input: {}", cycle.input.display()),
            );
        }

        let primary_location = StatusLocation::primary(&cycle.status_dir);
        let fallback_location = StatusLocation::fallback(&cycle.status_dir, &self.config.fallback_tag);

        // START
        let problems = preflight_problems(&cycle, &primary);
        if !problems.is_empty() {
            let message = problems.join("\n");
            error!("Missing prerequisite: {}", message.replace('\n', "; "));
            narrate(&cycle.log_path, &format!("\n[FAILED] {}", message));
            let run_key = RunKey::new(&cycle.mode, &cycle.input, "", &cycle.output)
                .with_top_artifact(cycle.top.clone());
            let mut record = draft(&cycle, run_key, RunOutcome::MissingPrerequisite, UsedCore::None);
            record.primary_error = Some(message);
            return self.finish(&cycle, record, primary_location);
        }

        let run_key =
            RunKey::for_input(&cycle.mode, &cycle.input, &cycle.output, cycle.top.as_deref())?;
        info!("Run key {} (input_sha256={})", run_key, run_key.input_sha256);
        let previous = self.status.read_last_good(&primary_location);

        // RUN_PRIMARY / VALIDATE_PRIMARY
        narrate(
            &cycle.log_path,
            &format!("\n[PRIMARY] Running: {}", primary.script.display()),
        );
        let attempt = self
            .execute(&primary, &cycle, &cycle.output, cycle.top.as_deref())
            .await;

        let primary_reason = match self.judge(&attempt, &run_key, previous.as_ref()) {
            Verdict::Accepted { output, top } => {
                let mut record = draft(&cycle, run_key, RunOutcome::Healthy, UsedCore::Primary);
                record.output = output;
                record.top_artifact = top;
                record.primary_returncode = attempt.exit_code;
                narrate(
                    &cycle.log_path,
                    &format!("\n[SUCCESS] Primary run completed. Log: {}", cycle.log_path.display()),
                );
                return self.finish(&cycle, record, primary_location);
            }
            Verdict::Diverged(divergence) => {
                error!("Primary output diverged: {}", divergence);
                narrate(
                    &cycle.log_path,
                    &banner(&format!("HARD FAILURE, NO FALLBACK: {}", divergence)),
                );
                let mut record =
                    draft(&cycle, run_key, RunOutcome::PrimaryDivergence, UsedCore::None);
                record.primary_returncode = attempt.exit_code;
                record.primary_error = Some(divergence.to_string());
                return self.finish(&cycle, record, primary_location);
            }
            Verdict::Rejected(reason) => reason,
        };

        // RUN_FALLBACK / VALIDATE_FALLBACK
        warn!("Primary rejected, falling back: {}", primary_reason);
        narrate(
            &cycle.log_path,
            &banner(&format!("FALLBACK TRIGGERED: {}", primary_reason)),
        );

        let tag = &self.config.fallback_tag;
        let fallback_output = tagged_path(&cycle.output, tag);
        let fallback_top = cycle.top.as_deref().map(|p| tagged_path(p, tag));
        let fallback_previous = self.status.read_last_good(&fallback_location);

        narrate(
            &cycle.log_path,
            &format!("\n[FALLBACK] Running: {}", fallback.script.display()),
        );
        let fallback_attempt = self
            .execute(&fallback, &cycle, &fallback_output, fallback_top.as_deref())
            .await;

        let verdict = self.judge(&fallback_attempt, &run_key, fallback_previous.as_ref());
        let mut record = match verdict {
            Verdict::Accepted { output, top } => {
                narrate(
                    &cycle.log_path,
                    &format!("\n[SUCCESS] Fallback run completed. Log: {}", cycle.log_path.display()),
                );
                let mut record = draft(&cycle, run_key, RunOutcome::Degraded, UsedCore::Fallback);
                record.output = output;
                record.top_artifact = top;
                record
            }
            Verdict::Diverged(divergence) => {
                error!("Fallback output diverged: {}", divergence);
                narrate(
                    &cycle.log_path,
                    &format!("\n[FAILED] Fallback output diverged: {}", divergence),
                );
                let mut record =
                    draft(&cycle, run_key, RunOutcome::FallbackDivergence, UsedCore::None);
                record.output = ArtifactSummary::inspect(&fallback_output);
                record.top_artifact = fallback_top.as_deref().map(ArtifactSummary::inspect);
                record.fallback_error = Some(divergence.to_string());
                record
            }
            Verdict::Rejected(reason) => {
                error!("Fallback rejected: {}", reason);
                narrate(
                    &cycle.log_path,
                    &format!(
                        "\n[FAILED] Fallback also failed or outputs invalid. Log: {}",
                        cycle.log_path.display()
                    ),
                );
                let mut record = draft(&cycle, run_key, RunOutcome::Failed, UsedCore::None);
                record.fallback_error = Some(reason);
                record
            }
        };
        record.primary_returncode = attempt.exit_code;
        record.fallback_returncode = fallback_attempt.exit_code;
        record.primary_error = Some(primary_reason);
        self.finish(&cycle, record, fallback_location)
    }

    /// Check prerequisites without running anything or persisting a record.
    pub fn dry_run(&self, req: &RunRequest) -> Result<DryRunReport, OrchestratorError> {
        let cycle = self.resolve(req)?;
        let primary = ResolvedTier::resolve(Tier::Primary, &self.config.primary)?;
        let fallback = ResolvedTier::resolve(Tier::Fallback, &self.config.fallback)?;
        self.write_header(&cycle, &primary, &fallback);

        if !fallback.script.exists() {
            warn!("Fallback script missing: {}", fallback.script.display());
        }

        let problems = preflight_problems(&cycle, &primary);
        if problems.is_empty() {
            narrate(&cycle.log_path, "[DRY_RUN] OK. No execution performed.");
        } else {
            let lines: Vec<String> = problems.iter().map(|p| format!("- {}", p)).collect();
            narrate(
                &cycle.log_path,
                &format!("DRY_RUN failed:\n{}", lines.join("\n")),
            );
        }
        Ok(DryRunReport {
            problems,
            log_path: cycle.log_path,
        })
    }

    fn resolve(&self, req: &RunRequest) -> io::Result<Cycle> {
        let input = absolutize(&req.input)?;
        let output = absolutize(&req.output)?;
        let top = req.top_artifact.as_deref().map(absolutize).transpose()?;
        let run_id = req
            .run_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| default_run_id(Local::now()));
        let log_dir = absolutize(&self.config.log_dir)?;
        let log_path = log_file_path(&log_dir, &req.mode, &input, &run_id);
        let status_dir = match &self.config.status_dir {
            Some(dir) => absolutize(dir)?,
            None => output
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("/")),
        };
        Ok(Cycle {
            mode: req.mode.clone(),
            input,
            output,
            top,
            run_id,
            log_path,
            status_dir,
        })
    }

    fn write_header(&self, cycle: &Cycle, primary: &ResolvedTier, fallback: &ResolvedTier) {
        let top = cycle
            .top
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let lines = [
            format!(
                "[START] {}",
                Local::now().to_rfc3339_opts(SecondsFormat::Secs, false)
            ),
            format!("[RUN_ID] {}", cycle.run_id),
            format!("[MODE] {}", cycle.mode),
            format!("[INPUT] {}", cycle.input.display()),
            format!("[OUTPUT] {}", cycle.output.display()),
            format!("[TOP20] {}", top),
            format!("[PRIMARY_SCRIPT] {}", primary.script.display()),
            format!("[FALLBACK_SCRIPT] {}", fallback.script.display()),
        ];
        for line in &lines {
            log_only(&cycle.log_path, line);
        }
    }

    async fn execute(
        &self,
        tier: &ResolvedTier,
        cycle: &Cycle,
        output: &Path,
        top: Option<&Path>,
    ) -> ExecutionAttempt {
        let invocation = JobInvocation {
            interpreter: self.config.interpreter.clone(),
            script: tier.script.clone(),
            args: job_args(
                &cycle.mode,
                &cycle.input,
                output,
                top,
                &self.config.top_artifact_flag,
            ),
            working_dir: tier.working_dir.clone(),
            log_path: cycle.log_path.clone(),
            timeout: self.config.job_timeout(),
        };

        let started_at = Utc::now();
        let result = self.executor.run(&invocation).await;
        let finished_at = Utc::now();

        let (exit_code, error) = match result {
            Ok(code) => (Some(code), None),
            Err(e) => {
                warn!("{} job did not complete: {}", tier.tier.as_str(), e);
                (None, Some(e.to_string()))
            }
        };
        let attempt = ExecutionAttempt {
            tier: tier.tier,
            script: tier.script.clone(),
            exit_code,
            started_at,
            finished_at,
            log_path: cycle.log_path.clone(),
            output: output.to_path_buf(),
            top_artifact: top.map(Path::to_path_buf),
            error,
        };
        info!(
            "{} attempt finished: returncode={:?} duration={}ms",
            attempt.tier.as_str(),
            attempt.exit_code,
            attempt.duration_ms()
        );
        attempt
    }

    /// Exit code, output contract, then stability against the last-good record.
    fn judge(
        &self,
        attempt: &ExecutionAttempt,
        run_key: &RunKey,
        previous: Option<&RunRecord>,
    ) -> Verdict {
        let label = attempt.tier.as_str().to_lowercase();

        if !attempt.succeeded() {
            let reason = match (&attempt.error, attempt.exit_code) {
                (Some(err), _) => format!("{} process could not run: {}", label, err),
                (None, Some(code)) => format!("{} process failed (returncode={})", label, code),
                (None, None) => format!("{} process produced no exit code", label),
            };
            return Verdict::Rejected(reason);
        }

        let report = self
            .validator
            .validate(&attempt.output, attempt.top_artifact.as_deref());
        if !report.is_ok() {
            return Verdict::Rejected(format!("{} output invalid: {}", label, report.summary()));
        }

        let output = match summarize(&attempt.output) {
            Ok(summary) => summary,
            Err(e) => return Verdict::Rejected(format!("{} output unreadable: {}", label, e)),
        };
        let top = match attempt.top_artifact.as_deref().map(summarize).transpose() {
            Ok(top) => top,
            Err(e) => return Verdict::Rejected(format!("{} top artifact unreadable: {}", label, e)),
        };

        if let Err(divergence) = self.stability.check(
            run_key,
            previous,
            &output.sha256,
            top.as_ref().map(|t| t.sha256.as_str()),
        ) {
            return Verdict::Diverged(divergence);
        }
        Verdict::Accepted { output, top }
    }

    /// Persist status then ledger. Both are attempted even if the first fails.
    fn finish(
        &self,
        cycle: &Cycle,
        record: RunRecord,
        location: StatusLocation,
    ) -> Result<RunReport, OrchestratorError> {
        let status_result = self.status.write(&location, &record);
        if let Err(e) = &status_result {
            error!("Status write failed: {}", e);
        }
        let ledger_result = self.ledger.append(&record, &self.config.retention());
        if let Err(e) = &ledger_result {
            error!("Ledger append to {} failed: {}", self.ledger.path().display(), e);
        }
        status_result?;
        ledger_result?;

        narrate(
            &cycle.log_path,
            &format!("[STATUS] {}", location.json_path().display()),
        );
        info!(
            "Cycle {} finished: result={} used_core={} exit_code={}",
            record.run_id,
            record.result.as_str(),
            record.used_core.as_str(),
            record.outcome.exit_code()
        );
        Ok(RunReport {
            record,
            status_location: location,
        })
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// Arguments of the job contract: `--mode m --input i --output o [--top20 t]`.
pub fn job_args(
    mode: &str,
    input: &Path,
    output: &Path,
    top: Option<&Path>,
    top_flag: &str,
) -> Vec<String> {
    let mut args = vec![
        "--mode".to_string(),
        mode.to_string(),
        "--input".to_string(),
        input.display().to_string(),
        "--output".to_string(),
        output.display().to_string(),
    ];
    if let Some(top) = top {
        args.push(top_flag.to_string());
        args.push(top.display().to_string());
    }
    args
}

fn preflight_problems(cycle: &Cycle, primary: &ResolvedTier) -> Vec<String> {
    let mut problems = Vec::new();
    if !primary.script.exists() {
        problems.push(format!("Primary script not found: {}", primary.script.display()));
    }
    if !cycle.input.exists() {
        problems.push(format!("Input missing: {}", cycle.input.display()));
    }
    problems
}

/// Record skeleton with artifacts inspected from disk.
fn draft(cycle: &Cycle, run_key: RunKey, outcome: RunOutcome, used_core: UsedCore) -> RunRecord {
    RunRecord {
        timestamp: Utc::now(),
        run_id: cycle.run_id.clone(),
        run_key,
        result: outcome.result(),
        used_core,
        outcome,
        output: ArtifactSummary::inspect(&cycle.output),
        top_artifact: cycle.top.as_deref().map(ArtifactSummary::inspect),
        log: cycle.log_path.clone(),
        primary_returncode: None,
        fallback_returncode: None,
        primary_error: None,
        fallback_error: None,
    }
}

fn summarize(path: &Path) -> io::Result<ArtifactSummary> {
    let bytes = fs::metadata(path)?.len();
    let sha256 = sha256_file(path)?;
    Ok(ArtifactSummary::with_hash(path, bytes, sha256))
}

fn write_self_check_input(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, SELF_CHECK_SAMPLE)
}

fn banner(text: &str) -> String {
    let bar = "!".repeat(80);
    format!("\n{}\n{}\n{}\n", bar, text, bar)
}

/// Console and run log.
fn narrate(log_path: &Path, text: &str) {
    println!("{}", text);
    log_only(log_path, text);
}

fn log_only(log_path: &Path, text: &str) {
    if let Err(e) = append_log_line(log_path, text) {
        warn!("Cannot append to run log {}: {}", log_path.display(), e);
    }
}
