//! Job Execution
//!
//! Launches a tier's job as a child process. Stdout and stderr are merged
//! line by line and each line is echoed to the console and appended to the
//! run log as soon as it arrives, so a killed child loses nothing already
//! printed. The log is opened in append mode: one file collects both tiers of
//! a run.
//!
//! A non-zero exit code is returned as a value. Only conditions that prevent
//! getting an exit code at all (missing executable, spawn failure, timeout)
//! are errors.
//!
//! The attempt ends when the child exits, not when its pipes close: a
//! background process left holding stdout gets `OUTPUT_GRACE` to flush, then
//! is ignored. The timeout covers the child's own lifetime only.

use crate::runner::error::JobError;
use async_trait::async_trait;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// How long output still in flight is forwarded after the child exits.
pub const OUTPUT_GRACE: Duration = Duration::from_millis(500);

// =============================================================================
// INVOCATION
// =============================================================================

/// Everything needed to launch one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInvocation {
    /// Program that runs `script`. `None` executes `script` directly.
    pub interpreter: Option<PathBuf>,
    pub script: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub log_path: PathBuf,
    pub timeout: Option<Duration>,
}

impl JobInvocation {
    pub fn command_line(&self) -> String {
        let mut parts = Vec::new();
        if let Some(interp) = &self.interpreter {
            parts.push(interp.display().to_string());
        }
        parts.push(self.script.display().to_string());
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }

    /// Value of `--flag` in the argument list.
    pub fn arg_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }
}

/// Runs a job to completion and reports its exit code.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn run(&self, invocation: &JobInvocation) -> Result<i32, JobError>;
}

// =============================================================================
// CHILD PROCESS RUNNER
// =============================================================================

#[derive(Debug, Clone)]
pub struct JobRunner {
    echo_to_console: bool,
}

impl Default for JobRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRunner {
    pub fn new() -> Self {
        Self {
            echo_to_console: true,
        }
    }

    /// Log file only; nothing on stdout.
    pub fn quiet() -> Self {
        Self {
            echo_to_console: false,
        }
    }
}

#[async_trait]
impl JobExecutor for JobRunner {
    async fn run(&self, inv: &JobInvocation) -> Result<i32, JobError> {
        if !inv.script.exists() {
            return Err(JobError::NotFound(inv.script.clone()));
        }
        if !inv.working_dir.is_dir() {
            return Err(JobError::NotFound(inv.working_dir.clone()));
        }

        let mut log = open_log(&inv.log_path)?;
        writeln!(log, "\n{}", "=".repeat(80))?;
        writeln!(log, "[RUN] cwd={}", inv.working_dir.display())?;
        writeln!(log, "[CMD] {}", inv.command_line())?;
        log.flush()?;

        let (program, mut cmd) = match &inv.interpreter {
            Some(interp) => {
                let mut c = Command::new(interp);
                c.arg(&inv.script);
                (interp.clone(), c)
            }
            None => (inv.script.clone(), Command::new(&inv.script)),
        };
        cmd.args(&inv.args)
            .current_dir(&inv.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(JobError::NotFound(program));
            }
            Err(e) => return Err(JobError::Spawn(e)),
        };
        debug!("Spawned pid={:?}: {}", child.id(), inv.command_line());

        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_lines(stderr, tx.clone()));
        }
        drop(tx);

        let echo = self.echo_to_console;
        let waited = {
            let forward = forward_until_exit(&mut rx, &mut log, echo, &mut child);
            match inv.timeout {
                Some(limit) => tokio::time::timeout(limit, forward).await,
                None => Ok(forward.await),
            }
        };

        let status = match waited {
            Ok(result) => result?,
            Err(_) => {
                let limit = inv.timeout.unwrap_or_default();
                warn!(
                    "Job exceeded {}s, killing pid={:?}",
                    limit.as_secs_f64(),
                    child.id()
                );
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill timed-out job: {}", e);
                }
                drain_after_exit(&mut rx, &mut log, echo).await?;
                writeln!(log, "[TIMEOUT] killed after {}s", limit.as_secs_f64())?;
                log.flush()?;
                return Err(JobError::Timeout { after: limit });
            }
        };

        drain_after_exit(&mut rx, &mut log, echo).await?;
        let code = exit_code_of(status);
        writeln!(log, "[EXIT] returncode={}", code)?;
        log.flush()?;
        Ok(code)
    }
}

fn open_log(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Append one line to a run log, creating it if needed.
pub fn append_log_line(path: &Path, text: &str) -> io::Result<()> {
    let mut log = open_log(path)?;
    writeln!(log, "{}", text)?;
    log.flush()
}

async fn pump_lines<R: AsyncRead + Unpin>(reader: R, tx: mpsc::UnboundedSender<Vec<u8>>) {
    let mut reader = BufReader::new(reader);
    loop {
        let mut line = Vec::new();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                if tx.send(line).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("Stopped reading job output: {}", e);
                break;
            }
        }
    }
}

/// Forward lines while the child runs; return as soon as it exits.
async fn forward_until_exit(
    rx: &mut mpsc::UnboundedReceiver<Vec<u8>>,
    log: &mut File,
    echo: bool,
    child: &mut Child,
) -> io::Result<ExitStatus> {
    let mut pipes_open = true;
    loop {
        tokio::select! {
            status = child.wait() => return status,
            line = rx.recv(), if pipes_open => match line {
                Some(raw) => forward_line(log, echo, &raw)?,
                None => pipes_open = false,
            },
        }
    }
}

/// Forward output already in flight, for at most `OUTPUT_GRACE`.
async fn drain_after_exit(
    rx: &mut mpsc::UnboundedReceiver<Vec<u8>>,
    log: &mut File,
    echo: bool,
) -> io::Result<()> {
    let deadline = Instant::now() + OUTPUT_GRACE;
    loop {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(raw)) => forward_line(log, echo, &raw)?,
            Ok(None) => return Ok(()),
            Err(_) => {
                debug!("Output pipes still held after exit; detaching");
                return Ok(());
            }
        }
    }
}

fn forward_line(log: &mut File, echo: bool, raw: &[u8]) -> io::Result<()> {
    let mut text = String::from_utf8_lossy(raw).into_owned();
    if !text.ends_with('\n') {
        text.push('\n');
    }
    if echo {
        print!("{}", text);
        let _ = io::stdout().flush();
    }
    log.write_all(text.as_bytes())?;
    log.flush()
}

/// Exit code, or 128 + signal for signal-terminated children on unix.
fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}
