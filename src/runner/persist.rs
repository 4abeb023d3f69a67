//! Atomic file replacement with bounded retry.
//!
//! Content goes to a temp file in the destination directory, is synced, then
//! renamed over the target. Readers see either the old or the new file.

use crate::runner::error::PersistenceError;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Retry schedule for transient write failures (e.g. target briefly locked).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub attempts: u32,
    /// Delay before retry `i` is `delays_ms[min(i, len - 1)]`.
    pub delays_ms: Vec<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delays_ms: vec![200, 500, 1000],
        }
    }
}

impl RetryPolicy {
    /// No sleeping between attempts (tests).
    pub fn immediate(attempts: u32) -> Self {
        Self {
            attempts,
            delays_ms: vec![0],
        }
    }

    pub fn delay_for(&self, retry_index: usize) -> Duration {
        let ms = self
            .delays_ms
            .get(retry_index)
            .or_else(|| self.delays_ms.last())
            .copied()
            .unwrap_or(0);
        Duration::from_millis(ms)
    }
}

/// Temp path in the same directory as `path`, unique per process.
fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "tmpfile".to_string());
    path.with_file_name(format!(".{}.tmp.{}", name, std::process::id()))
}

fn write_once(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = temp_path_for(path);
    let result = (|| {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Atomically replace `path` with `bytes`, retrying per `policy`.
pub fn write_atomic(path: &Path, bytes: &[u8], policy: &RetryPolicy) -> Result<(), PersistenceError> {
    let attempts = policy.attempts.max(1) as usize;
    let mut last_err = None;

    for attempt in 0..attempts {
        match write_once(path, bytes) {
            Ok(()) => return Ok(()),
            Err(e) => {
                if attempt + 1 < attempts {
                    let delay = policy.delay_for(attempt);
                    warn!(
                        "Write to {} failed (attempt {}/{}): {}; retrying in {:?}",
                        path.display(),
                        attempt + 1,
                        attempts,
                        e,
                        delay
                    );
                    std::thread::sleep(delay);
                }
                last_err = Some(e);
            }
        }
    }

    Err(PersistenceError::Io {
        path: path.to_path_buf(),
        source: last_err.unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "no attempts")),
    })
}

/// Serialize as pretty JSON (trailing newline) and write atomically.
pub fn write_json_atomic<T: Serialize>(
    path: &Path,
    value: &T,
    policy: &RetryPolicy,
) -> Result<(), PersistenceError> {
    let mut bytes =
        serde_json::to_vec_pretty(value).map_err(|source| PersistenceError::Serialization {
            path: path.to_path_buf(),
            source,
        })?;
    bytes.push(b'\n');
    write_atomic(path, &bytes, policy)
}
