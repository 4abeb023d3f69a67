//! Exclusive lock on an output directory.
//!
//! A marker file created with `create_new`; the lock is released when the
//! guard drops. A stale marker left by a crashed run must be removed by hand.

use crate::runner::error::OrchestratorError;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const LOCK_FILE_NAME: &str = ".oneclick_run.lock";

#[derive(Debug)]
pub struct OutputLock {
    path: PathBuf,
}

impl OutputLock {
    pub fn acquire(dir: &Path) -> Result<Self, OrchestratorError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(LOCK_FILE_NAME);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                writeln!(file, "pid={}", std::process::id())?;
                debug!("Acquired output lock {}", path.display());
                Ok(Self { path })
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(OrchestratorError::LocationBusy(path))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for OutputLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to release output lock {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_second_acquire_is_busy_until_release() {
        let dir = tempdir().unwrap();
        let first = OutputLock::acquire(dir.path()).unwrap();
        assert!(first.path().exists());

        let err = OutputLock::acquire(dir.path()).unwrap_err();
        assert!(matches!(err, OrchestratorError::LocationBusy(_)));

        drop(first);
        assert!(!dir.path().join(LOCK_FILE_NAME).exists());
        assert!(OutputLock::acquire(dir.path()).is_ok());
    }
}
