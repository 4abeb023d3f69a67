//! Current-Status Documents
//!
//! One location holds exactly one current `RunRecord`, as a JSON document and a
//! text rendering side by side:
//!
//! ```text
//! <dir>/RUN_STATUS.json            primary tier
//! <dir>/RUN_STATUS.txt
//! <dir>/RUN_STATUS__FALLBACK.json  fallback tier (tagged, independent)
//! <dir>/RUN_STATUS__FALLBACK.txt
//! ```
//!
//! Each location also keeps its last SUCCESS record in
//! `<name>.last_good.json`. Only a SUCCESS write replaces it, so a FAILED
//! cycle (divergence, missing input) never erases the stability baseline.
//!
//! All files are replaced atomically. Reading tolerates missing or corrupt
//! documents by reporting no previous record.

use crate::runner::error::PersistenceError;
use crate::runner::persist::{write_atomic, write_json_atomic, RetryPolicy};
use crate::runner::record::RunRecord;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Base name of primary-tier status documents.
pub const STATUS_BASENAME: &str = "RUN_STATUS";

/// A directory plus a document base name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLocation {
    pub dir: PathBuf,
    pub name: String,
}

impl StatusLocation {
    pub fn new(dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            name: name.into(),
        }
    }

    /// Primary-tier location in `dir`.
    pub fn primary(dir: impl Into<PathBuf>) -> Self {
        Self::new(dir, STATUS_BASENAME)
    }

    /// Fallback-tier location in `dir`, named with `tag`.
    pub fn fallback(dir: impl Into<PathBuf>, tag: &str) -> Self {
        Self::new(dir, format!("{}{}", STATUS_BASENAME, tag))
    }

    pub fn json_path(&self) -> PathBuf {
        self.dir.join(format!("{}.json", self.name))
    }

    pub fn text_path(&self) -> PathBuf {
        self.dir.join(format!("{}.txt", self.name))
    }

    pub fn last_good_path(&self) -> PathBuf {
        self.dir.join(format!("{}.last_good.json", self.name))
    }
}

#[derive(Debug, Clone, Default)]
pub struct StatusStore {
    retry: RetryPolicy,
}

impl StatusStore {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    /// Replace the current record at `location`. JSON first, then text, then
    /// the last-good document when the record is a SUCCESS.
    pub fn write(&self, location: &StatusLocation, record: &RunRecord) -> Result<(), PersistenceError> {
        let json_path = location.json_path();
        write_json_atomic(&json_path, record, &self.retry)?;
        write_atomic(
            &location.text_path(),
            record.render_text().as_bytes(),
            &self.retry,
        )?;
        if record.is_success() {
            write_json_atomic(&location.last_good_path(), record, &self.retry)?;
        }
        debug!("Wrote status {} ({})", json_path.display(), record.result.as_str());
        Ok(())
    }

    /// Current record at `location`, or `None` if missing or unreadable.
    pub fn read_previous(&self, location: &StatusLocation) -> Option<RunRecord> {
        read_record(&location.json_path())
    }

    /// Last SUCCESS record at `location`.
    ///
    /// Locations written before the last-good document existed fall back to
    /// the current record when that one is a SUCCESS.
    pub fn read_last_good(&self, location: &StatusLocation) -> Option<RunRecord> {
        read_record(&location.last_good_path())
            .filter(RunRecord::is_success)
            .or_else(|| self.read_previous(location).filter(RunRecord::is_success))
    }
}

fn read_record(path: &Path) -> Option<RunRecord> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("Cannot read status {}: {}", path.display(), e);
            return None;
        }
    };
    match serde_json::from_str(&text) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!("Ignoring corrupt status {}: {}", path.display(), e);
            None
        }
    }
}
