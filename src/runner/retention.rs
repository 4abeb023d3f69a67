//! Run log retention.

use crate::runner::ledger::MAX_RETENTION_DAYS;
use chrono::{DateTime, Duration, Utc};
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, warn};

pub const DEFAULT_LOG_KEEP_DAYS: i64 = 30;

/// Delete regular files in `dir` last modified before `now - keep_days`.
///
/// Not recursive. A missing directory removes nothing. Files that cannot be
/// inspected or removed are skipped with a warning. Returns the number removed.
pub fn cleanup_dir(dir: &Path, keep_days: i64, now: DateTime<Utc>) -> io::Result<usize> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    let cutoff = now - Duration::days(keep_days.clamp(0, MAX_RETENTION_DAYS));

    let mut removed = 0;
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry in {}: {}", dir.display(), e);
                continue;
            }
        };
        let path = entry.path();
        let modified = match entry.metadata().and_then(|m| {
            if m.is_file() {
                m.modified().map(Some)
            } else {
                Ok(None)
            }
        }) {
            Ok(Some(modified)) => DateTime::<Utc>::from(modified),
            Ok(None) => continue,
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };
        if modified >= cutoff {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("Removed {}", path.display());
                removed += 1;
            }
            Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::fs::File;
    use std::time::SystemTime;
    use tempfile::tempdir;

    fn touch(path: &Path, modified: DateTime<Utc>) {
        let file = File::create(path).unwrap();
        file.set_modified(SystemTime::from(modified)).unwrap();
    }

    #[test]
    fn test_removes_only_expired_files() {
        let dir = tempdir().unwrap();
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap();
        touch(&dir.path().join("old.log"), now - Duration::days(31));
        touch(&dir.path().join("fresh.log"), now - Duration::days(2));
        fs::create_dir(dir.path().join("nested")).unwrap();

        let removed = cleanup_dir(dir.path(), 30, now).unwrap();

        assert_eq!(removed, 1);
        assert!(!dir.path().join("old.log").exists());
        assert!(dir.path().join("fresh.log").exists());
        assert!(dir.path().join("nested").exists());
    }

    #[test]
    fn test_huge_keep_days_keeps_everything() {
        let dir = tempdir().unwrap();
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap();
        touch(&dir.path().join("old.log"), now - Duration::days(400));

        assert_eq!(cleanup_dir(dir.path(), i64::MAX, now).unwrap(), 0);
        assert!(dir.path().join("old.log").exists());
    }

    #[test]
    fn test_missing_dir_removes_nothing() {
        let dir = tempdir().unwrap();
        assert_eq!(
            cleanup_dir(&dir.path().join("absent"), 30, Utc::now()).unwrap(),
            0
        );
    }
}
