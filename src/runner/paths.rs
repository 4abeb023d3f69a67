//! Path naming: tagged fallback artifacts, log files, run ids.

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

/// Default marker inserted before the extension of fallback-tier artifacts.
pub const DEFAULT_FALLBACK_TAG: &str = "__FALLBACK";

const MAX_TOKEN_LEN: usize = 60;

/// `out.csv` -> `out__FALLBACK.csv`; `out` -> `out__FALLBACK`.
///
/// The result never equals `path` for a non-empty tag.
pub fn tagged_path(path: &Path, tag: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}{}.{}", stem, tag, ext.to_string_lossy()),
        None => format!("{}{}", stem, tag),
    };
    path.with_file_name(name)
}

/// Keep `[A-Za-z0-9._-]`, map everything else to `_`, trim, cap length.
pub fn sanitize_token(s: &str) -> String {
    let mapped: String = s
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = mapped.trim_matches(|c| matches!(c, '.' | '_' | '-'));
    if trimmed.is_empty() {
        return "NA".to_string();
    }
    trimmed.chars().take(MAX_TOKEN_LEN).collect()
}

/// Timestamp-derived run identifier, e.g. `20260119_083000`.
pub fn default_run_id(now: DateTime<Local>) -> String {
    now.format("%Y%m%d_%H%M%S").to_string()
}

/// `{log_dir}/oneclick_{mode}_{input_stem}_{run_id}.log`
pub fn log_file_path(log_dir: &Path, mode: &str, input: &Path, run_id: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    log_dir.join(format!(
        "oneclick_{}_{}_{}.log",
        sanitize_token(mode),
        sanitize_token(&stem),
        sanitize_token(run_id)
    ))
}

/// Make `path` absolute against the current directory without touching the filesystem.
pub fn absolutize(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
