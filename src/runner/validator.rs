//! Output Contract Validation
//!
//! Checks that declared artifacts exist, are non-empty, and (for tabular
//! artifacts) carry the required header columns. Only the header row is read.
//! Any single problem invalidates the whole attempt.

use crate::runner::error::ValidationProblem;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

const UTF8_BOM: char = '\u{feff}';

/// Upper bound on bytes read when looking for the header line.
pub const MAX_HEADER_BYTES: u64 = 64 * 1024;

/// Outcome of validating one attempt's artifacts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub problems: Vec<ValidationProblem>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }

    /// Problems joined into one line for status documents.
    pub fn summary(&self) -> String {
        self.problems
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Column requirements for the two artifacts a job may declare.
#[derive(Debug, Clone, Default)]
pub struct OutputValidator {
    required_columns: Vec<String>,
    top_required_columns: Vec<String>,
}

impl OutputValidator {
    pub fn new(required_columns: Vec<String>, top_required_columns: Vec<String>) -> Self {
        Self {
            required_columns,
            top_required_columns,
        }
    }

    /// Validate the main output and, when declared, the top artifact.
    pub fn validate(&self, output: &Path, top_artifact: Option<&Path>) -> ValidationReport {
        let mut problems = check_artifact(output, &self.required_columns);
        if let Some(top) = top_artifact {
            problems.extend(check_artifact(top, &self.top_required_columns));
        }
        ValidationReport { problems }
    }
}

/// Existence, size and (for tabular files) header check for a single artifact.
pub fn check_artifact(path: &Path, required_columns: &[String]) -> Vec<ValidationProblem> {
    let meta = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(_) => {
            return vec![ValidationProblem::MissingArtifact {
                path: path.to_path_buf(),
            }]
        }
    };
    if !meta.is_file() {
        return vec![ValidationProblem::MissingArtifact {
            path: path.to_path_buf(),
        }];
    }
    if meta.len() == 0 {
        return vec![ValidationProblem::EmptyArtifact {
            path: path.to_path_buf(),
        }];
    }

    let Some(delimiter) = tabular_delimiter(path) else {
        return Vec::new();
    };
    if required_columns.is_empty() {
        return Vec::new();
    }

    match read_header(path, delimiter) {
        Ok(header) => {
            let missing: Vec<String> = required_columns
                .iter()
                .filter(|col| !header.iter().any(|h| h == *col))
                .cloned()
                .collect();
            if missing.is_empty() {
                Vec::new()
            } else {
                vec![ValidationProblem::SchemaMismatch {
                    path: path.to_path_buf(),
                    missing_columns: missing,
                }]
            }
        }
        Err(e) => vec![ValidationProblem::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }],
    }
}

/// Delimiter for file types whose header can be inspected.
fn tabular_delimiter(path: &Path) -> Option<char> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "csv" => Some(','),
        "tsv" => Some('\t'),
        _ => None,
    }
}

/// Read and split the first line only, at most `MAX_HEADER_BYTES` of it.
pub fn read_header(path: &Path, delimiter: char) -> std::io::Result<Vec<String>> {
    let mut reader = BufReader::new(File::open(path)?.take(MAX_HEADER_BYTES));
    let mut raw = Vec::new();
    reader.read_until(b'\n', &mut raw)?;
    let line = String::from_utf8_lossy(&raw);
    let line = line.trim_end_matches(&['\r', '\n'][..]);
    let line = line.strip_prefix(UTF8_BOM).unwrap_or(line);
    Ok(split_header(line, delimiter))
}

fn split_header(line: &str, delimiter: char) -> Vec<String> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            c if c == delimiter && !in_quotes => {
                cells.push(current.trim().to_string());
                current.clear();
            }
            c => current.push(c),
        }
    }
    cells.push(current.trim().to_string());
    cells
}
