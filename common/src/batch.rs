//! Sequential batch judging over a list of submission paths.

use crate::{JudgeError, Result, SubmissionResult, write_json};
use log::{info, warn};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

/// Read one submission path per line. Blank lines are skipped and stray trailing commas dropped.
///
/// # Errors
/// Returns an io error if the file cannot be read.
pub fn read_submission_list(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .map_err(|e| JudgeError::Io(format!("could not read {}: {e}", path.display())))?;
    Ok(parse_submission_list(&content))
}

#[must_use]
pub fn parse_submission_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|line| line.trim().trim_end_matches(',').trim())
        .filter(|line| !line.is_empty())
        .map(ToString::to_string)
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Process at most this many paths.
    pub limit: Option<usize>,
    /// Pause between items.
    pub delay: Duration,
    /// Rewritten with the report after every item.
    pub results_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub kind: String,
    pub message: String,
}

impl From<&JudgeError> for ItemFailure {
    fn from(e: &JudgeError) -> Self {
        Self {
            kind: e.kind().to_string(),
            message: e.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemOutcome {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<SubmissionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ItemFailure>,
}

impl ItemOutcome {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.result.is_some()
    }
}

/// Per-item outcomes in list order, plus why the batch stopped early if it did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub items: Vec<ItemOutcome>,
    pub halted: Option<String>,
}

impl BatchReport {
    #[must_use]
    pub fn successes(&self) -> usize {
        self.items.iter().filter(|i| i.succeeded()).count()
    }

    #[must_use]
    pub fn failures(&self) -> usize {
        self.items.len() - self.successes()
    }

    /// Human readable one-line summary.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut line = format!(
            "Completed {} submissions: {} successful, {} failed",
            self.items.len(),
            self.successes(),
            self.failures()
        );
        if let Some(reason) = &self.halted {
            line.push_str(&format!(". Halted early: {reason}"));
        }
        line
    }
}

/// Run `process` over `paths` in order, one at a time.
///
/// Ordinary per-item errors are recorded and the batch moves on. A fatal
/// error (expired session) is recorded and stops the batch at once.
pub fn run_batch<F>(paths: &[String], options: &BatchOptions, mut process: F) -> BatchReport
where
    F: FnMut(&str) -> Result<SubmissionResult>,
{
    let count = options.limit.map_or(paths.len(), |l| l.min(paths.len()));
    let mut report = BatchReport::default();

    for (i, path) in paths.iter().take(count).enumerate() {
        info!("Processing {}/{count}: {path}", i + 1);
        let outcome = match process(path) {
            Ok(result) => ItemOutcome {
                path: path.clone(),
                result: Some(result),
                error: None,
            },
            Err(e) => {
                warn!("{} for {path}: {e}", e.kind());
                if e.is_fatal() {
                    report.halted = Some(format!(
                        "{} at {path} after {} processed items ({} successful): {e}",
                        e.kind(),
                        report.items.len(),
                        report.successes()
                    ));
                }
                ItemOutcome {
                    path: path.clone(),
                    result: None,
                    error: Some(ItemFailure::from(&e)),
                }
            }
        };
        report.items.push(outcome);

        if let Some(results_path) = &options.results_path
            && let Err(e) = write_json(results_path, &report)
        {
            warn!("Could not save progress: {e}");
        }

        if report.halted.is_some() {
            break;
        }
        if i + 1 < count && !options.delay.is_zero() {
            info!("Waiting {:?} before next submission...", options.delay);
            thread::sleep(options.delay);
        }
    }

    report
}
