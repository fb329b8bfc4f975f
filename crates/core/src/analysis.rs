//! Run-log checking.
//!
//! Batch experiments leave one directory per run, each with the orchestrator's log.
//! The checker scans those logs for the recorded command line, the number of
//! completed invocations and the final `Simulation done` marker, classifies each run,
//! and collects commands to re-run the failures.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::common::OrchestratorError;

/// Log file expected in every run directory.
pub const LOG_FILE: &str = "run.log";

/// Measured invocations a complete run is expected to log.
pub const DEFAULT_EXPECTED_INVOCATIONS: u64 = 20;

const COMMAND_PREFIX: &str = "command line: ";
const INVOCATION_MARKERS: [&str; 2] = ["End invocation", "End invokation"];
const DONE_MARKER: &str = "Simulation done";

/// Classification of one run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Finished with at least the expected invocations.
    Succeed,
    /// Finished, but with fewer invocations than expected.
    Warn,
    /// Never reached `Simulation done`.
    Fail,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Succeed => "succeed",
            Self::Warn => "WARN",
            Self::Fail => "fail",
        })
    }
}

/// What a log says about its run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LogSummary {
    /// Command line recorded at startup, if any.
    pub command: Option<String>,
    /// Invocations completed before `Simulation done` (or the end of the log).
    pub invocations: u64,
    /// Whether the run reached `Simulation done`.
    pub done: bool,
}

impl LogSummary {
    /// Classifies the run against `expected` invocations.
    pub const fn status(&self, expected: u64) -> RunStatus {
        if !self.done {
            RunStatus::Fail
        } else if self.invocations < expected {
            RunStatus::Warn
        } else {
            RunStatus::Succeed
        }
    }
}

/// Scans one log.
pub fn check_log(text: &str) -> LogSummary {
    let mut summary = LogSummary::default();
    for line in text.lines() {
        if let Some(pos) = line.find(COMMAND_PREFIX) {
            summary.command = Some(line[pos + COMMAND_PREFIX.len()..].trim().to_owned());
        }
        if line.contains(DONE_MARKER) {
            summary.done = true;
            break;
        }
        if INVOCATION_MARKERS.iter().any(|m| line.contains(m)) {
            summary.invocations += 1;
        }
    }
    summary
}

/// Result for one run directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RunCheck {
    /// Directory name.
    pub name: String,
    /// Log file.
    pub log: PathBuf,
    /// Scan result.
    pub summary: LogSummary,
    /// Classification.
    pub status: RunStatus,
}

/// Results for a whole results directory.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    /// One entry per run directory with a log, sorted by name.
    pub runs: Vec<RunCheck>,
}

impl CheckReport {
    /// Number of runs with `status`.
    pub fn count(&self, status: RunStatus) -> usize {
        self.runs.iter().filter(|r| r.status == status).count()
    }

    /// Shell commands re-running every failed run with a recorded command line.
    pub fn rerun_commands(&self) -> Vec<String> {
        self.runs
            .iter()
            .filter(|r| r.status == RunStatus::Fail)
            .filter_map(|r| {
                r.summary
                    .command
                    .as_ref()
                    .map(|cmd| format!("{cmd} > {} 2>&1 &", r.log.display()))
            })
            .collect()
    }

    /// Prints one line per run to stdout.
    pub fn print(&self) {
        for run in &self.runs {
            println!("{:>25} > {} : {}", run.name, run.summary.invocations, run.status);
        }
        println!(
            "{} succeed, {} warn, {} fail",
            self.count(RunStatus::Succeed),
            self.count(RunStatus::Warn),
            self.count(RunStatus::Fail)
        );
    }
}

/// Checks `<dir>/<run>/run.log` for every run directory.
///
/// Directories without a log are skipped.
///
/// # Errors
///
/// [`OrchestratorError::Io`] when `dir` or a log cannot be read.
pub fn check_results_dir(dir: &Path, expected: u64) -> Result<CheckReport, OrchestratorError> {
    let io = |path: &Path| {
        let path = path.to_path_buf();
        move |source| OrchestratorError::Io { path, source }
    };

    let mut names = Vec::new();
    for entry in fs::read_dir(dir).map_err(io(dir))? {
        let entry = entry.map_err(io(dir))?;
        if entry.path().is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();

    let mut report = CheckReport::default();
    for name in names {
        let log = dir.join(&name).join(LOG_FILE);
        if !log.exists() {
            continue;
        }
        let text = fs::read_to_string(&log).map_err(io(&log))?;
        let summary = check_log(&text);
        let status = summary.status(expected);
        report.runs.push(RunCheck {
            name,
            log,
            summary,
            status,
        });
    }
    Ok(report)
}
