//! Script verdicts and the per-batch run report

use std::fmt;

use colored::Colorize;
use serde::Serialize;

/// Verdict of one script
///
/// `Error` means the script could not run to completion (load failure,
/// engine error, bad command arguments), as opposed to `Fail`, where the
/// script ran and reported failure itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScriptResult {
    Pass,
    Fail,
    Error,
}

impl ScriptResult {
    /// Map a script's integer return value (0, 1, 2) to a verdict
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(ScriptResult::Pass),
            1 => Some(ScriptResult::Fail),
            2 => Some(ScriptResult::Error),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            ScriptResult::Pass => 0,
            ScriptResult::Fail => 1,
            ScriptResult::Error => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScriptResult::Pass => "PASS",
            ScriptResult::Fail => "FAIL",
            ScriptResult::Error => "ERROR",
        }
    }

    /// Verdict label colored for a terminal
    pub fn colored(self) -> colored::ColoredString {
        match self {
            ScriptResult::Pass => self.as_str().green().bold(),
            ScriptResult::Fail => self.as_str().red().bold(),
            ScriptResult::Error => self.as_str().yellow().bold(),
        }
    }
}

impl fmt::Display for ScriptResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one script within a batch
#[derive(Debug, Clone, Serialize)]
pub struct ScriptEntry {
    pub name: String,
    pub result: ScriptResult,
    /// Banner, everything the script printed, error text, result line
    pub output: String,
}

/// Aggregated outcome of a batch, in execution order
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub entries: Vec<ScriptEntry>,
    pub pass: usize,
    pub fail: usize,
    pub error: usize,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, entry: ScriptEntry) {
        match entry.result {
            ScriptResult::Pass => self.pass += 1,
            ScriptResult::Fail => self.fail += 1,
            ScriptResult::Error => self.error += 1,
        }
        self.entries.push(entry);
    }

    pub fn total(&self) -> usize {
        self.entries.len()
    }

    pub fn all_passed(&self) -> bool {
        self.fail == 0 && self.error == 0
    }

    /// `Results: <p> Pass / <f> Fail / <e> Error`
    pub fn summary_line(&self) -> String {
        format!(
            "Results: {} Pass / {} Fail / {} Error",
            self.pass, self.fail, self.error
        )
    }

    /// Concatenated output of every script, as shown in the run log
    pub fn full_output(&self) -> String {
        self.entries.iter().map(|e| e.output.as_str()).collect()
    }
}

/// `Progress: <i> / <N>`
pub fn progress_line(done: usize, total: usize) -> String {
    format!("Progress: {} / {}", done, total)
}
