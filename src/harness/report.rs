//! Diagnostic records and the run summary.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::time::{Duration, Instant};

use crate::utils::{CheckError, CheckResult, Outcome};

// ── assertions ──────────────────────────────────────────────────────────────

/// Fail the check with `message` unless `condition` holds.
pub fn assert_condition(condition: bool, message: impl Into<String>, remediation: Option<String>) -> CheckResult {
    if condition {
        return Ok(());
    }
    let err = CheckError::assertion(message);
    Err(match remediation {
        Some(hint) => err.with_remediation(hint),
        None => err,
    })
}

/// Fail the check unless `actual == expected`, recording both values.
pub fn assert_values<T: PartialEq + Display>(actual: T, expected: T, message: impl Into<String>) -> CheckResult {
    if actual == expected {
        return Ok(());
    }
    Err(CheckError::Assertion {
        message: message.into(),
        expected: Some(expected.to_string()),
        actual: Some(actual.to_string()),
        remediation: None,
    })
}

// ── records ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    pub check: String,
    pub category: String,
    pub outcome: Outcome,
    pub message: String,
    pub remediation: Option<String>,
    pub expected: Option<String>,
    pub actual: Option<String>,
    pub duration_ms: u64,
}

impl DiagnosticRecord {
    pub fn new(check: &str, category: &str, outcome: Outcome, message: impl Into<String>) -> Self {
        Self {
            check: check.to_string(),
            category: category.to_string(),
            outcome,
            message: message.into(),
            remediation: None,
            expected: None,
            actual: None,
            duration_ms: 0,
        }
    }

    pub fn passed(check: &str, category: &str, duration: Duration) -> Self {
        Self {
            duration_ms: duration.as_millis() as u64,
            ..Self::new(check, category, Outcome::Passed, "ok")
        }
    }

    pub fn skipped(check: &str, category: &str, reason: impl Into<String>) -> Self {
        Self::new(check, category, Outcome::Skipped, reason)
    }

    pub fn from_error(check: &str, category: &str, err: &CheckError, duration: Duration) -> Self {
        let (expected, actual) = err.expected_actual();
        Self {
            check: check.to_string(),
            category: category.to_string(),
            outcome: err.outcome(),
            message: err.to_string(),
            remediation: err.remediation().map(String::from),
            expected: expected.map(String::from),
            actual: actual.map(String::from),
            duration_ms: duration.as_millis() as u64,
        }
    }
}

// ── summary ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errored: usize,
}

impl OutcomeCounts {
    pub fn tally(records: &[DiagnosticRecord]) -> Self {
        let mut counts = Self::default();
        for r in records {
            match r.outcome {
                Outcome::Passed => counts.passed += 1,
                Outcome::Failed => counts.failed += 1,
                Outcome::Skipped => counts.skipped += 1,
                Outcome::Errored => counts.errored += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.passed + self.failed + self.skipped + self.errored
    }

    pub fn get(&self, outcome: Outcome) -> usize {
        match outcome {
            Outcome::Passed => self.passed,
            Outcome::Failed => self.failed,
            Outcome::Skipped => self.skipped,
            Outcome::Errored => self.errored,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pass,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: String,
    pub duration_ms: u64,
    pub records: Vec<DiagnosticRecord>,
    pub counts: OutcomeCounts,
    pub status: RunStatus,
}

impl RunSummary {
    pub fn passed(&self) -> bool {
        self.status == RunStatus::Pass
    }

    /// Process exit code for outer automation.
    pub fn exit_code(&self) -> i32 {
        if self.passed() { 0 } else { 1 }
    }

    pub fn failures(&self) -> impl Iterator<Item = &DiagnosticRecord> {
        self.records.iter().filter(|r| r.outcome.is_failure())
    }
}

/// Accumulates records for one run.
pub struct Reporter {
    started: Instant,
    started_at: String,
    records: Vec<DiagnosticRecord>,
}

impl Reporter {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            started_at: chrono::Local::now().format("%Y-%m-%d %H:%M:%S %z").to_string(),
            records: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn record(&mut self, check_name: &str, outcome: Outcome, detail: impl Into<String>) {
        self.push(DiagnosticRecord::new(check_name, "general", outcome, detail));
    }

    pub fn push(&mut self, record: DiagnosticRecord) {
        self.records.push(record);
    }

    #[cfg(test)]
    pub fn records(&self) -> &[DiagnosticRecord] {
        &self.records
    }

    pub fn summarize(self) -> RunSummary {
        let counts = OutcomeCounts::tally(&self.records);
        let status = if counts.failed + counts.errored > 0 {
            RunStatus::Fail
        } else {
            RunStatus::Pass
        };
        RunSummary {
            started_at: self.started_at,
            duration_ms: self.started.elapsed().as_millis() as u64,
            records: self.records,
            counts,
            status,
        }
    }
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new()
    }
}
