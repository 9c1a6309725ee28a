//! Case outcomes, the concurrent aggregator and the persisted run report.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use qcheck_error::{HarnessError, Result};
use qcheck_types::Row;
use serde::{Deserialize, Serialize};

// ── Outcomes ───────────────────────────────────────────────────────────

/// A statement whose results did not match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailOutcome {
    #[serde(rename = "query")]
    pub statement: String,
    pub expected: Vec<Row>,
    pub actual: Vec<Row>,
}

/// A statement that failed to compile or execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorOutcome {
    #[serde(rename = "query")]
    pub statement: String,
    pub message: String,
    /// Two-line excerpt pointing at the compile error position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
}

/// Result of executing one test case.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Pass { statement: String },
    Fail(FailOutcome),
    Error(ErrorOutcome),
}

impl Outcome {
    #[must_use]
    pub fn statement(&self) -> &str {
        match self {
            Self::Pass { statement } => statement,
            Self::Fail(f) => &f.statement,
            Self::Error(e) => &e.statement,
        }
    }

    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Pass { .. } => "PASS",
            Self::Fail(_) => "FAIL",
            Self::Error(_) => "ERROR",
        }
    }
}

// ── Aggregator ─────────────────────────────────────────────────────────

/// Thread-safe collector of outcomes for one run.
///
/// Counters only ever increase. Detail lists are in completion order.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    pass: AtomicUsize,
    fail: AtomicUsize,
    error: AtomicUsize,
    passes: Mutex<Vec<String>>,
    failures: Mutex<Vec<FailOutcome>>,
    errors: Mutex<Vec<ErrorOutcome>>,
}

impl ResultAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, outcome: Outcome) {
        match outcome {
            Outcome::Pass { statement } => {
                self.passes.lock().push(statement);
                self.pass.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::Fail(fail) => {
                self.failures.lock().push(fail);
                self.fail.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::Error(error) => {
                self.errors.lock().push(error);
                self.error.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    #[must_use]
    pub fn pass_count(&self) -> usize {
        self.pass.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn fail_count(&self) -> usize {
        self.fail.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        self.error.load(Ordering::Relaxed)
    }

    /// Sum of all counters.
    #[must_use]
    pub fn total(&self) -> usize {
        self.pass_count() + self.fail_count() + self.error_count()
    }

    /// Freeze into a report. Call once all workers have joined.
    #[must_use]
    pub fn into_report(self) -> RunReport {
        RunReport {
            pass_count: self.pass.into_inner(),
            fail_count: self.fail.into_inner(),
            error_count: self.error.into_inner(),
            pass_statements: self.passes.into_inner(),
            fail_outcomes: self.failures.into_inner(),
            error_outcomes: self.errors.into_inner(),
        }
    }
}

// ── Report ─────────────────────────────────────────────────────────────

/// Final, immutable result of a run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(into = "ReportWire", try_from = "ReportWire")]
pub struct RunReport {
    pub pass_count: usize,
    pub fail_count: usize,
    pub error_count: usize,
    pub pass_statements: Vec<String>,
    pub fail_outcomes: Vec<FailOutcome>,
    pub error_outcomes: Vec<ErrorOutcome>,
}

/// On-disk layout. `total` is derived on write and validated on read.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportWire {
    pass_count: usize,
    fail_count: usize,
    error_count: usize,
    total: usize,
    pass_results: Vec<String>,
    fail_results: Vec<FailOutcome>,
    error_results: Vec<ErrorOutcome>,
}

impl From<RunReport> for ReportWire {
    fn from(report: RunReport) -> Self {
        Self {
            total: report.total(),
            pass_count: report.pass_count,
            fail_count: report.fail_count,
            error_count: report.error_count,
            pass_results: report.pass_statements,
            fail_results: report.fail_outcomes,
            error_results: report.error_outcomes,
        }
    }
}

impl TryFrom<ReportWire> for RunReport {
    type Error = HarnessError;

    fn try_from(wire: ReportWire) -> Result<Self> {
        let sum = wire.pass_count + wire.fail_count + wire.error_count;
        if wire.total != sum {
            return Err(HarnessError::ReportInvariant {
                total: wire.total,
                pass: wire.pass_count,
                fail: wire.fail_count,
                error: wire.error_count,
            });
        }
        Ok(Self {
            pass_count: wire.pass_count,
            fail_count: wire.fail_count,
            error_count: wire.error_count,
            pass_statements: wire.pass_results,
            fail_outcomes: wire.fail_results,
            error_outcomes: wire.error_results,
        })
    }
}

impl RunReport {
    #[must_use]
    pub const fn total(&self) -> usize {
        self.pass_count + self.fail_count + self.error_count
    }

    /// Process exit status: failures plus errors, saturated to `i32::MAX`.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::try_from(self.fail_count + self.error_count).unwrap_or(i32::MAX)
    }

    /// Serialize as pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a persisted report, checking `total` against the counters.
    ///
    /// # Errors
    ///
    /// `ReportParse` for malformed JSON, `ReportInvariant` for an inconsistent
    /// total.
    pub fn from_json(text: &str) -> Result<Self> {
        let wire: ReportWire = serde_json::from_str(text).map_err(HarnessError::ReportParse)?;
        Self::try_from(wire)
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }
}
