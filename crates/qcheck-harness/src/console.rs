//! Human-readable outcome output.
//!
//! One sink is shared by every worker. Each outcome is rendered to a string
//! first and written under a single lock, so multi-line blocks never
//! interleave.

use std::fmt::Write as _;
use std::io::{self, Write};

use parking_lot::Mutex;

use crate::report::{Outcome, RunReport};

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

/// Synchronized console sink.
pub struct Console {
    out: Mutex<Box<dyn Write + Send>>,
    color: bool,
}

impl std::fmt::Debug for Console {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Console")
            .field("color", &self.color)
            .finish_non_exhaustive()
    }
}

impl Console {
    #[must_use]
    pub fn stdout(color: bool) -> Self {
        Self::with_writer(io::stdout(), color)
    }

    /// A console that discards everything.
    #[must_use]
    pub fn sink() -> Self {
        Self::with_writer(io::sink(), false)
    }

    pub fn with_writer(writer: impl Write + Send + 'static, color: bool) -> Self {
        Self {
            out: Mutex::new(Box::new(writer)),
            color,
        }
    }

    pub fn outcome(&self, outcome: &Outcome) {
        self.emit(&render_outcome(outcome, self.color));
    }

    /// Final pass/fail/error totals.
    pub fn summary(&self, report: &RunReport) {
        let mut block = String::from("\n");
        push_line(
            &mut block,
            self.color.then_some(GREEN),
            &format!("PASS: {}", report.pass_count),
        );
        push_line(
            &mut block,
            self.color.then_some(YELLOW),
            &format!("FAIL: {}", report.fail_count),
        );
        push_line(
            &mut block,
            self.color.then_some(RED),
            &format!("ERROR: {}", report.error_count),
        );
        self.emit(&block);
    }

    fn emit(&self, block: &str) {
        let mut out = self.out.lock();
        // Console output is best effort; a closed stdout must not abort a run.
        let _ = out.write_all(block.as_bytes());
        let _ = out.flush();
    }
}

/// Render one outcome as a complete, newline-terminated block.
#[must_use]
pub fn render_outcome(outcome: &Outcome, color: bool) -> String {
    let mut block = String::new();
    match outcome {
        Outcome::Pass { statement } => {
            push_line(&mut block, color.then_some(GREEN), &format!("[PASS] {statement}"));
        }
        Outcome::Fail(fail) => {
            let tint = color.then_some(YELLOW);
            push_line(&mut block, tint, &format!("[FAIL] {}", fail.statement));
            push_line(&mut block, tint, "Expected:");
            push_line(&mut block, tint, &pretty(&fail.expected));
            push_line(&mut block, tint, "Actual:");
            push_line(&mut block, tint, &pretty(&fail.actual));
        }
        Outcome::Error(error) => {
            let tint = color.then_some(RED);
            push_line(
                &mut block,
                tint,
                &format!("[ERROR] {}: {}", error.statement, error.message),
            );
            if let Some(excerpt) = &error.excerpt {
                for line in excerpt.lines() {
                    push_line(&mut block, tint, line);
                }
            }
        }
    }
    block
}

fn pretty(rows: &[qcheck_types::Row]) -> String {
    serde_json::to_string_pretty(rows).unwrap_or_else(|err| format!("<unprintable: {err}>"))
}

fn push_line(block: &mut String, tint: Option<&str>, text: &str) {
    match tint {
        Some(code) => {
            let _ = writeln!(block, "{code}{text}{RESET}");
        }
        None => {
            let _ = writeln!(block, "{text}");
        }
    }
}
