//! Runs one test case against an engine and classifies the result.

use std::borrow::Cow;

use qcheck_engine::QueryEngine;
use qcheck_types::Row;
use tracing::debug;

use crate::comparison::{OrderMode, results_equal};
use crate::report::{ErrorOutcome, FailOutcome, Outcome};
use crate::suite::TestCase;

/// Collection queried when a statement names none.
pub const DEFAULT_COLLECTION_CLAUSE: &str = " FROM _";

/// Characters of context shown before a compile error position.
const EXCERPT_LEAD: usize = 15;
/// Maximum characters in a compile error excerpt.
const EXCERPT_WIDTH: usize = 30;

/// The collection named by the first `FROM <letters>` in `statement`
/// (ASCII case-insensitive, exactly one space after `FROM`).
#[must_use]
pub fn target_collection(statement: &str) -> Option<&str> {
    let bytes = statement.as_bytes();
    let mut i = 0;
    while i + 5 < bytes.len() {
        if bytes[i..i + 4].eq_ignore_ascii_case(b"FROM") && bytes[i + 4] == b' ' {
            let start = i + 5;
            let len = bytes[start..]
                .iter()
                .take_while(|b| b.is_ascii_alphabetic())
                .count();
            if len > 0 {
                return Some(&statement[start..start + len]);
            }
        }
        i += 1;
    }
    None
}

/// The statement actually compiled: unchanged when it targets a collection,
/// otherwise with ` FROM _` appended.
#[must_use]
pub fn targeted_statement(statement: &str) -> Cow<'_, str> {
    if target_collection(statement).is_some() {
        Cow::Borrowed(statement)
    } else {
        Cow::Owned(format!("{statement}{DEFAULT_COLLECTION_CLAUSE}"))
    }
}

/// Two-line excerpt pointing a caret at byte offset `position`.
///
/// Returns `None` when the position is unknown (negative). The offset is
/// clamped to the statement and moved back to a character boundary.
#[must_use]
pub fn error_excerpt(statement: &str, position: i64) -> Option<String> {
    let position = usize::try_from(position).ok()?;
    let position = floor_char_boundary(statement, position.min(statement.len()));

    let lead = statement[..position].chars().rev().take(EXCERPT_LEAD).count();
    let start = statement[..position]
        .char_indices()
        .rev()
        .nth(lead.saturating_sub(1))
        .map_or(position, |(i, _)| i);
    let excerpt: String = statement[start..].chars().take(EXCERPT_WIDTH).collect();

    Some(format!("...{excerpt}\n...{:lead$}^", ""))
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    while !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Execute `case` against `dataset` and compare under `mode`.
///
/// Engine failures become [`Outcome::Error`]; nothing here aborts the run.
/// Every handle acquired is dropped before returning.
pub fn execute_case<E: QueryEngine>(
    engine: &E,
    dataset: &E::Dataset,
    case: &TestCase,
    mode: OrderMode,
) -> Outcome {
    let statement = targeted_statement(&case.statement).into_owned();
    let outcome = match collect_rows(engine, dataset, &statement) {
        Ok(actual) => {
            if results_equal(&case.expected_rows, &actual, mode) {
                Outcome::Pass { statement }
            } else {
                Outcome::Fail(FailOutcome {
                    statement,
                    expected: case.expected_rows.clone(),
                    actual,
                })
            }
        }
        Err(failure) => Outcome::Error(ErrorOutcome {
            statement,
            message: failure.message,
            excerpt: failure.excerpt,
        }),
    };
    debug!(
        engine = engine.name(),
        statement = outcome.statement(),
        outcome = outcome.label(),
        "case executed"
    );
    outcome
}

struct CaseFailure {
    message: String,
    excerpt: Option<String>,
}

fn collect_rows<E: QueryEngine>(
    engine: &E,
    dataset: &E::Dataset,
    statement: &str,
) -> Result<Vec<Row>, CaseFailure> {
    let query = engine
        .compile(dataset, statement)
        .map_err(|err| CaseFailure {
            excerpt: error_excerpt(statement, err.position),
            message: err.message,
        })?;
    let mut cursor = engine.run(&query, "").map_err(execution_failure)?;

    let mut titles: Vec<String> = Vec::new();
    let mut rows = Vec::new();
    while engine.advance(&mut cursor).map_err(execution_failure)? {
        let columns = engine
            .current_columns(&mut cursor)
            .map_err(execution_failure)?;
        while titles.len() < columns.len() {
            titles.push(engine.column_title(&query, titles.len()));
        }
        let row: Row = titles
            .iter()
            .zip(columns)
            .filter_map(|(title, value)| value.map(|v| (title.as_str(), v)))
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

fn execution_failure(err: qcheck_engine::EngineError) -> CaseFailure {
    CaseFailure {
        message: err.message,
        excerpt: None,
    }
}
