//! In-process engine answering statements from a table of canned responses.
//!
//! Used by the harness tests and by `qcheck-run --scripted <file>` for dry
//! runs without a native library. Every handle it hands out is counted on
//! open and on drop, so callers can check that nothing leaked.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use qcheck_types::Row;
use serde::Deserialize;
use tracing::debug;

use crate::binding::{CompileError, EngineError, QueryEngine, RowColumns};

/// Canned behaviour for one statement.
#[derive(Debug, Clone, Default)]
struct Script {
    columns: Option<Vec<String>>,
    rows: Vec<Row>,
    compile_error: Option<CompileError>,
    execution_error: Option<ExecutionFailure>,
}

#[derive(Debug, Clone)]
struct ExecutionFailure {
    message: String,
    /// `None`: `run` itself fails. `Some(n)`: the cursor fails after `n` rows.
    after_rows: Option<usize>,
}

impl Script {
    /// Column titles: the explicit list, else every row key in first-seen
    /// order.
    fn column_titles(&self) -> Vec<String> {
        if let Some(columns) = &self.columns {
            return columns.clone();
        }
        let mut titles: Vec<String> = Vec::new();
        for row in &self.rows {
            for key in row.keys() {
                if !titles.iter().any(|t| t == key) {
                    titles.push(key.to_owned());
                }
            }
        }
        titles
    }
}

// ─── Handle accounting ──────────────────────────────────────────────────

#[derive(Debug, Default)]
struct HandleCounters {
    datasets_opened: AtomicUsize,
    datasets_released: AtomicUsize,
    queries_opened: AtomicUsize,
    queries_released: AtomicUsize,
    cursors_opened: AtomicUsize,
    cursors_released: AtomicUsize,
}

/// Snapshot of open/release counts per handle kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandleBalance {
    pub datasets_opened: usize,
    pub datasets_released: usize,
    pub queries_opened: usize,
    pub queries_released: usize,
    pub cursors_opened: usize,
    pub cursors_released: usize,
}

impl HandleBalance {
    /// Every handle that was opened has been released exactly once.
    #[must_use]
    pub const fn is_balanced(&self) -> bool {
        self.datasets_opened == self.datasets_released
            && self.queries_opened == self.queries_released
            && self.cursors_opened == self.cursors_released
    }
}

pub struct ScriptedDataset {
    counters: Arc<HandleCounters>,
    name: String,
}

impl Drop for ScriptedDataset {
    fn drop(&mut self) {
        debug!(dataset = %self.name, "releasing dataset handle");
        self.counters.datasets_released.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct ScriptedQuery {
    counters: Arc<HandleCounters>,
    script: Arc<Script>,
    columns: Vec<String>,
}

impl Drop for ScriptedQuery {
    fn drop(&mut self) {
        self.counters.queries_released.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct ScriptedCursor {
    counters: Arc<HandleCounters>,
    script: Arc<Script>,
    columns: Vec<String>,
    current: Option<usize>,
    next: usize,
}

impl Drop for ScriptedCursor {
    fn drop(&mut self) {
        self.counters.cursors_released.fetch_add(1, Ordering::Relaxed);
    }
}

// ─── Engine ─────────────────────────────────────────────────────────────

/// A scripted engine. Statements not registered fail to compile.
#[derive(Debug, Clone, Default)]
pub struct ScriptedEngine {
    scripts: HashMap<String, Arc<Script>>,
    unavailable_directories: Vec<String>,
    counters: Arc<HandleCounters>,
}

impl ScriptedEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, statement: &str) -> &mut Script {
        let slot = self
            .scripts
            .entry(statement.to_owned())
            .or_insert_with(|| Arc::new(Script::default()));
        Arc::make_mut(slot)
    }

    /// Answer `statement` with `rows`.
    #[must_use]
    pub fn rows(mut self, statement: &str, rows: Vec<Row>) -> Self {
        self.entry(statement).rows = rows;
        self
    }

    /// Answer `statement` with `rows` under an explicit column list. A column
    /// absent from a row is reported as missing for that row.
    #[must_use]
    pub fn rows_with_columns(mut self, statement: &str, columns: &[&str], rows: Vec<Row>) -> Self {
        let script = self.entry(statement);
        script.columns = Some(columns.iter().map(|c| (*c).to_owned()).collect());
        script.rows = rows;
        self
    }

    /// Make `statement` fail to compile.
    #[must_use]
    pub fn compile_error(mut self, statement: &str, message: &str, position: i64) -> Self {
        self.entry(statement).compile_error = Some(CompileError::new(message, position));
        self
    }

    /// Make `statement` fail at execution: in `run` when `after_rows` is
    /// `None`, otherwise while draining once that many rows were produced.
    #[must_use]
    pub fn execution_error(
        mut self,
        statement: &str,
        message: &str,
        after_rows: Option<usize>,
    ) -> Self {
        self.entry(statement).execution_error = Some(ExecutionFailure {
            message: message.to_owned(),
            after_rows,
        });
        self
    }

    /// Refuse to open datasets under any directory named `directory_name`.
    #[must_use]
    pub fn unavailable_directory(mut self, directory_name: &str) -> Self {
        self.unavailable_directories.push(directory_name.to_owned());
        self
    }

    /// Build an engine from a JSON script: an array of
    /// `{statement, columns?, rows?, compileError?, executionError?}`.
    ///
    /// # Errors
    ///
    /// `Json` if the text is not a valid script.
    pub fn from_json(text: &str) -> qcheck_error::Result<Self> {
        let entries: Vec<ScriptEntry> = serde_json::from_str(text)?;
        let mut engine = Self::new();
        for entry in entries {
            let script = engine.entry(&entry.statement);
            script.columns = entry.columns;
            script.rows = entry.rows;
            script.compile_error = entry
                .compile_error
                .map(|e| CompileError::new(e.message, e.position));
            script.execution_error = entry.execution_error.map(|e| ExecutionFailure {
                message: e.message,
                after_rows: e.after_rows,
            });
        }
        debug!(statements = engine.scripts.len(), "scripted engine loaded");
        Ok(engine)
    }

    /// Read a JSON script from `path`.
    ///
    /// # Errors
    ///
    /// `Io` or `Json`.
    pub fn from_path(path: &Path) -> qcheck_error::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Number of registered statements.
    #[must_use]
    pub fn statement_count(&self) -> usize {
        self.scripts.len()
    }

    #[must_use]
    pub fn balance(&self) -> HandleBalance {
        let c = &self.counters;
        HandleBalance {
            datasets_opened: c.datasets_opened.load(Ordering::Relaxed),
            datasets_released: c.datasets_released.load(Ordering::Relaxed),
            queries_opened: c.queries_opened.load(Ordering::Relaxed),
            queries_released: c.queries_released.load(Ordering::Relaxed),
            cursors_opened: c.cursors_opened.load(Ordering::Relaxed),
            cursors_released: c.cursors_released.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ScriptEntry {
    statement: String,
    #[serde(default)]
    columns: Option<Vec<String>>,
    #[serde(default)]
    rows: Vec<Row>,
    #[serde(default)]
    compile_error: Option<CompileErrorEntry>,
    #[serde(default)]
    execution_error: Option<ExecutionErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct CompileErrorEntry {
    message: String,
    #[serde(default = "unknown_position")]
    position: i64,
}

const fn unknown_position() -> i64 {
    -1
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecutionErrorEntry {
    message: String,
    #[serde(default)]
    after_rows: Option<usize>,
}

impl QueryEngine for ScriptedEngine {
    type Dataset = ScriptedDataset;
    type Query = ScriptedQuery;
    type Cursor = ScriptedCursor;

    fn name(&self) -> &str {
        "scripted"
    }

    fn open_dataset(&self, directory: &Path, name: &str) -> Result<ScriptedDataset, EngineError> {
        let refused = directory
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| self.unavailable_directories.iter().any(|u| u == n));
        if refused {
            return Err(EngineError::new(format!(
                "database '{name}' not found in {}",
                directory.display()
            )));
        }
        self.counters.datasets_opened.fetch_add(1, Ordering::Relaxed);
        Ok(ScriptedDataset {
            counters: Arc::clone(&self.counters),
            name: name.to_owned(),
        })
    }

    fn compile(
        &self,
        _dataset: &ScriptedDataset,
        statement: &str,
    ) -> Result<ScriptedQuery, CompileError> {
        let Some(script) = self.scripts.get(statement) else {
            return Err(CompileError::new(
                format!("no scripted response for `{statement}`"),
                -1,
            ));
        };
        if let Some(err) = &script.compile_error {
            return Err(err.clone());
        }
        self.counters.queries_opened.fetch_add(1, Ordering::Relaxed);
        Ok(ScriptedQuery {
            counters: Arc::clone(&self.counters),
            columns: script.column_titles(),
            script: Arc::clone(script),
        })
    }

    fn run(&self, query: &ScriptedQuery, _parameters: &str) -> Result<ScriptedCursor, EngineError> {
        if let Some(failure) = &query.script.execution_error {
            if failure.after_rows.is_none() {
                return Err(EngineError::new(failure.message.clone()));
            }
        }
        self.counters.cursors_opened.fetch_add(1, Ordering::Relaxed);
        Ok(ScriptedCursor {
            counters: Arc::clone(&self.counters),
            script: Arc::clone(&query.script),
            columns: query.columns.clone(),
            current: None,
            next: 0,
        })
    }

    fn advance(&self, cursor: &mut ScriptedCursor) -> Result<bool, EngineError> {
        if let Some(failure) = &cursor.script.execution_error {
            if failure.after_rows == Some(cursor.next) {
                return Err(EngineError::new(failure.message.clone()));
            }
        }
        if cursor.next < cursor.script.rows.len() {
            cursor.current = Some(cursor.next);
            cursor.next += 1;
            Ok(true)
        } else {
            cursor.current = None;
            Ok(false)
        }
    }

    fn column_title(&self, query: &ScriptedQuery, index: usize) -> String {
        query.columns.get(index).cloned().unwrap_or_default()
    }

    fn current_columns(&self, cursor: &mut ScriptedCursor) -> Result<RowColumns, EngineError> {
        let Some(row) = cursor.current.and_then(|i| cursor.script.rows.get(i)) else {
            return Err(EngineError::new("cursor is not positioned on a row"));
        };
        Ok(cursor
            .columns
            .iter()
            .map(|title| row.get(title).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use qcheck_types::Value;

    use super::*;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs.iter().cloned().collect()
    }

    fn drain(engine: &ScriptedEngine, statement: &str) -> Result<Vec<RowColumns>, String> {
        let dataset = engine
            .open_dataset(Path::new("out/suite"), "data")
            .map_err(|e| e.message)?;
        let query = engine.compile(&dataset, statement).map_err(|e| e.message)?;
        let mut cursor = engine.run(&query, "").map_err(|e| e.message)?;
        let mut rows = Vec::new();
        while engine.advance(&mut cursor).map_err(|e| e.message)? {
            rows.push(engine.current_columns(&mut cursor).map_err(|e| e.message)?);
        }
        Ok(rows)
    }

    #[test]
    fn unknown_statement_fails_to_compile() {
        let engine = ScriptedEngine::new();
        let dataset = engine.open_dataset(Path::new("x"), "data").unwrap();
        let err = engine.compile(&dataset, "SELECT 1 FROM _").err().unwrap();
        assert_eq!(err.position, -1);
        assert!(err.message.contains("SELECT 1"));
    }

    #[test]
    fn columns_follow_first_seen_key_order() {
        let engine = ScriptedEngine::new().rows(
            "S",
            vec![
                row(&[("a", Value::from(1))]),
                row(&[("b", Value::from(2)), ("a", Value::from(3))]),
            ],
        );
        let rows = drain(&engine, "S").unwrap();
        assert_eq!(rows[0], vec![Some(Value::from(1)), None]);
        assert_eq!(rows[1], vec![Some(Value::from(3)), Some(Value::from(2))]);
        assert!(engine.balance().is_balanced());
    }

    #[test]
    fn explicit_null_is_not_missing() {
        let engine =
            ScriptedEngine::new().rows_with_columns("S", &["a", "b"], vec![row(&[("a", Value::Null)])]);
        let rows = drain(&engine, "S").unwrap();
        assert_eq!(rows, vec![vec![Some(Value::Null), None]]);
    }

    #[test]
    fn execution_error_mid_drain_releases_handles() {
        let engine = ScriptedEngine::new()
            .rows("S", vec![row(&[("a", Value::from(1))]), row(&[("a", Value::from(2))])])
            .execution_error("S", "disk on fire", Some(1));
        let err = drain(&engine, "S").unwrap_err();
        assert_eq!(err, "disk on fire");
        let balance = engine.balance();
        assert!(balance.is_balanced(), "{balance:?}");
        assert_eq!(balance.cursors_opened, 1);
    }

    #[test]
    fn execution_error_at_run_opens_no_cursor() {
        let engine = ScriptedEngine::new().rows("S", vec![]).execution_error("S", "nope", None);
        assert_eq!(drain(&engine, "S").unwrap_err(), "nope");
        let balance = engine.balance();
        assert_eq!(balance.cursors_opened, 0);
        assert_eq!(balance.queries_opened, 1);
        assert!(balance.is_balanced());
    }

    #[test]
    fn unavailable_directory_refuses_open() {
        let engine = ScriptedEngine::new().unavailable_directory("broken");
        assert!(engine.open_dataset(Path::new("out/broken"), "data").is_err());
        assert!(engine.open_dataset(Path::new("out/fine"), "data").is_ok());
        assert_eq!(engine.balance().datasets_opened, 1);
    }

    #[test]
    fn from_json_reads_every_entry_kind() {
        let engine = ScriptedEngine::from_json(
            r#"[
                {"statement": "A", "rows": [{"x": 1}]},
                {"statement": "B", "compileError": {"message": "bad", "position": 4}},
                {"statement": "C", "rows": [], "executionError": {"message": "boom"}},
                {"statement": "D", "columns": ["x", "y"], "rows": [{"y": "v"}]}
            ]"#,
        )
        .unwrap();
        assert_eq!(engine.statement_count(), 4);
        assert_eq!(drain(&engine, "A").unwrap(), vec![vec![Some(Value::from(1))]]);
        assert_eq!(drain(&engine, "B").unwrap_err(), "bad");
        assert_eq!(drain(&engine, "C").unwrap_err(), "boom");
        assert_eq!(drain(&engine, "D").unwrap(), vec![vec![None, Some(Value::from("v"))]]);
    }

    #[test]
    fn from_json_rejects_unknown_fields() {
        assert!(ScriptedEngine::from_json(r#"[{"statement": "A", "rowz": []}]"#).is_err());
    }
}
