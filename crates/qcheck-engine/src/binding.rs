//! The capability surface every engine binding provides.

use std::path::Path;

use qcheck_types::Value;
use thiserror::Error;

/// Decoded columns of the cursor's current row, in column order.
///
/// `None` marks a column the engine flagged as missing for this row. Missing is
/// distinct from a present column holding [`Value::Null`].
pub type RowColumns = Vec<Option<Value>>;

/// A statement could not be prepared.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct CompileError {
    /// Engine-supplied description.
    pub message: String,
    /// Byte offset of the syntax error in the statement, or negative when the
    /// engine could not locate it.
    pub position: i64,
}

impl CompileError {
    pub fn new(message: impl Into<String>, position: i64) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

/// A prepared query failed while running or while its cursor was drained.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct EngineError {
    pub message: String,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Minimal engine surface consumed by the harness.
///
/// Handle types are RAII: each owns one native resource and releases it in
/// `Drop`, so every exit path of a caller (success, mismatch, early return on
/// error) releases exactly once. A dataset is opened once per suite directory
/// and shared by reference across worker threads, hence the `Send + Sync`
/// bound on [`QueryEngine::Dataset`].
pub trait QueryEngine: Send + Sync {
    /// An open dataset.
    type Dataset: Send + Sync;
    /// A compiled statement.
    type Query;
    /// A row cursor over a running query.
    type Cursor;

    /// Short identifier used in log fields.
    fn name(&self) -> &str;

    /// Open the dataset `name` stored under `directory`.
    fn open_dataset(&self, directory: &Path, name: &str) -> Result<Self::Dataset, EngineError>;

    /// Compile `statement` against `dataset`.
    fn compile(&self, dataset: &Self::Dataset, statement: &str)
    -> Result<Self::Query, CompileError>;

    /// Start executing `query`. `parameters` is a JSON object of bound
    /// parameters; the empty string means none.
    fn run(&self, query: &Self::Query, parameters: &str) -> Result<Self::Cursor, EngineError>;

    /// Move to the next row. `Ok(false)` means the cursor is exhausted.
    fn advance(&self, cursor: &mut Self::Cursor) -> Result<bool, EngineError>;

    /// Title of result column `index`.
    fn column_title(&self, query: &Self::Query, index: usize) -> String;

    /// Decode every column of the current row into the value model.
    fn current_columns(&self, cursor: &mut Self::Cursor) -> Result<RowColumns, EngineError>;
}
