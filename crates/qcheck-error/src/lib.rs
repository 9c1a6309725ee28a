use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for harness-level failures.
///
/// Per-case engine failures (a statement that does not compile, a cursor that
/// errors mid-drain) are *not* represented here: the executor turns those into
/// outcomes. Everything in this enum either aborts the run or aborts a single
/// suite file.
#[derive(Error, Debug)]
pub enum HarnessError {
    // === Engine library ===
    /// The native engine library does not exist at the configured path.
    #[error("engine library not found: '{path}'")]
    LibraryNotFound { path: PathBuf },

    /// The native engine library exists but could not be loaded.
    #[error("failed to load engine library '{path}': {detail}")]
    LibraryLoad { path: PathBuf, detail: String },

    /// A required entry point is missing from the loaded library.
    #[error("engine library is missing required entry point `{name}`")]
    MissingSymbol { name: String },

    // === Datasets ===
    /// A dataset required by a suite directory could not be opened.
    #[error("unable to open dataset '{name}' in '{directory}': {detail}")]
    DatasetOpen {
        name: String,
        directory: PathBuf,
        detail: String,
    },

    // === Input / output ===
    /// A suite file could not be parsed.
    #[error("malformed suite file '{path}': {source}")]
    SuiteParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A persisted run report could not be parsed.
    #[error("malformed run report: {0}")]
    ReportParse(#[source] serde_json::Error),

    /// A persisted run report is internally inconsistent.
    #[error("run report total {total} does not match counters (pass={pass} fail={fail} error={error})")]
    ReportInvariant {
        total: usize,
        pass: usize,
        fail: usize,
        error: usize,
    },

    /// Filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal logic error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl HarnessError {
    /// Whether this error means the engine itself is unusable.
    pub const fn is_library_failure(&self) -> bool {
        matches!(
            self,
            Self::LibraryNotFound { .. } | Self::LibraryLoad { .. } | Self::MissingSymbol { .. }
        )
    }

    /// Whether this error aborts the whole run rather than a single suite file.
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::SuiteParse { .. })
    }

    /// Human-friendly suggestion for fixing this error.
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::LibraryNotFound { .. } => {
                Some("Install the engine runtime or pass --library <path>")
            }
            Self::MissingSymbol { .. } => {
                Some("The library version does not match the binding; use a compatible build")
            }
            Self::DatasetOpen { .. } => Some("Check that the seed dataset was generated"),
            _ => None,
        }
    }

    /// Get the process exit code for this error (for CLI use).
    pub const fn exit_code(&self) -> i32 {
        if self.is_library_failure() { -1 } else { 1 }
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type alias using `HarnessError`.
pub type Result<T> = std::result::Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn library_not_found_display() {
        let err = HarnessError::LibraryNotFound {
            path: PathBuf::from("/opt/engine/libLiteCore.so"),
        };
        assert_eq!(
            err.to_string(),
            "engine library not found: '/opt/engine/libLiteCore.so'"
        );
    }

    #[test]
    fn library_failures_exit_with_minus_one() {
        let missing = HarnessError::MissingSymbol {
            name: "c4query_run".to_owned(),
        };
        assert!(missing.is_library_failure());
        assert_eq!(missing.exit_code(), -1);

        let internal = HarnessError::internal("boom");
        assert!(!internal.is_library_failure());
        assert_eq!(internal.exit_code(), 1);
    }

    #[test]
    fn suite_parse_is_not_fatal() {
        let source = serde_json::from_str::<Vec<u8>>("{").unwrap_err();
        let err = HarnessError::SuiteParse {
            path: PathBuf::from("suite.json"),
            source,
        };
        assert!(!err.is_fatal());
        assert!(err.to_string().starts_with("malformed suite file 'suite.json'"));
    }

    #[test]
    fn dataset_open_is_fatal_with_suggestion() {
        let err = HarnessError::DatasetOpen {
            name: "data".to_owned(),
            directory: PathBuf::from("out/agg"),
            detail: "not found".to_owned(),
        };
        assert!(err.is_fatal());
        assert!(err.suggestion().is_some());
    }

    #[test]
    fn report_invariant_display() {
        let err = HarnessError::ReportInvariant {
            total: 5,
            pass: 1,
            fail: 1,
            error: 1,
        };
        assert_eq!(
            err.to_string(),
            "run report total 5 does not match counters (pass=1 fail=1 error=1)"
        );
    }
}
