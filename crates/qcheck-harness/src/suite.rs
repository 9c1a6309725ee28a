//! Suite discovery and loading.
//!
//! The data root holds one directory per suite. Each directory contains the
//! seed dataset plus any number of `*.json` suite files, each a JSON array of
//! `{"statements": "...", "results": [ {..row..}, ... ]}`.

use std::fs;
use std::path::{Path, PathBuf};

use qcheck_error::{HarnessError, Result};
use qcheck_types::Row;
use serde::{Deserialize, Serialize};

/// One stored statement and the rows it must produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(rename = "statements")]
    pub statement: String,
    #[serde(rename = "results")]
    pub expected_rows: Vec<Row>,
}

impl TestCase {
    pub fn new(statement: impl Into<String>, expected_rows: Vec<Row>) -> Self {
        Self {
            statement: statement.into(),
            expected_rows,
        }
    }
}

/// Parse the suite file at `path`.
///
/// # Errors
///
/// `Io` if the file cannot be read, `SuiteParse` if it is not a valid suite
/// (including text that is not UTF-8).
pub fn load_suite(path: &Path) -> Result<Vec<TestCase>> {
    let bytes = fs::read(path)?;
    parse_suite(path, &bytes)
}

/// Parse suite bytes; `path` is only used for error reporting.
pub fn parse_suite(path: &Path, bytes: &[u8]) -> Result<Vec<TestCase>> {
    serde_json::from_slice(bytes).map_err(|source| HarnessError::SuiteParse {
        path: path.to_path_buf(),
        source,
    })
}

/// Suite directories directly under `data_dir`, sorted by path.
pub fn suite_directories(data_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(data_dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// `*.json` files directly inside `suite_dir`, sorted by path.
pub fn suite_files(suite_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(suite_dir)? {
        let entry = entry?;
        let path = entry.path();
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if is_json && entry.file_type()?.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use qcheck_types::Value;

    use super::*;

    #[test]
    fn parses_wire_field_names() {
        let cases = parse_suite(
            Path::new("s.json"),
            br#"[{"statements": "SELECT a FROM t", "results": [{"a": 1}, {"a": null}]}]"#,
        )
        .unwrap();
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].statement, "SELECT a FROM t");
        assert_eq!(cases[0].expected_rows[0].get("a"), Some(&Value::from(1)));
        assert_eq!(cases[0].expected_rows[1].get("a"), Some(&Value::Null));
    }

    #[test]
    fn malformed_suite_names_the_file() {
        let err = parse_suite(Path::new("broken.json"), b"{not json").unwrap_err();
        assert!(matches!(err, HarnessError::SuiteParse { .. }));
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("broken.json"));
    }

    #[test]
    fn invalid_utf8_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latin1.json");
        fs::write(&path, b"[{\"statements\": \"SELECT \xff\", \"results\": []}]").unwrap();
        let err = load_suite(&path).unwrap_err();
        assert!(matches!(err, HarnessError::SuiteParse { ref path, .. } if path.ends_with("latin1.json")));
        assert!(!err.is_fatal());
    }

    #[test]
    fn discovery_is_sorted_and_filtered() {
        let root = tempfile::tempdir().unwrap();
        for name in ["zeta", "alpha"] {
            fs::create_dir(root.path().join(name)).unwrap();
        }
        fs::write(root.path().join("stray.json"), "[]").unwrap();
        let suite = root.path().join("alpha");
        fs::write(suite.join("b.json"), "[]").unwrap();
        fs::write(suite.join("a.json"), "[]").unwrap();
        fs::write(suite.join("notes.txt"), "").unwrap();
        fs::create_dir(suite.join("data.cblite2")).unwrap();

        let dirs = suite_directories(root.path()).unwrap();
        assert_eq!(dirs, vec![root.path().join("alpha"), root.path().join("zeta")]);

        let files = suite_files(&suite).unwrap();
        assert_eq!(files, vec![suite.join("a.json"), suite.join("b.json")]);
        assert!(load_suite(&files[0]).unwrap().is_empty());
    }
}
