//! Runtime entry-point resolution for dynamically loaded engines.

#![allow(unsafe_code)]

use std::collections::HashMap;
use std::ffi::c_void;
use std::path::{Path, PathBuf};

use libloading::Library;
use parking_lot::RwLock;
use qcheck_error::{HarnessError, Result};
use tracing::{debug, info};

/// A loaded shared library plus a by-name cache of resolved entry points.
///
/// Lookups go through the cache, so each symbol hits the dynamic loader at
/// most once for the lifetime of the table.
pub struct SymbolTable {
    path: PathBuf,
    library: Library,
    resolved: RwLock<HashMap<&'static str, usize>>,
}

impl SymbolTable {
    /// Load the library at `path`.
    ///
    /// # Errors
    ///
    /// `LibraryNotFound` if the file does not exist, `LibraryLoad` if the
    /// dynamic loader rejects it.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(HarnessError::LibraryNotFound {
                path: path.to_path_buf(),
            });
        }

        // SAFETY: loading runs the library's initialisers. The harness only
        // ever loads the engine runtime it was pointed at.
        let library = unsafe { Library::new(path) }.map_err(|err| HarnessError::LibraryLoad {
            path: path.to_path_buf(),
            detail: err.to_string(),
        })?;

        info!(path = %path.display(), "engine library loaded");
        Ok(Self {
            path: path.to_path_buf(),
            library,
            resolved: RwLock::new(HashMap::new()),
        })
    }

    /// Address of entry point `name`, resolving and caching it on first use.
    ///
    /// # Errors
    ///
    /// `MissingSymbol` if the library does not export `name`.
    pub fn address(&self, name: &'static str) -> Result<*const c_void> {
        if let Some(&addr) = self.resolved.read().get(name) {
            return Ok(addr as *const c_void);
        }

        let mut symbol_name = Vec::with_capacity(name.len() + 1);
        symbol_name.extend_from_slice(name.as_bytes());
        symbol_name.push(0);

        debug!(symbol = name, "resolving engine entry point");
        // SAFETY: the symbol is read as an opaque address; it is only called
        // after being cast to the signature declared by the binding.
        let addr = unsafe {
            self.library
                .get::<*const c_void>(&symbol_name)
                .map(|sym| *sym)
                .map_err(|_| HarnessError::MissingSymbol {
                    name: name.to_owned(),
                })?
        };
        if addr.is_null() {
            return Err(HarnessError::MissingSymbol {
                name: name.to_owned(),
            });
        }
        debug!(symbol = name, address = ?addr, "entry point resolved");

        self.resolved.write().insert(name, addr as usize);
        Ok(addr)
    }

    /// Resolve `name` and reinterpret it as the function pointer type `F`.
    ///
    /// # Safety
    ///
    /// `F` must be an `extern "C"` function pointer type matching the real
    /// signature of the exported symbol.
    pub unsafe fn function<F: Copy>(&self, name: &'static str) -> Result<F> {
        if std::mem::size_of::<F>() != std::mem::size_of::<*const c_void>() {
            return Err(HarnessError::internal(format!(
                "entry point `{name}` requested as a non pointer-sized type"
            )));
        }
        let addr = self.address(name)?;
        // SAFETY: sizes checked above; signature correctness is the caller's
        // contract.
        Ok(unsafe { std::mem::transmute_copy::<*const c_void, F>(&addr) })
    }

    /// Number of distinct entry points resolved so far.
    #[must_use]
    pub fn resolved_count(&self) -> usize {
        self.resolved.read().len()
    }
}

impl std::fmt::Debug for SymbolTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymbolTable")
            .field("path", &self.path)
            .field("resolved", &self.resolved_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_library_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = SymbolTable::open(&dir.path().join("libnope.so")).unwrap_err();
        assert!(matches!(err, HarnessError::LibraryNotFound { .. }));
        assert_eq!(err.exit_code(), -1);
    }

    #[test]
    fn non_library_file_is_load_failure() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("libbogus.so");
        std::fs::write(&bogus, b"definitely not an ELF image").unwrap();
        let err = SymbolTable::open(&bogus).unwrap_err();
        assert!(matches!(err, HarnessError::LibraryLoad { .. }), "{err}");
    }
}
