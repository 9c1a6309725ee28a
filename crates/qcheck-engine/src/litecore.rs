//! Dynamic binding to a LiteCore-compatible engine runtime.
//!
//! The shared library is loaded at runtime (the harness is built without
//! linking against it). All required entry points are resolved once in
//! [`LiteCoreEngine::load`]; a missing one is fatal. Values leave the engine as
//! JSON text (`FLValue_ToJSON`) and are parsed straight into the value model.

#![allow(unsafe_code)]

use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::Arc;

use qcheck_types::Value;
use tracing::{debug, info, warn};

use crate::binding::{CompileError, EngineError, QueryEngine, RowColumns};
use crate::symbols::SymbolTable;

/// Query language selector passed to `c4query_new2` (N1QL).
const QUERY_LANGUAGE_N1QL: u32 = 1;

/// `C4DatabaseFlags` used when opening seed datasets: open existing, no
/// special behaviour.
const DATABASE_OPEN_FLAGS: u32 = 0;

/// Width of the `missingColumns` bitmap in a query enumerator.
const MISSING_COLUMN_BITS: usize = 64;

/// Entry points the binding cannot run without. Resolved eagerly at load time.
pub const REQUIRED_ENTRY_POINTS: [&str; 13] = [
    "c4db_openNamed",
    "c4base_release",
    "c4error_getDescription",
    "_FLBuf_Release",
    "c4query_new2",
    "c4query_columnTitle",
    "c4query_run",
    "c4queryenum_next",
    "c4queryenum_release",
    "FLArrayIterator_GetCount",
    "FLArrayIterator_GetValue",
    "FLArrayIterator_Next",
    "FLValue_ToJSON",
];

/// Resolved on first use; absence only disables engine-side logging.
const LOG_LEVEL_ENTRY_POINT: &str = "c4log_setCallbackLevel";

// ─── Native layouts ─────────────────────────────────────────────────────
//
// These must mirror the engine's public C headers.

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct C4Error {
    domain: u32,
    code: i32,
    internal_info: i32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct FlSlice {
    buf: *const c_void,
    size: usize,
}

impl FlSlice {
    const NULL: Self = Self {
        buf: std::ptr::null(),
        size: 0,
    };

    fn from_str(s: &str) -> Self {
        Self {
            buf: s.as_ptr().cast(),
            size: s.len(),
        }
    }

    /// Copy the slice contents out as a `String`.
    ///
    /// # Safety
    ///
    /// `buf` must be null or valid for `size` bytes.
    unsafe fn to_owned_string(self) -> String {
        if self.buf.is_null() || self.size == 0 {
            return String::new();
        }
        // SAFETY: guaranteed by the caller.
        let bytes = unsafe { std::slice::from_raw_parts(self.buf.cast::<u8>(), self.size) };
        String::from_utf8_lossy(bytes).into_owned()
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct FlSliceResult {
    buf: *const c_void,
    size: usize,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct C4EncryptionKey {
    algorithm: u32,
    bytes: [u8; 32],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct C4DatabaseConfig2 {
    parent_directory: FlSlice,
    flags: u32,
    encryption_key: C4EncryptionKey,
}

#[repr(C)]
#[derive(Debug)]
struct FlArrayIterator {
    _private1: *const c_void,
    _private2: u32,
    _private3: bool,
    _private4: *const c_void,
}

#[repr(C)]
#[derive(Debug)]
struct C4QueryEnumerator {
    columns: FlArrayIterator,
    missing_columns: u64,
    full_text_match_count: u32,
    full_text_matches: *const c_void,
}

type OpenNamedFn =
    unsafe extern "C" fn(FlSlice, *const C4DatabaseConfig2, *mut C4Error) -> *mut c_void;
type BaseReleaseFn = unsafe extern "C" fn(*mut c_void);
type ErrorDescriptionFn = unsafe extern "C" fn(C4Error) -> FlSliceResult;
type BufReleaseFn = unsafe extern "C" fn(*const c_void);
type SetLogLevelFn = unsafe extern "C" fn(i8);
type NewQueryFn =
    unsafe extern "C" fn(*mut c_void, u32, FlSlice, *mut i32, *mut C4Error) -> *mut c_void;
type ColumnTitleFn = unsafe extern "C" fn(*mut c_void, u32) -> FlSlice;
type RunQueryFn = unsafe extern "C" fn(*mut c_void, FlSlice, *mut C4Error) -> *mut C4QueryEnumerator;
type EnumNextFn = unsafe extern "C" fn(*mut C4QueryEnumerator, *mut C4Error) -> bool;
type EnumReleaseFn = unsafe extern "C" fn(*mut C4QueryEnumerator);
type IterCountFn = unsafe extern "C" fn(*const FlArrayIterator) -> u32;
type IterValueFn = unsafe extern "C" fn(*const FlArrayIterator) -> *const c_void;
type IterNextFn = unsafe extern "C" fn(*mut FlArrayIterator) -> bool;
type ToJsonFn = unsafe extern "C" fn(*const c_void) -> FlSliceResult;

// ─── Resolved API ───────────────────────────────────────────────────────

/// Typed entry points resolved from a loaded library.
struct LiteCoreApi {
    symbols: SymbolTable,
    open_named: OpenNamedFn,
    base_release: BaseReleaseFn,
    error_description: ErrorDescriptionFn,
    buf_release: BufReleaseFn,
    new_query: NewQueryFn,
    column_title: ColumnTitleFn,
    run_query: RunQueryFn,
    enum_next: EnumNextFn,
    enum_release: EnumReleaseFn,
    iter_count: IterCountFn,
    iter_value: IterValueFn,
    iter_next: IterNextFn,
    value_to_json: ToJsonFn,
}

impl LiteCoreApi {
    fn resolve(symbols: SymbolTable) -> qcheck_error::Result<Self> {
        for name in REQUIRED_ENTRY_POINTS {
            symbols.address(name)?;
        }

        // SAFETY: each type alias above mirrors the C declaration of the
        // symbol it is paired with.
        unsafe {
            Ok(Self {
                open_named: symbols.function("c4db_openNamed")?,
                base_release: symbols.function("c4base_release")?,
                error_description: symbols.function("c4error_getDescription")?,
                buf_release: symbols.function("_FLBuf_Release")?,
                new_query: symbols.function("c4query_new2")?,
                column_title: symbols.function("c4query_columnTitle")?,
                run_query: symbols.function("c4query_run")?,
                enum_next: symbols.function("c4queryenum_next")?,
                enum_release: symbols.function("c4queryenum_release")?,
                iter_count: symbols.function("FLArrayIterator_GetCount")?,
                iter_value: symbols.function("FLArrayIterator_GetValue")?,
                iter_next: symbols.function("FLArrayIterator_Next")?,
                value_to_json: symbols.function("FLValue_ToJSON")?,
                symbols,
            })
        }
    }

    /// Engine description for `err`, copied out of the engine-owned buffer.
    fn describe(&self, err: C4Error) -> String {
        // SAFETY: the returned slice result is owned by us and released by
        // the guard.
        let owned = OwnedSlice {
            api: self,
            raw: unsafe { (self.error_description)(err) },
        };
        let text = owned.to_owned_string();
        if text.is_empty() {
            format!("engine error domain={} code={}", err.domain, err.code)
        } else {
            text
        }
    }
}

/// An engine-allocated buffer released on drop.
struct OwnedSlice<'a> {
    api: &'a LiteCoreApi,
    raw: FlSliceResult,
}

impl OwnedSlice<'_> {
    fn to_owned_string(&self) -> String {
        // SAFETY: the engine returned this buffer with the given size and it
        // stays alive until `self` drops.
        unsafe {
            FlSlice {
                buf: self.raw.buf,
                size: self.raw.size,
            }
            .to_owned_string()
        }
    }
}

impl Drop for OwnedSlice<'_> {
    fn drop(&mut self) {
        if !self.raw.buf.is_null() {
            // SAFETY: buffer came from the engine and is released once.
            unsafe { (self.api.buf_release)(self.raw.buf) };
        }
    }
}

// ─── Handles ────────────────────────────────────────────────────────────

/// An open database. Released with `c4base_release` on drop.
pub struct LiteCoreDataset {
    api: Arc<LiteCoreApi>,
    raw: NonNull<c_void>,
    name: String,
}

impl Drop for LiteCoreDataset {
    fn drop(&mut self) {
        debug!(dataset = %self.name, "releasing dataset handle");
        // SAFETY: `raw` was returned by `c4db_openNamed` and is released once.
        unsafe { (self.api.base_release)(self.raw.as_ptr()) };
    }
}

// SAFETY: LiteCore database handles are reference counted and internally
// locked; compiling queries concurrently against one handle is supported.
unsafe impl Send for LiteCoreDataset {}
// SAFETY: see above.
unsafe impl Sync for LiteCoreDataset {}

/// A compiled query. Released with `c4base_release` on drop.
pub struct LiteCoreQuery {
    api: Arc<LiteCoreApi>,
    raw: NonNull<c_void>,
}

impl Drop for LiteCoreQuery {
    fn drop(&mut self) {
        // SAFETY: `raw` was returned by `c4query_new2` and is released once.
        unsafe { (self.api.base_release)(self.raw.as_ptr()) };
    }
}

/// A query enumerator. Released with `c4queryenum_release` on drop.
pub struct LiteCoreCursor {
    api: Arc<LiteCoreApi>,
    raw: NonNull<C4QueryEnumerator>,
}

impl Drop for LiteCoreCursor {
    fn drop(&mut self) {
        // SAFETY: `raw` was returned by `c4query_run` and is released once.
        unsafe { (self.api.enum_release)(self.raw.as_ptr()) };
    }
}

// ─── Engine ─────────────────────────────────────────────────────────────

/// Engine binding backed by a dynamically loaded LiteCore library.
#[derive(Clone)]
pub struct LiteCoreEngine {
    api: Arc<LiteCoreApi>,
}

impl std::fmt::Debug for LiteCoreEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiteCoreEngine")
            .field("symbols", &self.api.symbols)
            .finish()
    }
}

impl LiteCoreEngine {
    /// Load the engine library at `path` and resolve every required entry
    /// point.
    ///
    /// # Errors
    ///
    /// Fatal library errors: `LibraryNotFound`, `LibraryLoad`, `MissingSymbol`.
    pub fn load(path: &Path) -> qcheck_error::Result<Self> {
        let symbols = SymbolTable::open(path)?;
        let api = LiteCoreApi::resolve(symbols)?;
        info!(
            path = %path.display(),
            entry_points = api.symbols.resolved_count(),
            "engine binding ready"
        );
        Ok(Self { api: Arc::new(api) })
    }

    /// Set the engine's own log callback level (lower is more verbose).
    pub fn set_engine_log_level(&self, level: i8) {
        // SAFETY: signature mirrors `c4log_setCallbackLevel(C4LogLevel)`.
        match unsafe {
            self.api
                .symbols
                .function::<SetLogLevelFn>(LOG_LEVEL_ENTRY_POINT)
        } {
            // SAFETY: plain value argument.
            Ok(set_level) => unsafe { set_level(level) },
            Err(err) => warn!(error = %err, "engine log level not set"),
        }
    }
}

impl QueryEngine for LiteCoreEngine {
    type Dataset = LiteCoreDataset;
    type Query = LiteCoreQuery;
    type Cursor = LiteCoreCursor;

    fn name(&self) -> &str {
        "litecore"
    }

    fn open_dataset(&self, directory: &Path, name: &str) -> Result<LiteCoreDataset, EngineError> {
        let parent = directory.to_str().ok_or_else(|| {
            EngineError::new(format!(
                "dataset directory is not valid UTF-8: {}",
                directory.display()
            ))
        })?;
        let config = C4DatabaseConfig2 {
            parent_directory: FlSlice::from_str(parent),
            flags: DATABASE_OPEN_FLAGS,
            encryption_key: C4EncryptionKey {
                algorithm: 0,
                bytes: [0; 32],
            },
        };
        let mut err = C4Error::default();
        // SAFETY: both slices borrow strings that outlive the call.
        let raw = unsafe { (self.api.open_named)(FlSlice::from_str(name), &config, &mut err) };
        match NonNull::new(raw) {
            Some(raw) => {
                debug!(dataset = name, directory = parent, "dataset opened");
                Ok(LiteCoreDataset {
                    api: Arc::clone(&self.api),
                    raw,
                    name: name.to_owned(),
                })
            }
            None => Err(EngineError::new(self.api.describe(err))),
        }
    }

    fn compile(
        &self,
        dataset: &LiteCoreDataset,
        statement: &str,
    ) -> Result<LiteCoreQuery, CompileError> {
        let mut error_position: i32 = -1;
        let mut err = C4Error::default();
        // SAFETY: `dataset.raw` is live for the borrow; the statement slice
        // outlives the call.
        let raw = unsafe {
            (self.api.new_query)(
                dataset.raw.as_ptr(),
                QUERY_LANGUAGE_N1QL,
                FlSlice::from_str(statement),
                &mut error_position,
                &mut err,
            )
        };
        NonNull::new(raw)
            .map(|raw| LiteCoreQuery {
                api: Arc::clone(&self.api),
                raw,
            })
            .ok_or_else(|| {
                CompileError::new(self.api.describe(err), i64::from(error_position))
            })
    }

    fn run(&self, query: &LiteCoreQuery, parameters: &str) -> Result<LiteCoreCursor, EngineError> {
        let params = if parameters.is_empty() {
            FlSlice::NULL
        } else {
            FlSlice::from_str(parameters)
        };
        let mut err = C4Error::default();
        // SAFETY: `query.raw` is live for the borrow.
        let raw = unsafe { (self.api.run_query)(query.raw.as_ptr(), params, &mut err) };
        NonNull::new(raw)
            .map(|raw| LiteCoreCursor {
                api: Arc::clone(&self.api),
                raw,
            })
            .ok_or_else(|| EngineError::new(self.api.describe(err)))
    }

    fn advance(&self, cursor: &mut LiteCoreCursor) -> Result<bool, EngineError> {
        let mut err = C4Error::default();
        // SAFETY: `cursor.raw` is live and exclusively borrowed.
        let more = unsafe { (self.api.enum_next)(cursor.raw.as_ptr(), &mut err) };
        if !more && err.code != 0 {
            return Err(EngineError::new(self.api.describe(err)));
        }
        Ok(more)
    }

    fn column_title(&self, query: &LiteCoreQuery, index: usize) -> String {
        let Ok(column) = u32::try_from(index) else {
            return String::new();
        };
        // SAFETY: the title slice is owned by the query, which outlives this
        // call; it is copied before returning.
        unsafe { (self.api.column_title)(query.raw.as_ptr(), column).to_owned_string() }
    }

    fn current_columns(&self, cursor: &mut LiteCoreCursor) -> Result<RowColumns, EngineError> {
        let enumerator = cursor.raw.as_ptr();
        // SAFETY: the enumerator is live and exclusively borrowed; the column
        // iterator lives inside it.
        unsafe {
            let columns = &raw mut (*enumerator).columns;
            let count = (self.api.iter_count)(columns) as usize;
            let missing = (*enumerator).missing_columns;
            let mut out = Vec::with_capacity(count);
            for index in 0..count {
                let is_missing = index < MISSING_COLUMN_BITS && missing & (1_u64 << index) != 0;
                if is_missing {
                    out.push(None);
                } else {
                    let value = (self.api.iter_value)(columns);
                    let json = OwnedSlice {
                        api: &self.api,
                        raw: (self.api.value_to_json)(value),
                    }
                    .to_owned_string();
                    let decoded = Value::from_json_str(&json).map_err(|err| {
                        EngineError::new(format!("column {index} is not valid JSON: {err}"))
                    })?;
                    out.push(Some(decoded));
                }
                if !(self.api.iter_next)(columns) {
                    break;
                }
            }
            Ok(out)
        }
    }
}

// ─── Library location ───────────────────────────────────────────────────

/// Platform file name of the engine runtime library.
#[must_use]
pub const fn default_library_filename() -> &'static str {
    if cfg!(target_os = "windows") {
        "LiteCore.dll"
    } else if cfg!(target_os = "macos") {
        "libLiteCore.dylib"
    } else {
        "libLiteCore.so"
    }
}

/// Where an installed runtime lives under a working directory:
/// `<working>/lib/bin/` on Windows, `<working>/lib/lib/` elsewhere.
#[must_use]
pub fn default_library_path(working_dir: &Path) -> PathBuf {
    let sub_dir = if cfg!(target_os = "windows") {
        "bin"
    } else {
        "lib"
    };
    working_dir
        .join("lib")
        .join(sub_dir)
        .join(default_library_filename())
}

#[cfg(test)]
mod tests {
    use qcheck_error::HarnessError;

    use super::*;

    #[test]
    fn load_reports_missing_library() {
        let dir = tempfile::tempdir().unwrap();
        let path = default_library_path(dir.path());
        let err = LiteCoreEngine::load(&path).unwrap_err();
        assert!(err.is_library_failure());
        assert!(matches!(err, HarnessError::LibraryNotFound { .. }));
    }

    #[test]
    fn default_path_is_under_lib() {
        let path = default_library_path(Path::new("/work"));
        assert!(path.starts_with("/work/lib"));
        assert_eq!(
            path.file_name().and_then(|n| n.to_str()),
            Some(default_library_filename())
        );
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn native_layouts_match_headers() {
        assert_eq!(std::mem::size_of::<C4Error>(), 12);
        assert_eq!(std::mem::size_of::<FlSlice>(), 16);
        assert_eq!(std::mem::size_of::<FlArrayIterator>(), 24);
        assert_eq!(std::mem::size_of::<C4QueryEnumerator>(), 48);
        assert_eq!(std::mem::size_of::<C4DatabaseConfig2>(), 56);
    }

    #[test]
    fn null_slice_reads_as_empty() {
        // SAFETY: null slice is explicitly handled.
        let text = unsafe { FlSlice::NULL.to_owned_string() };
        assert!(text.is_empty());
    }
}
