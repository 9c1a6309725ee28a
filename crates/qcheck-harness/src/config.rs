//! Run configuration.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use qcheck_engine::litecore::default_library_path;

/// Name of the dataset opened in every suite directory.
pub const DEFAULT_DATASET_NAME: &str = "data";

/// Subdirectory of the working directory holding suite directories.
pub const DEFAULT_DATA_SUBDIR: &str = "out";

/// Engine log callback level applied after load (LiteCore `kC4LogNone`).
pub const DEFAULT_ENGINE_LOG_LEVEL: i8 = 5;

/// How test cases are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Bounded pool of scoped worker threads pulling cases from a shared
    /// cursor. No ordering guarantee between cases.
    Concurrent { jobs: NonZeroUsize },
    /// One case at a time, in file order.
    Sequential,
}

impl DispatchMode {
    /// Concurrent dispatch sized to the machine.
    #[must_use]
    pub fn available() -> Self {
        let jobs = std::thread::available_parallelism().unwrap_or(NonZeroUsize::MIN);
        Self::Concurrent { jobs }
    }

    /// Number of workers this mode runs.
    #[must_use]
    pub const fn workers(self) -> usize {
        match self {
            Self::Concurrent { jobs } => jobs.get(),
            Self::Sequential => 1,
        }
    }
}

impl Default for DispatchMode {
    fn default() -> Self {
        Self::available()
    }
}

/// Configuration for one harness run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Root for the default library, data and report locations.
    pub working_dir: PathBuf,
    /// Native engine library. `None` means the platform default under
    /// `working_dir`.
    pub library_path: Option<PathBuf>,
    /// Directory of suite directories. `None` means `<working_dir>/out`.
    pub data_dir: Option<PathBuf>,
    /// Dataset name opened inside each suite directory.
    pub dataset_name: String,
    /// Compare result sequences as multisets.
    pub ignore_order: bool,
    pub dispatch: DispatchMode,
    /// Where to persist the JSON report; relative paths resolve against
    /// `working_dir`.
    pub report_path: Option<PathBuf>,
    /// ANSI colour on console output.
    pub color: bool,
    pub engine_log_level: i8,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("."),
            library_path: None,
            data_dir: None,
            dataset_name: DEFAULT_DATASET_NAME.to_owned(),
            ignore_order: false,
            dispatch: DispatchMode::default(),
            report_path: None,
            color: true,
            engine_log_level: DEFAULT_ENGINE_LOG_LEVEL,
        }
    }
}

impl RunConfig {
    /// Default configuration rooted at `working_dir`.
    #[must_use]
    pub fn rooted_at(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn resolved_library_path(&self) -> PathBuf {
        self.library_path
            .clone()
            .unwrap_or_else(|| default_library_path(&self.working_dir))
    }

    #[must_use]
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| self.working_dir.join(DEFAULT_DATA_SUBDIR))
    }

    #[must_use]
    pub fn resolved_report_path(&self) -> Option<PathBuf> {
        self.report_path
            .as_deref()
            .map(|p| resolve_against(&self.working_dir, p))
    }
}

fn resolve_against(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
