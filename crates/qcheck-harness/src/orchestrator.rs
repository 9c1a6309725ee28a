//! Run orchestration: discover suites, dispatch cases, aggregate, report.
//!
//! # Flow
//!
//! 1. List suite directories under the data root (sorted).
//! 2. Per directory: open the dataset once, load every `*.json` suite file,
//!    then execute all cases from those files against the shared dataset.
//! 3. After every directory: print totals, persist the report if requested.
//!
//! A dataset that cannot be opened aborts the run. A malformed suite file is
//! logged and skipped.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use qcheck_engine::QueryEngine;
use qcheck_error::{HarnessError, Result};
use tracing::{error, info};

use crate::comparison::OrderMode;
use crate::config::{DispatchMode, RunConfig};
use crate::console::Console;
use crate::executor::execute_case;
use crate::report::{ResultAggregator, RunReport};
use crate::suite::{self, TestCase};

/// Per-directory execution record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteRun {
    pub directory: PathBuf,
    pub files: usize,
    pub cases: usize,
    pub elapsed: Duration,
}

/// Everything a completed run produced.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub report: RunReport,
    pub suites: Vec<SuiteRun>,
    /// Suite files skipped because they could not be parsed.
    pub malformed_suites: Vec<PathBuf>,
    /// Where the report was written, if anywhere.
    pub report_path: Option<PathBuf>,
    pub elapsed: Duration,
}

impl RunSummary {
    /// Process exit status for this run.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.report.exit_code()
    }
}

/// Drives one run of the harness against `engine`.
pub struct Orchestrator<'a, E: QueryEngine> {
    engine: &'a E,
    config: &'a RunConfig,
    console: &'a Console,
}

impl<'a, E: QueryEngine> Orchestrator<'a, E> {
    pub fn new(engine: &'a E, config: &'a RunConfig, console: &'a Console) -> Self {
        Self {
            engine,
            config,
            console,
        }
    }

    /// Execute every suite under the configured data root.
    ///
    /// # Errors
    ///
    /// Fatal errors only: unreadable data root, dataset open failure, report
    /// write failure, or a panicked worker.
    pub fn run(&self) -> Result<RunSummary> {
        let started = Instant::now();
        let data_dir = self.config.resolved_data_dir();
        let mode = OrderMode::from_ignore_order(self.config.ignore_order);
        info!(
            engine = self.engine.name(),
            data_dir = %data_dir.display(),
            ?mode,
            workers = self.config.dispatch.workers(),
            "run starting"
        );

        let aggregator = ResultAggregator::new();
        let mut suites = Vec::new();
        let mut malformed_suites = Vec::new();
        for directory in suite::suite_directories(&data_dir)? {
            let run = self.run_directory(&directory, mode, &aggregator, &mut malformed_suites)?;
            suites.push(run);
        }

        let report = aggregator.into_report();
        self.console.summary(&report);

        let report_path = self.config.resolved_report_path();
        if let Some(path) = &report_path {
            report.write_to(path)?;
            info!(path = %path.display(), "run report written");
        }

        let elapsed = started.elapsed();
        info!(
            pass = report.pass_count,
            fail = report.fail_count,
            error = report.error_count,
            elapsed_ms = duration_to_u64_ms(elapsed),
            "run finished"
        );
        Ok(RunSummary {
            report,
            suites,
            malformed_suites,
            report_path,
            elapsed,
        })
    }

    fn run_directory(
        &self,
        directory: &Path,
        mode: OrderMode,
        aggregator: &ResultAggregator,
        malformed_suites: &mut Vec<PathBuf>,
    ) -> Result<SuiteRun> {
        let started = Instant::now();
        let name = &self.config.dataset_name;
        let dataset = self
            .engine
            .open_dataset(directory, name)
            .map_err(|err| {
                let err = HarnessError::DatasetOpen {
                    name: name.clone(),
                    directory: directory.to_path_buf(),
                    detail: err.message,
                };
                error!(error = %err, "dataset unavailable, aborting run");
                err
            })?;

        let files = suite::suite_files(directory)?;
        let mut cases: Vec<TestCase> = Vec::new();
        for file in &files {
            match suite::load_suite(file) {
                Ok(loaded) => cases.extend(loaded),
                Err(err) if !err.is_fatal() => {
                    error!(file = %file.display(), error = %err, "skipping malformed suite file");
                    malformed_suites.push(file.clone());
                }
                Err(err) => return Err(err),
            }
        }

        self.dispatch(&dataset, &cases, mode, aggregator)?;
        drop(dataset);

        let elapsed = started.elapsed();
        info!(
            suite = %directory.display(),
            files = files.len(),
            cases = cases.len(),
            elapsed_ms = duration_to_u64_ms(elapsed),
            "suite finished"
        );
        Ok(SuiteRun {
            directory: directory.to_path_buf(),
            files: files.len(),
            cases: cases.len(),
            elapsed,
        })
    }

    fn dispatch(
        &self,
        dataset: &E::Dataset,
        cases: &[TestCase],
        mode: OrderMode,
        aggregator: &ResultAggregator,
    ) -> Result<()> {
        let run_one = |case: &TestCase| {
            let outcome = execute_case(self.engine, dataset, case, mode);
            self.console.outcome(&outcome);
            aggregator.record(outcome);
        };

        let workers = match self.config.dispatch {
            DispatchMode::Sequential => 1,
            DispatchMode::Concurrent { jobs } => jobs.get().min(cases.len()),
        };
        if workers <= 1 {
            cases.iter().for_each(&run_one);
            return Ok(());
        }

        let next = AtomicUsize::new(0);
        let panicked = std::thread::scope(|s| {
            let mut joins = Vec::with_capacity(workers);
            for _ in 0..workers {
                let next = &next;
                let run_one = &run_one;
                joins.push(s.spawn(move || {
                    while let Some(case) = cases.get(next.fetch_add(1, Ordering::Relaxed)) {
                        run_one(case);
                    }
                }));
            }
            joins
                .into_iter()
                .map(std::thread::ScopedJoinHandle::join)
                .filter(|joined| joined.is_err())
                .count()
        });

        if panicked > 0 {
            return Err(HarnessError::internal(format!(
                "{panicked} worker thread(s) panicked"
            )));
        }
        Ok(())
    }
}

fn duration_to_u64_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
