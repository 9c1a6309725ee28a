//! Query conformance harness.
//!
//! Runs stored statements against a query engine and checks the rows it
//! returns against recorded expectations:
//! - **Suites**: directories of JSON case files next to a seed dataset
//! - **Execution**: compile, run and drain one statement per case
//! - **Comparison**: structural, numerically tolerant, optionally unordered
//! - **Reporting**: concurrent aggregation into a JSON run report

pub mod comparison;
pub mod config;
pub mod console;
pub mod executor;
pub mod logging;
pub mod orchestrator;
pub mod report;
pub mod suite;

pub use comparison::{OrderMode, results_equal, values_equal};
pub use config::{DispatchMode, RunConfig};
pub use console::Console;
pub use executor::execute_case;
pub use orchestrator::{Orchestrator, RunSummary, SuiteRun};
pub use report::{ErrorOutcome, FailOutcome, Outcome, ResultAggregator, RunReport};
pub use suite::TestCase;
