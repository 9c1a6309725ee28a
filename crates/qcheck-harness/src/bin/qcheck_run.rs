//! qcheck-run: execute stored query suites against an engine and report.
//!
//! Exit status is the number of failed plus errored cases, `-1` when the
//! engine library cannot be loaded, and `2` on a usage error.

use std::ffi::OsString;
use std::io::{self, Write as _};
use std::num::NonZeroUsize;
use std::path::PathBuf;

use qcheck_engine::{LiteCoreEngine, QueryEngine, ScriptedEngine};
use qcheck_error::HarnessError;
use qcheck_harness::logging::{TraceLevel, init_logging};
use qcheck_harness::{Console, DispatchMode, Orchestrator, RunConfig};
use tracing::warn;

/// Supplies the working directory when `--working-dir` is absent.
const WORKING_DIR_ENV: &str = "QCHECK_WORKING_DIR";

// ── CLI Types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct CliArgs {
    config: RunConfig,
    trace: TraceLevel,
    scripted: Option<PathBuf>,
}

fn main() {
    let exit_code = run_cli(std::env::args_os());
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

fn run_cli<I>(os_args: I) -> i32
where
    I: IntoIterator<Item = OsString>,
{
    let raw: Vec<String> = os_args
        .into_iter()
        .map(|a| a.to_string_lossy().into_owned())
        .collect();

    let tail = if raw.len() > 1 { &raw[1..] } else { &[] };

    if tail.iter().any(|a| a == "-h" || a == "--help") {
        print_help();
        return 0;
    }

    let args = match parse_args(tail) {
        Ok(args) => args,
        Err(message) => {
            eprintln!("error: {message}");
            eprintln!();
            print_help();
            return 2;
        }
    };

    init_logging(args.trace);
    let console = Console::stdout(args.config.color);

    match &args.scripted {
        Some(script) => match ScriptedEngine::from_path(script) {
            Ok(engine) => execute(&engine, &args.config, &console),
            Err(err) => report_fatal(&err),
        },
        None => match LiteCoreEngine::load(&args.config.resolved_library_path()) {
            Ok(engine) => {
                engine.set_engine_log_level(args.config.engine_log_level);
                execute(&engine, &args.config, &console)
            }
            Err(err) => report_fatal(&err),
        },
    }
}

fn parse_args(tail: &[String]) -> Result<CliArgs, String> {
    let mut working_dir = std::env::var_os(WORKING_DIR_ENV).map(PathBuf::from);
    let mut config = RunConfig::default();
    let mut trace = TraceLevel::default();
    let mut scripted = None;

    let mut iter = tail.iter();
    while let Some(arg) = iter.next() {
        let mut value = || {
            iter.next()
                .cloned()
                .ok_or_else(|| format!("{arg} requires a value"))
        };
        match arg.as_str() {
            "--working-dir" => working_dir = Some(PathBuf::from(value()?)),
            "--library" => config.library_path = Some(PathBuf::from(value()?)),
            "--data" => config.data_dir = Some(PathBuf::from(value()?)),
            "-o" | "--ignore-order" => config.ignore_order = true,
            "-j" | "--json-report" => config.report_path = Some(PathBuf::from(value()?)),
            "--single-thread" => config.dispatch = DispatchMode::Sequential,
            "--jobs" => {
                let text = value()?;
                let jobs = text
                    .parse::<NonZeroUsize>()
                    .map_err(|_| format!("--jobs expects a positive integer, got '{text}'"))?;
                config.dispatch = DispatchMode::Concurrent { jobs };
            }
            "--trace" => trace = value()?.parse()?,
            "--no-color" => config.color = false,
            "--scripted" => scripted = Some(PathBuf::from(value()?)),
            other => return Err(format!("unknown argument '{other}'")),
        }
    }

    if let Some(dir) = working_dir {
        config.working_dir = dir;
    }
    Ok(CliArgs {
        config,
        trace,
        scripted,
    })
}

fn execute<E: QueryEngine>(engine: &E, config: &RunConfig, console: &Console) -> i32 {
    match Orchestrator::new(engine, config, console).run() {
        Ok(summary) => {
            if !summary.malformed_suites.is_empty() {
                warn!(
                    count = summary.malformed_suites.len(),
                    "some suite files were skipped as malformed"
                );
            }
            summary.exit_code()
        }
        Err(err) => report_fatal(&err),
    }
}

fn report_fatal(err: &HarnessError) -> i32 {
    let _ = io::stderr().write_all(fatal_message(err).as_bytes());
    err.exit_code()
}

fn fatal_message(err: &HarnessError) -> String {
    match err.suggestion() {
        Some(hint) => format!("error: {err}\nhint: {hint}\n"),
        None => format!("error: {err}\n"),
    }
}

fn print_help() {
    let text = "\
qcheck-run — query engine conformance harness

USAGE:
    qcheck-run [OPTIONS]

Runs every suite directory under the data root: opens the dataset `data`
inside it, executes each statement from its *.json files and compares the
rows against the recorded results.

OPTIONS:
    --working-dir <DIR>     Root for default library, data and report paths
                            (default: $QCHECK_WORKING_DIR or .)
    --library <PATH>        Engine library (default: <working>/lib/lib/libLiteCore.so)
    --data <DIR>            Suite root (default: <working>/out)
    -o, --ignore-order      Compare result rows and nested lists as multisets
    -j, --json-report <FILE>
                            Write the run report as JSON (relative to working dir)
    --single-thread         Execute cases one at a time
    --jobs <N>              Worker threads (default: available parallelism)
    --trace <LEVEL>         normal | detailed | verbose (RUST_LOG overrides)
    --no-color              Disable ANSI color output
    --scripted <FILE>       Dry run against a scripted engine definition
    -h, --help              Show this help message
";
    let _ = io::stdout().write_all(text.as_bytes());
}

// ── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use super::*;

    fn run_with(args: &[&str]) -> i32 {
        let os_args: Vec<OsString> = args.iter().map(OsString::from).collect();
        run_cli(os_args)
    }

    fn parse(args: &[&str]) -> Result<CliArgs, String> {
        let owned: Vec<String> = args.iter().map(|a| (*a).to_owned()).collect();
        parse_args(&owned)
    }

    #[test]
    fn help_exits_zero() {
        assert_eq!(run_with(&["qcheck-run", "--help"]), 0);
        assert_eq!(run_with(&["qcheck-run", "-h"]), 0);
    }

    #[test]
    fn usage_errors_exit_two() {
        assert_eq!(run_with(&["qcheck-run", "--bogus"]), 2);
        assert_eq!(run_with(&["qcheck-run", "--jobs"]), 2);
        assert_eq!(run_with(&["qcheck-run", "--jobs", "0"]), 2);
        assert_eq!(run_with(&["qcheck-run", "--trace", "loud"]), 2);
    }

    #[test]
    fn flags_populate_config() {
        let args = parse(&[
            "--working-dir",
            "/w",
            "-o",
            "-j",
            "report.json",
            "--jobs",
            "3",
            "--trace",
            "verbose",
            "--no-color",
        ])
        .unwrap();
        assert_eq!(args.config.working_dir, PathBuf::from("/w"));
        assert!(args.config.ignore_order);
        assert!(!args.config.color);
        assert_eq!(args.trace, TraceLevel::Verbose);
        assert_eq!(
            args.config.resolved_report_path(),
            Some(PathBuf::from("/w/report.json"))
        );
        assert_eq!(args.config.dispatch.workers(), 3);

        let args = parse(&["--single-thread"]).unwrap();
        assert_eq!(args.config.dispatch, DispatchMode::Sequential);
    }

    #[test]
    fn missing_library_exits_minus_one() {
        let dir = tempfile::tempdir().unwrap();
        let working = dir.path().to_str().unwrap();
        assert_eq!(run_with(&["qcheck-run", "--working-dir", working]), -1);
    }

    #[test]
    fn fatal_message_reports_error_once_with_hint() {
        let err = HarnessError::LibraryNotFound {
            path: PathBuf::from("/opt/libLiteCore.so"),
        };
        let text = fatal_message(&err);
        assert_eq!(text.matches("engine library not found").count(), 1);
        assert!(text.starts_with("error: engine library not found: '/opt/libLiteCore.so'\n"));
        assert!(text.ends_with("hint: Install the engine runtime or pass --library <path>\n"));

        let plain = fatal_message(&HarnessError::internal("boom"));
        assert_eq!(plain, "error: internal error: boom\n");
    }

    fn write_suite(root: &Path) {
        let suite = root.join("out").join("widgets");
        fs::create_dir_all(&suite).unwrap();
        fs::write(
            suite.join("cases.json"),
            r#"[
                {"statements": "SELECT a FROM widgets", "results": [{"a": 1}]},
                {"statements": "SELECT a FROM gadgets", "results": [{"a": 1}]},
                {"statements": "SELECT FRM x", "results": []}
            ]"#,
        )
        .unwrap();
        fs::write(
            root.join("script.json"),
            r#"[
                {"statement": "SELECT a FROM widgets", "rows": [{"a": 1}]},
                {"statement": "SELECT a FROM gadgets", "rows": [{"a": 2}]},
                {"statement": "SELECT FRM x FROM _", "compileError": {"message": "syntax error", "position": 7}}
            ]"#,
        )
        .unwrap();
    }

    #[test]
    fn scripted_dry_run_exit_code_counts_failures_and_errors() {
        let dir = tempfile::tempdir().unwrap();
        write_suite(dir.path());
        let working = dir.path().to_str().unwrap();
        let script = dir.path().join("script.json");
        let code = run_with(&[
            "qcheck-run",
            "--working-dir",
            working,
            "--scripted",
            script.to_str().unwrap(),
            "--no-color",
            "-j",
            "report.json",
        ]);
        assert_eq!(code, 2);
        let report =
            qcheck_harness::RunReport::read_from(&dir.path().join("report.json")).unwrap();
        assert_eq!(report.pass_count, 1);
        assert_eq!(report.fail_count, 1);
        assert_eq!(report.error_count, 1);
    }
}
