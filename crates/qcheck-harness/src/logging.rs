//! Diagnostic logging setup for the `qcheck-run` binary.

use std::str::FromStr;

use tracing_subscriber::EnvFilter;

/// Verbosity selected with `--trace`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraceLevel {
    /// Warnings and errors only.
    #[default]
    Normal,
    /// Adds per-suite progress.
    Detailed,
    /// Everything, including per-case and entry point resolution.
    Verbose,
}

impl TraceLevel {
    /// Filter directive used when `RUST_LOG` is unset.
    #[must_use]
    pub const fn directive(self) -> &'static str {
        match self {
            Self::Normal => "warn",
            Self::Detailed => "info",
            Self::Verbose => "trace",
        }
    }
}

impl FromStr for TraceLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "normal" => Ok(Self::Normal),
            "detailed" => Ok(Self::Detailed),
            "verbose" => Ok(Self::Verbose),
            other => Err(format!(
                "unknown trace level '{other}' (expected normal, detailed or verbose)"
            )),
        }
    }
}

/// Install the global fmt subscriber on stderr. `RUST_LOG` wins over `level`.
///
/// Returns `false` if a subscriber was already installed.
pub fn init_logging(level: TraceLevel) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.directive()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_levels_case_insensitively() {
        assert_eq!("Verbose".parse::<TraceLevel>(), Ok(TraceLevel::Verbose));
        assert_eq!("detailed".parse::<TraceLevel>(), Ok(TraceLevel::Detailed));
        assert_eq!("NORMAL".parse::<TraceLevel>(), Ok(TraceLevel::Normal));
        assert!("loud".parse::<TraceLevel>().is_err());
    }

    #[test]
    fn levels_map_to_filter_directives() {
        assert_eq!(TraceLevel::Normal.directive(), "warn");
        assert_eq!(TraceLevel::Detailed.directive(), "info");
        assert_eq!(TraceLevel::Verbose.directive(), "trace");
    }
}
