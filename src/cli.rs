//! Command-line interface for tender.
use std::{path::PathBuf, str::FromStr};

use clap::{Args, Parser, Subcommand};
use tracing::level_filters::LevelFilter;

use crate::service::OperationConfig;

/// Wrapper around `LevelFilter` so clap can parse log levels from either
/// string names ("info", "debug", etc.) or numeric shorthands (0-5).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// String representation suitable for `RUST_LOG`.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            LevelFilter::OFF => "off",
            LevelFilter::ERROR => "error",
            LevelFilter::WARN => "warn",
            LevelFilter::INFO => "info",
            LevelFilter::DEBUG => "debug",
            LevelFilter::TRACE => "trace",
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = trimmed.parse::<u8>() {
            let level = match number {
                0 => LevelFilter::OFF,
                1 => LevelFilter::ERROR,
                2 => LevelFilter::WARN,
                3 => LevelFilter::INFO,
                4 => LevelFilter::DEBUG,
                5 => LevelFilter::TRACE,
                _ => {
                    return Err(format!(
                        "unsupported log level number '{number}' (expected 0-5)"
                    ));
                }
            };

            return Ok(LogLevelArg(level));
        }

        let level = match trimmed.to_ascii_lowercase().as_str() {
            "off" => LevelFilter::OFF,
            "error" | "err" => LevelFilter::ERROR,
            "warn" | "warning" => LevelFilter::WARN,
            "info" => LevelFilter::INFO,
            "debug" => LevelFilter::DEBUG,
            "trace" => LevelFilter::TRACE,
            _ => return Err(format!("invalid log level '{trimmed}'")),
        };

        Ok(LogLevelArg(level))
    }
}

/// Command-line interface for tender.
#[derive(Parser, Debug)]
#[command(name = "tender", version)]
#[command(about = "Build, launch, verify and stop local development services", long_about = None)]
pub struct Cli {
    /// Override the logging verbosity for this invocation only.
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevelArg>,

    /// The command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Which services an operation applies to.
#[derive(Args, Debug, Clone, Default)]
pub struct TargetArgs {
    /// Services or groups to operate on (defaults to every service).
    #[arg(value_name = "NAME")]
    pub names: Vec<String>,

    /// Path to the configuration file (defaults to `tender.yaml`, then `tender.json`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Leave a service out of this operation. May be repeated.
    #[arg(long = "exclude", value_name = "NAME")]
    pub exclude: Vec<String>,
}

impl TargetArgs {
    /// Operation options for these arguments.
    pub fn operation(&self, skip_build: bool) -> OperationConfig {
        OperationConfig {
            exclusions: self.exclude.clone(),
            skip_build,
        }
    }
}

/// Available commands for tender.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build and launch services, waiting until each is ready.
    Start {
        #[command(flatten)]
        targets: TargetArgs,

        /// Launch without running build commands.
        #[arg(long)]
        skip_build: bool,
    },

    /// Stop services.
    Stop {
        #[command(flatten)]
        targets: TargetArgs,
    },

    /// Stop, rebuild and relaunch services.
    Restart {
        #[command(flatten)]
        targets: TargetArgs,

        /// Relaunch without running build commands.
        #[arg(long)]
        skip_build: bool,
    },

    /// Run build commands only.
    Build {
        #[command(flatten)]
        targets: TargetArgs,
    },

    /// Show the status of services.
    Status {
        #[command(flatten)]
        targets: TargetArgs,

        /// Emit machine-readable JSON output instead of a table.
        #[arg(long)]
        json: bool,

        /// Disable ANSI colors in output.
        #[arg(long = "no-color")]
        no_color: bool,
    },

    /// Run a launch command and capture its output (used internally by `start`).
    #[command(hide = true)]
    Run {
        /// Service being run; kept on the command line as its identity token.
        #[arg(long)]
        service: String,

        /// Structured log file to append to.
        #[arg(long)]
        log: PathBuf,

        /// Launch command, passed to the shell.
        #[arg(trailing_var_arg = true, required = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}
