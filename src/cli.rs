// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Command-line arguments for `tunedag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "tunedag",
    version,
    about = "Run fine-tuning pipelines described as a DAG of jobs.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the pipeline file (TOML).
    #[arg(long, value_name = "PATH", default_value = "Pipeline.toml")]
    pub config: PathBuf,

    /// Override `[config] parallelism`.
    #[arg(long, value_name = "N")]
    pub parallelism: Option<usize>,

    /// Resume from a checkpoint file instead of starting fresh.
    ///
    /// The pipeline file still supplies `[config]`; jobs come from the
    /// checkpoint.
    #[arg(long, value_name = "PATH")]
    pub resume: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `TUNEDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the plan, but don't run any job.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_overrides() {
        let args = CliArgs::parse_from(["tunedag"]);
        assert_eq!(args.config, PathBuf::from("Pipeline.toml"));
        assert!(args.parallelism.is_none() && args.resume.is_none() && !args.dry_run);

        let args = CliArgs::parse_from([
            "tunedag",
            "--config",
            "sweep.toml",
            "--parallelism",
            "8",
            "--resume",
            "cp.json",
            "--log-level",
            "debug",
        ]);
        assert_eq!(args.parallelism, Some(8));
        assert_eq!(args.resume, Some(PathBuf::from("cp.json")));
        assert!(matches!(args.log_level, Some(LogLevel::Debug)));
    }
}
