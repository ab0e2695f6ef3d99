// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `flowdag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "flowdag",
    version,
    about = "Run a manifest of dependent shell tasks in parallel phases.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the manifest (TOML).
    #[arg(long, value_name = "PATH", default_value = "Flowdag.toml")]
    pub config: String,

    /// Parse + validate, print the execution plan, but don't run anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Run ungrouped tasks first, then each `group` as its own batch.
    #[arg(long)]
    pub by_group: bool,

    /// Stop after the first phase that contains a failure.
    #[arg(long)]
    pub fail_fast: bool,

    /// Override `[config].max_concurrency`.
    #[arg(long, value_name = "N")]
    pub max_concurrency: Option<usize>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `FLOWDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,
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
