// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Command-line arguments for `ffapipe`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "ffapipe",
    version,
    about = "Run and monitor a checkpointed FFA search pipeline over many observations.",
    long_about = None
)]
pub struct CliArgs {
    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `FFAPIPE_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Process every (observation, search) unit through the stage chain.
    Run(RunArgs),
    /// Watch the progress of a run root. Never modifies anything.
    Monitor(MonitorArgs),
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Path to the pipeline config file (TOML).
    #[arg(long, value_name = "PATH", default_value = "ffapipe.toml")]
    pub config: PathBuf,

    /// Observation files to process, in addition to `[sources]` globs.
    #[arg(value_name = "SOURCES")]
    pub sources: Vec<PathBuf>,

    /// File listing observation paths, one per line (`#` starts a comment).
    #[arg(long, value_name = "FILE")]
    pub source_list: Option<PathBuf>,

    /// Resume the run recorded in the output root instead of starting fresh.
    #[arg(long)]
    pub resume: bool,

    /// Number of units processed concurrently (overrides `[pipeline].workers`).
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Only process units statically assigned to this node.
    #[arg(long, value_name = "ID")]
    pub node: Option<String>,

    /// Resolve config + units, print them, but don't execute any tools.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Args)]
pub struct MonitorArgs {
    /// Output root of the run to observe.
    #[arg(value_name = "RUN_ROOT")]
    pub run_root: PathBuf,

    /// Seconds between refreshes.
    #[arg(long, value_name = "SECONDS", default_value_t = 5)]
    pub interval: u64,

    /// Print a single snapshot and exit.
    #[arg(long)]
    pub once: bool,
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
