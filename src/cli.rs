//! CLI argument parsing for lockprof

use crate::config::ReportFormat;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "lockprof")]
#[command(version)]
#[command(about = "Lock profiler and synchronization diagnostics", long_about = None)]
pub struct Cli {
    /// TOML configuration file
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Where to write the lock report (overrides the config file)
    #[arg(short = 'o', long = "report", value_name = "PATH")]
    pub report: Option<PathBuf>,

    /// Report format (overrides the config file)
    #[arg(long = "format", value_enum)]
    pub format: Option<ReportFormat>,

    /// Enable debug tracing output to stderr
    #[arg(long = "debug")]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Built-in workloads
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Worker threads contending for one shared mutex
    Contention {
        #[arg(short = 't', long = "threads", default_value = "4")]
        threads: usize,

        #[arg(short = 'n', long = "iterations", default_value = "1000")]
        iterations: usize,

        /// Milliseconds to sleep while holding the shared mutex
        #[arg(long = "hold-ms", default_value = "0")]
        hold_ms: u64,
    },
    /// Lock the same mutex twice from one thread
    SelfRelock,
    /// Unlock a mutex that was never locked
    UnheldUnlock,
    /// Producer/consumer hand-off over a condition variable
    CondWait {
        #[arg(short = 'r', long = "rounds", default_value = "100")]
        rounds: u64,
    },
    /// Pass a null handle (aborts the process)
    NullHandle,
}
