use anyhow::{Context, Result};
use clap::Parser;
use lockprof::cli::{Cli, Command};
use lockprof::config::ProfilerConfig;
use lockprof::{scenarios, Diagnostics};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber; violations are warnings, so they always show
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Load the config file (if any) and apply command-line overrides
fn load_config(cli: &Cli) -> Result<ProfilerConfig> {
    let mut config = match &cli.config {
        Some(path) => ProfilerConfig::from_toml(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ProfilerConfig::default(),
    };

    if let Some(report) = &cli.report {
        config.report.path = report.clone();
    }
    if let Some(format) = cli.format {
        config.report.format = format;
    }

    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let config = load_config(&cli)?;
    let diag = Arc::new(Diagnostics::with_config(config));

    match cli.command {
        Command::Contention {
            threads,
            iterations,
            hold_ms,
        } => scenarios::contention(&diag, threads, iterations, hold_ms)?,
        Command::SelfRelock => scenarios::self_relock(&diag)?,
        Command::UnheldUnlock => scenarios::unheld_unlock(&diag)?,
        Command::CondWait { rounds } => scenarios::cond_ping_pong(&diag, rounds)?,
        Command::NullHandle => scenarios::null_handle(&diag)?,
    }

    let snapshot = diag.shutdown().context("Failed to write lock report")?;
    println!(
        "Wrote {} ({} threads, {} locks, {} violations)",
        diag.config().report.path.display(),
        snapshot.threads.len(),
        snapshot.totals.lock_count,
        snapshot.violations
    );

    Ok(())
}
