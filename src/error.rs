//! Error types for report output, configuration and thread creation
//!
//! Protocol violations are not errors; see [`crate::diagnostics::Violation`].

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading a [`crate::config::ProfilerConfig`]
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Errors surfaced by the profiler's fallible operations
#[derive(Error, Debug)]
pub enum ProfilerError {
    #[error("Failed to write lock report {path}: {source}")]
    Report {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize lock report: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to spawn thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T, E = ProfilerError> = std::result::Result<T, E>;
