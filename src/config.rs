//! Profiler configuration, loadable from TOML
//!
//! ```toml
//! [report]
//! path = "lockreport.txt"
//! format = "text"
//! format_header = true
//!
//! [tables]
//! buckets = 256
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Report file encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    /// Plain text lock report (default)
    #[default]
    Text,
    /// JSON document for machine parsing
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Where `shutdown` writes the report
    pub path: PathBuf,
    pub format: ReportFormat,
    /// Emit the `Format: ...` legend line at the top of text reports
    pub format_header: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("lockreport.txt"),
            format: ReportFormat::Text,
            format_header: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    /// Hash buckets for the All, ByMutex and ByPosition views. ByUnique
    /// always uses a single bucket.
    pub buckets: usize,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self { buckets: 256 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViolationConfig {
    /// Most recent violations kept for inspection. Every violation is
    /// still logged and counted.
    pub history: usize,
}

impl Default for ViolationConfig {
    fn default() -> Self {
        Self { history: 256 }
    }
}

/// Top-level configuration
///
/// # Example
/// ```
/// use lockprof::config::ProfilerConfig;
///
/// let config = ProfilerConfig::from_toml_str("[tables]\nbuckets = 64\n").unwrap();
/// assert_eq!(config.tables.buckets, 64);
/// assert_eq!(config.report.path.to_str(), Some("lockreport.txt"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilerConfig {
    pub report: ReportConfig,
    pub tables: TableConfig,
    pub violations: ViolationConfig,
}

impl ProfilerConfig {
    pub fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|source| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ProfilerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tables.buckets == 0 {
            return Err(ConfigError::Invalid(
                "tables.buckets must be >= 1, got 0".to_string(),
            ));
        }

        if self.report.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "report.path must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = ProfilerConfig::default();
        assert_eq!(config.tables.buckets, 256);
        assert_eq!(config.violations.history, 256);
        assert_eq!(config.report.format, ReportFormat::Text);
        assert!(config.report.format_header);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ProfilerConfig::from_toml_str(
            r#"
            [report]
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.report.format, ReportFormat::Json);
        assert_eq!(config.report.path, PathBuf::from("lockreport.txt"));
        assert_eq!(config.tables.buckets, 256);
    }

    #[test]
    fn test_violation_history_from_toml() {
        let config = ProfilerConfig::from_toml_str("[violations]\nhistory = 4\n").unwrap();
        assert_eq!(config.violations.history, 4);
        assert_eq!(config.tables.buckets, 256);
    }

    #[test]
    fn test_zero_buckets_rejected() {
        let err = ProfilerConfig::from_toml_str("[tables]\nbuckets = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_bad_toml_rejected() {
        let err = ProfilerConfig::from_toml_str("[tables\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[report]\npath = \"out.txt\"\nformat_header = false").unwrap();
        let config = ProfilerConfig::from_toml(file.path()).unwrap();
        assert_eq!(config.report.path, PathBuf::from("out.txt"));
        assert!(!config.report.format_header);
    }

    #[test]
    fn test_missing_file() {
        let err = ProfilerConfig::from_toml("/nonexistent/lockprof.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
