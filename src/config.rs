//! # Broker Configuration
//!
//! Plain structs with `Default` impls. Every field can be overridden from the
//! environment through [`BrokerConfig::from_env`]:
//!
//! | Variable | Field | Default |
//! |----------|-------|---------|
//! | `LIGHTMQ_DATA_DIR` | `data_dir` | `./lightmq-data` |
//! | `LIGHTMQ_GATE_CAPACITY` | `gate_capacity` | 16 |
//! | `LIGHTMQ_CATCHUP_BATCH_SIZE` | `catchup_batch_size` | 1000 |
//! | `LIGHTMQ_LOG_LEVEL` | `log.level` | `info` |
//! | `LIGHTMQ_LOG_FORMAT` | `log.format` | `pretty` |

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Error, Result};

// =============================================================================
// Defaults
// =============================================================================

/// Default number of live messages buffered per subscriber group.
///
/// When a group's buffer is full, publishing to its topic blocks until the
/// subscriber drains it.
pub const DEFAULT_GATE_CAPACITY: usize = 16;

/// Default number of records fetched per catch-up read.
pub const DEFAULT_CATCHUP_BATCH_SIZE: usize = 1000;

/// Default data directory, relative to the working directory.
pub const DEFAULT_DATA_DIR: &str = "lightmq-data";

/// File name of the SQLite database inside the data directory.
pub const DATABASE_FILE: &str = "lightmq.db";

const ENV_DATA_DIR: &str = "LIGHTMQ_DATA_DIR";
const ENV_GATE_CAPACITY: &str = "LIGHTMQ_GATE_CAPACITY";
const ENV_CATCHUP_BATCH_SIZE: &str = "LIGHTMQ_CATCHUP_BATCH_SIZE";
const ENV_LOG_LEVEL: &str = "LIGHTMQ_LOG_LEVEL";
const ENV_LOG_FORMAT: &str = "LIGHTMQ_LOG_FORMAT";

// =============================================================================
// Logging Configuration
// =============================================================================

/// Output format of the log layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(Error::Config(format!("unknown log format '{other}'"))),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Pretty => f.write_str("pretty"),
            LogFormat::Json => f.write_str("json"),
        }
    }
}

/// Logging configuration consumed by [`crate::telemetry::init_logging`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is not set (e.g. `info`,
    /// `lightmq=debug`).
    pub level: String,

    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

// =============================================================================
// Broker Configuration
// =============================================================================

/// Configuration for a [`Broker`](crate::Broker).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Directory holding the SQLite database. Created on open.
    pub data_dir: PathBuf,

    /// Capacity of each group's live channel.
    pub gate_capacity: usize,

    /// Records fetched per catch-up read.
    pub catchup_batch_size: usize,

    pub log: LogConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            gate_capacity: DEFAULT_GATE_CAPACITY,
            catchup_batch_size: DEFAULT_CATCHUP_BATCH_SIZE,
            log: LogConfig::default(),
        }
    }
}

impl BrokerConfig {
    /// Creates a default configuration rooted at `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Builds a configuration from `LIGHTMQ_*` environment variables, falling
    /// back to defaults for unset ones.
    ///
    /// # Errors
    ///
    /// `Error::Config` if a variable is set but unparsable, or if the result
    /// fails [`validate`](Self::validate).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(dir) = lookup(ENV_DATA_DIR) {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(raw) = lookup(ENV_GATE_CAPACITY) {
            config.gate_capacity = parse_usize(ENV_GATE_CAPACITY, &raw)?;
        }
        if let Some(raw) = lookup(ENV_CATCHUP_BATCH_SIZE) {
            config.catchup_batch_size = parse_usize(ENV_CATCHUP_BATCH_SIZE, &raw)?;
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            config.log.level = level;
        }
        if let Some(raw) = lookup(ENV_LOG_FORMAT) {
            config.log.format = raw.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Rejects values the broker cannot run with.
    pub fn validate(&self) -> Result<()> {
        // tokio's bounded mpsc panics on a zero capacity
        if self.gate_capacity == 0 {
            return Err(Error::Config("gate capacity must be positive".to_string()));
        }
        if self.catchup_batch_size == 0 {
            return Err(Error::Config(
                "catch-up batch size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Path of the SQLite database file.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }

    /// Creates the data directory if it does not exist yet.
    pub fn ensure_data_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}

fn parse_usize(key: &str, raw: &str) -> Result<usize> {
    raw.trim()
        .parse()
        .map_err(|e| Error::Config(format!("invalid {key}='{raw}': {e}")))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = BrokerConfig::default();
        assert_eq!(config.gate_capacity, 16);
        assert_eq!(config.catchup_batch_size, 1000);
        assert_eq!(config.log.level, "info");
        assert_eq!(config.log.format, LogFormat::Pretty);
        assert!(config.database_path().ends_with("lightmq.db"));
        config.validate().unwrap();
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = BrokerConfig::from_lookup(lookup_from(&[
            ("LIGHTMQ_DATA_DIR", "/var/lib/lmq"),
            ("LIGHTMQ_GATE_CAPACITY", "64"),
            ("LIGHTMQ_CATCHUP_BATCH_SIZE", " 250 "),
            ("LIGHTMQ_LOG_LEVEL", "lightmq=debug"),
            ("LIGHTMQ_LOG_FORMAT", "JSON"),
        ]))
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/var/lib/lmq"));
        assert_eq!(config.gate_capacity, 64);
        assert_eq!(config.catchup_batch_size, 250);
        assert_eq!(config.log.level, "lightmq=debug");
        assert_eq!(config.log.format, LogFormat::Json);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = BrokerConfig::from_lookup(lookup_from(&[("LIGHTMQ_GATE_CAPACITY", "lots")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = BrokerConfig::from_lookup(lookup_from(&[("LIGHTMQ_GATE_CAPACITY", "0")]))
            .unwrap_err();
        assert_eq!(err.to_string(), "config error: gate capacity must be positive");

        let err = BrokerConfig::from_lookup(lookup_from(&[("LIGHTMQ_LOG_FORMAT", "xml")]))
            .unwrap_err();
        assert!(err.to_string().contains("unknown log format"));
    }

    #[test]
    fn test_ensure_data_dir() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let config = BrokerConfig::with_data_dir(dir.path().join("nested").join("data"));
        config.ensure_data_dir().unwrap();
        assert!(config.data_dir.is_dir());
        // idempotent
        config.ensure_data_dir().unwrap();
    }
}
