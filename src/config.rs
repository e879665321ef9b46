//! Configuration parsing and validation.
//!
//! Singularity is configured via a TOML file (default `config/sng.toml`).
//! Only `[db]` is required; every other section has defaults.
//!
//! ```toml
//! [db]
//! path = "./data/singularity.sqlite"
//!
//! [schema]
//! expected_version = 3
//! poll_interval_ms = 2000
//! max_retries = 7
//!
//! [ingest]
//! unresponsive_threshold_hours = 2
//! compression_level = 3
//!
//! [server]
//! bind = "127.0.0.1:7341"
//!
//! [logging]
//! level = "info"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::schema;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub schema: SchemaConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Schema coordination settings.
#[derive(Debug, Deserialize, Clone)]
pub struct SchemaConfig {
    #[serde(default = "default_expected_version")]
    pub expected_version: i64,
    /// Delay between re-reads while another instance holds the lock.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Re-reads before giving up with `SchemaNotReady`.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            expected_version: default_expected_version(),
            poll_interval_ms: default_poll_interval_ms(),
            max_retries: default_max_retries(),
        }
    }
}

impl SchemaConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_expected_version() -> i64 {
    schema::LATEST_VERSION
}
fn default_poll_interval_ms() -> u64 {
    2000
}
fn default_max_retries() -> u32 {
    7
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Nodes whose current report is older than this are unresponsive.
    #[serde(default = "default_unresponsive_threshold_hours")]
    pub unresponsive_threshold_hours: u32,
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            unresponsive_threshold_hours: default_unresponsive_threshold_hours(),
            compression_level: default_compression_level(),
        }
    }
}

fn default_unresponsive_threshold_hours() -> u32 {
    2
}
fn default_compression_level() -> i32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// A config with defaults for everything but the database path.
    pub fn minimal(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            schema: SchemaConfig::default(),
            ingest: IngestConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.schema.expected_version < 1 || config.schema.expected_version > schema::LATEST_VERSION
    {
        anyhow::bail!(
            "schema.expected_version must be in [1, {}]",
            schema::LATEST_VERSION
        );
    }

    if config.schema.poll_interval_ms == 0 {
        anyhow::bail!("schema.poll_interval_ms must be > 0");
    }

    if config.ingest.unresponsive_threshold_hours == 0 {
        anyhow::bail!("ingest.unresponsive_threshold_hours must be > 0");
    }

    if !(1..=22).contains(&config.ingest.compression_level) {
        anyhow::bail!("ingest.compression_level must be in [1, 22]");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_optional_sections() {
        let config: Config = toml::from_str("[db]\npath = \"/tmp/sng.sqlite\"\n").unwrap();
        assert_eq!(config.schema.expected_version, schema::LATEST_VERSION);
        assert_eq!(config.schema.max_retries, 7);
        assert_eq!(config.ingest.unresponsive_threshold_hours, 2);
        assert_eq!(config.server.bind, "127.0.0.1:7341");
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_rejects_unknown_schema_version() {
        let mut config = Config::minimal("/tmp/sng.sqlite");
        config.schema.expected_version = schema::LATEST_VERSION + 1;
        assert!(validate(&config).is_err());
        config.schema.expected_version = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_rejects_zero_threshold() {
        let mut config = Config::minimal("/tmp/sng.sqlite");
        config.ingest.unresponsive_threshold_hours = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_config(Path::new("/nonexistent/sng.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
