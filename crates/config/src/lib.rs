//! Configuration of the ingestion service and of the uptime analyzer.
//!
//! Both are read from a TOML file, with environment variables taking precedence.
//! An environment variable maps to a config key by stripping the `UPTIME__` prefix
//! and splitting the rest on `__`, e.g. `UPTIME__STORAGE__PATH` sets `storage.path`.
//!
//! Loaded configurations must be validated before use. Any validation error is fatal.

use core::fmt;
use std::net::SocketAddr;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

mod analyzer;
mod app;

pub use analyzer::{AnalyzerConfig, OutputConfig, PeriodInput, SourceConfig};
pub use app::{
    AppConfig, FilesystemConfig, KeyspacesConfig, ObjectStoreConfig, PostgresConfig,
    RateLimitConfig, StorageConfig, WhitelistConfig, MAX_BLOCK_SIZE,
};

/// Prefix of the environment variables overriding the config file
pub const ENV_PREFIX: &str = "UPTIME";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Missing required setting `{0}`")]
    Missing(&'static str),

    #[error("Invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Either both or neither of `output.s3_bucket` and `output.s3_key` must be set")]
    HalfS3Output,

    #[error("No output specified, set at least one of `output.stdout`, `output.local` or `output.s3_key`")]
    NoOutput,
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Loads a configuration from `path`, overridden by environment variables with the given prefix.
pub fn load_config<T>(path: impl AsRef<Path>, prefix: Option<&str>) -> Result<T, ConfigError>
where
    T: DeserializeOwned,
{
    ::config::Config::builder()
        .add_source(::config::File::from(path.as_ref()))
        .add_source(
            ::config::Environment::with_prefix(prefix.unwrap_or(ENV_PREFIX))
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()
        .map_err(Into::into)
}

/// Logging configuration options
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub log_level: LogLevel,

    #[serde(default)]
    pub log_format: LogFormat,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(level)
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plaintext,
    Json,
}

/// Metrics configuration options
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable the metrics server
    #[serde(default)]
    pub enabled: bool,

    /// Address at which to serve the metrics at
    #[serde(default = "default_metrics_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: default_metrics_listen_addr(),
        }
    }
}

fn default_metrics_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9000))
}

pub(crate) fn require(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        Err(ConfigError::Missing(field))
    } else {
        Ok(())
    }
}
