use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{load_config, require, ConfigError, LoggingConfig};

/// Uptime analyzer configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    pub network_name: String,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Where the submissions are read from
    pub source: SourceConfig,

    /// Observation window, any part of it may be left out
    #[serde(default)]
    pub period: PeriodInput,

    /// Group submissions by public key only, ignoring the source address
    #[serde(default)]
    pub ignore_ips: bool,

    /// Expected interval between two submissions of the same node, in minutes
    #[serde(default = "default_sync_period_minutes")]
    pub sync_period_minutes: u32,

    #[serde(default)]
    pub output: OutputConfig,
}

impl AnalyzerConfig {
    /// Loads and validates the configuration at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: Self = load_config(path, None)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require("network_name", &self.network_name)?;

        if self.sync_period_minutes == 0 || self.sync_period_minutes > 60 {
            return Err(ConfigError::invalid(
                "sync_period_minutes",
                format!("must be between 1 and 60, got {}", self.sync_period_minutes),
            ));
        }

        self.source.validate()?;
        self.period.validate()?;
        self.output.validate()
    }

    /// Region the report is uploaded to, if one is known.
    pub fn output_region(&self) -> Option<&str> {
        match (&self.output.s3_region, &self.source) {
            (Some(region), _) => Some(region.as_str()),
            (None, SourceConfig::S3 { region, .. }) => Some(region.as_str()),
            (None, SourceConfig::Local { .. }) => None,
        }
    }
}

fn default_sync_period_minutes() -> u32 {
    15
}

/// Storage the analyzer reads submissions from
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Bucket `<account_id>-<bucket_name_suffix>`, keys prefixed by the network name
    S3 {
        region: String,
        account_id: String,
        bucket_name_suffix: String,
        #[serde(default)]
        access_key_id: Option<String>,
        #[serde(default)]
        secret_access_key: Option<String>,
        #[serde(default)]
        endpoint: Option<String>,
    },

    /// Root directory written by the filesystem backend
    Local { path: PathBuf },
}

impl SourceConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        match self {
            SourceConfig::S3 {
                region,
                account_id,
                bucket_name_suffix,
                ..
            } => {
                require("source.region", region)?;
                require("source.account_id", account_id)?;
                require("source.bucket_name_suffix", bucket_name_suffix)
            }
            SourceConfig::Local { path } => {
                if path.as_os_str().is_empty() {
                    return Err(ConfigError::Missing("source.path"));
                }
                Ok(())
            }
        }
    }
}

/// Possibly partial observation window.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodInput {
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,

    #[serde(default)]
    pub end: Option<DateTime<Utc>>,

    /// Length of the window, in minutes
    #[serde(default)]
    pub interval_minutes: Option<i64>,
}

impl PeriodInput {
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(minutes) = self.interval_minutes {
            if minutes < 60 {
                return Err(ConfigError::invalid(
                    "period.interval_minutes",
                    format!("must be at least one hour, got {minutes} minutes"),
                ));
            }
        }

        if let (Some(start), Some(end)) = (self.start, self.end) {
            if end - start < chrono::Duration::hours(1) {
                return Err(ConfigError::invalid(
                    "period.end",
                    "must be at least one hour after period.start",
                ));
            }
        }

        Ok(())
    }
}

/// Where the report goes
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub stdout: bool,

    #[serde(default)]
    pub local: Option<PathBuf>,

    #[serde(default)]
    pub s3_bucket: Option<String>,

    /// Key prefix of the uploaded report
    #[serde(default)]
    pub s3_key: Option<String>,

    /// Region of the report bucket, defaults to the region of an S3 source
    #[serde(default)]
    pub s3_region: Option<String>,
}

impl OutputConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let bucket = self.s3_bucket.as_deref().filter(|b| !b.is_empty());
        let key = self.s3_key.as_deref().filter(|k| !k.is_empty());

        if bucket.is_some() != key.is_some() {
            return Err(ConfigError::HalfS3Output);
        }

        if !self.stdout && self.local.is_none() && key.is_none() {
            return Err(ConfigError::NoOutput);
        }

        Ok(())
    }

    /// Bucket and key prefix of the S3 upload, if any
    pub fn s3(&self) -> Option<(&str, &str)> {
        match (self.s3_bucket.as_deref(), self.s3_key.as_deref()) {
            (Some(bucket), Some(key)) if !bucket.is_empty() && !key.is_empty() => {
                Some((bucket, key))
            }
            _ => None,
        }
    }
}
