use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{load_config, require, ConfigError, LoggingConfig, MetricsConfig};

/// Maximum size of a raw block kept in wide-column storage, in bytes
pub const MAX_BLOCK_SIZE: usize = 1_000_000;

/// Ingestion service configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Name of the network, used as the key prefix in object storage
    pub network_name: String,

    /// Address the HTTP API listens on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub whitelist: WhitelistConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Raw blocks above this size are flagged when written to object storage
    #[serde(default = "default_max_block_size")]
    pub max_block_size: usize,

    /// The one storage backend of this deployment
    pub storage: StorageConfig,
}

impl AppConfig {
    /// Loads and validates the configuration at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: Self = load_config(path, None)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require("network_name", &self.network_name)?;

        if self.max_block_size == 0 {
            return Err(ConfigError::invalid("max_block_size", "must be positive"));
        }

        self.whitelist.validate()?;
        self.rate_limit.validate()?;
        self.storage.validate()
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_max_block_size() -> usize {
    MAX_BLOCK_SIZE
}

/// Where authorized submitter keys are read from
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhitelistConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Delimited table with a header row
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Header of the column holding the submitter keys
    #[serde(default = "default_whitelist_column")]
    pub column: String,

    #[serde(default = "default_refresh_interval", with = "humantime_serde")]
    pub refresh_interval: Duration,
}

impl Default for WhitelistConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: None,
            column: default_whitelist_column(),
            refresh_interval: default_refresh_interval(),
        }
    }
}

impl WhitelistConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }

        if self.path.is_none() {
            return Err(ConfigError::Missing("whitelist.path"));
        }

        require("whitelist.column", &self.column)?;

        if self.refresh_interval.is_zero() {
            return Err(ConfigError::invalid(
                "whitelist.refresh_interval",
                "must be positive",
            ));
        }

        Ok(())
    }
}

fn default_whitelist_column() -> String {
    "public_key".to_string()
}

fn default_refresh_interval() -> Duration {
    Duration::from_secs(10 * 60)
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Accepted submissions per submitter within a rolling hour
    #[serde(default = "default_requests_per_pk_hourly")]
    pub requests_per_pk_hourly: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_pk_hourly: default_requests_per_pk_hourly(),
        }
    }
}

impl RateLimitConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.requests_per_pk_hourly == 0 {
            return Err(ConfigError::invalid(
                "rate_limit.requests_per_pk_hourly",
                "must be positive",
            ));
        }
        Ok(())
    }
}

fn default_requests_per_pk_hourly() -> usize {
    120
}

/// Storage backend, selected by the `backend` key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageConfig {
    ObjectStore(ObjectStoreConfig),
    Keyspaces(KeyspacesConfig),
    Postgres(PostgresConfig),
    Filesystem(FilesystemConfig),
}

impl StorageConfig {
    pub fn name(&self) -> &'static str {
        match self {
            StorageConfig::ObjectStore(_) => "object_store",
            StorageConfig::Keyspaces(_) => "keyspaces",
            StorageConfig::Postgres(_) => "postgres",
            StorageConfig::Filesystem(_) => "filesystem",
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            StorageConfig::ObjectStore(c) => c.validate(),
            StorageConfig::Keyspaces(c) => c.validate(),
            StorageConfig::Postgres(c) => c.validate(),
            StorageConfig::Filesystem(c) => {
                if c.path.as_os_str().is_empty() {
                    return Err(ConfigError::Missing("storage.path"));
                }
                Ok(())
            }
        }
    }
}

/// S3-compatible object storage
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    pub region: String,
    pub account_id: String,
    pub bucket_name_suffix: String,

    /// Static credentials, the ambient AWS credentials are used when absent
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,

    /// Custom endpoint for S3-compatible stores
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl ObjectStoreConfig {
    /// `<account_id>-<bucket_name_suffix>`
    pub fn bucket_name(&self) -> String {
        format!("{}-{}", self.account_id, self.bucket_name_suffix)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        require("storage.region", &self.region)?;
        require("storage.account_id", &self.account_id)?;
        require("storage.bucket_name_suffix", &self.bucket_name_suffix)?;

        if self.access_key_id.is_some() != self.secret_access_key.is_some() {
            return Err(ConfigError::invalid(
                "storage.access_key_id",
                "access key id and secret access key must be set together",
            ));
        }

        Ok(())
    }
}

/// Cassandra-compatible wide-column store
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyspacesConfig {
    pub region: String,
    pub keyspace: String,

    /// `host:port` of the contact point, defaults to the regional Keyspaces endpoint
    #[serde(default)]
    pub endpoint: Option<String>,

    /// CA certificate the server certificate is verified against.
    ///
    /// Setting it enables TLS. The regional endpoint always uses TLS, falling back
    /// to the system trust store without a certificate.
    #[serde(default)]
    pub ssl_certificate_path: Option<PathBuf>,

    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,

    /// Write raw blocks to a separate `blocks` table instead of the submission row
    #[serde(default)]
    pub store_blocks_separately: bool,
}

impl KeyspacesConfig {
    pub fn contact_point(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| format!("cassandra.{}.amazonaws.com:9142", self.region))
    }

    /// Whether the session is encrypted.
    pub fn uses_tls(&self) -> bool {
        self.endpoint.is_none() || self.ssl_certificate_path.is_some()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        require("storage.keyspace", &self.keyspace)?;

        if self.endpoint.is_none() {
            require("storage.region", &self.region)?;
        }

        if self.username.is_some() != self.password.is_some() {
            return Err(ConfigError::invalid(
                "storage.username",
                "username and password must be set together",
            ));
        }

        Ok(())
    }
}

/// Relational store
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,

    #[serde(default = "default_postgres_port")]
    pub port: u16,

    pub user: String,

    #[serde(default)]
    pub password: String,

    pub database: String,

    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl PostgresConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        require("storage.host", &self.host)?;
        require("storage.user", &self.user)?;
        require("storage.database", &self.database)?;

        if self.max_connections == 0 {
            return Err(ConfigError::invalid(
                "storage.max_connections",
                "must be positive",
            ));
        }

        Ok(())
    }
}

fn default_postgres_port() -> u16 {
    5432
}

fn default_ssl_mode() -> String {
    "disable".to_string()
}

fn default_max_connections() -> u32 {
    10
}

/// Local directory
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesystemConfig {
    pub path: PathBuf,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn filesystem_config() -> AppConfig {
        toml::from_str(
            r#"
            network_name = "testnet"

            [storage]
            backend = "filesystem"
            path = "/var/lib/uptime"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn defaults() {
        let config = filesystem_config();

        assert_eq!(config.listen_addr, default_listen_addr());
        assert_eq!(config.max_block_size, 1_000_000);
        assert_eq!(config.rate_limit.requests_per_pk_hourly, 120);
        assert_eq!(
            config.whitelist.refresh_interval,
            Duration::from_secs(600)
        );
        assert!(!config.whitelist.enabled);
        assert_eq!(
            config.storage,
            StorageConfig::Filesystem(FilesystemConfig {
                path: PathBuf::from("/var/lib/uptime")
            })
        );
        config.validate().unwrap();
    }

    #[test]
    fn storage_is_one_tagged_backend() {
        let config: AppConfig = toml::from_str(
            r#"
            network_name = "mainnet"

            [storage]
            backend = "object_store"
            region = "us-west-2"
            account_id = "123456"
            bucket_name_suffix = "block-producers-uptime"
            "#,
        )
        .unwrap();

        let StorageConfig::ObjectStore(s3) = &config.storage else {
            panic!("expected object store, got {:?}", config.storage);
        };
        assert_eq!(s3.bucket_name(), "123456-block-producers-uptime");
        assert_eq!(config.storage.name(), "object_store");
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let result = toml::from_str::<AppConfig>(
            r#"
            network_name = "testnet"

            [storage]
            backend = "floppy"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn empty_network_name() {
        let mut config = filesystem_config();
        config.network_name = " ".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing("network_name"))
        ));
    }

    #[test]
    fn zero_rate_limit() {
        let mut config = filesystem_config();
        config.rate_limit.requests_per_pk_hourly = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field, .. }) if field == "rate_limit.requests_per_pk_hourly"
        ));
    }

    #[test]
    fn enabled_whitelist_needs_a_path() {
        let mut config = filesystem_config();
        config.whitelist.enabled = true;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing("whitelist.path"))
        ));

        config.whitelist.path = Some(PathBuf::from("whitelist.csv"));
        config.whitelist.refresh_interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn keyspaces_contact_point() {
        let keyspaces = KeyspacesConfig {
            region: "us-west-2".to_string(),
            keyspace: "bpu".to_string(),
            endpoint: None,
            ssl_certificate_path: None,
            username: None,
            password: None,
            store_blocks_separately: false,
        };
        assert_eq!(
            keyspaces.contact_point(),
            "cassandra.us-west-2.amazonaws.com:9142"
        );
        assert!(keyspaces.uses_tls());
    }

    #[test]
    fn keyspaces_tls() {
        let local: KeyspacesConfig = toml::from_str(
            r#"
            region = ""
            keyspace = "bpu"
            endpoint = "127.0.0.1:9042"
            "#,
        )
        .unwrap();
        assert!(!local.uses_tls());
        assert!(local.validate().is_ok());

        let pinned = KeyspacesConfig {
            ssl_certificate_path: Some(PathBuf::from("/etc/uptime/sf-class2-root.crt")),
            ..local
        };
        assert!(pinned.uses_tls());
    }

    #[test]
    fn postgres_defaults() {
        let postgres: PostgresConfig = toml::from_str(
            r#"
            host = "db"
            user = "uptime"
            password = "secret"
            database = "bpu"
            "#,
        )
        .unwrap();

        assert_eq!(postgres.port, 5432);
        assert_eq!(postgres.ssl_mode, "disable");
        assert_eq!(postgres.max_connections, 10);
    }
}
