//! Storage backends for uptime submissions.
//!
//! Exactly one backend is active per deployment, picked from the configuration at
//! startup. Every backend accepts a whole [`ObjectsToSave`] batch and either stores
//! it or reports why it could not. Transient failures are retried within the
//! backend's own budget before being reported.

use std::path::PathBuf;

use tracing::info;

use uptime_config::StorageConfig;
use uptime_retry::RetryError;
use uptime_types::{CodecError, ObjectsToSave};

pub mod filesystem;
pub mod keyspaces;
pub mod migrate;
pub mod object;
pub mod postgres;

pub use filesystem::FilesystemBackend;
pub use keyspaces::{KeyspaceSession, KeyspacesBackend, ScyllaSession};
pub use migrate::{Dialect, Migration, MigrationError, Migrator, SchemaSession};
pub use object::ObjectStoreBackend;
pub use postgres::{PgSession, PostgresBackend, SqlSession};

/// Error message of a wide-column write rejected for exceeding the maximum row size
pub const ROW_TOO_LARGE: &str = "The update would cause the row to exceed the maximum allowed size";

/// Unique constraint on `(submitter, submitted_at_date)` in the relational store
pub const UNIQUE_SUBMISSION_CONSTRAINT: &str = "uq_submissions_submitter_date";

/// Error returned by a database driver.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct DatabaseError {
    message: String,
    constraint: Option<String>,
}

impl DatabaseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            constraint: None,
        }
    }

    /// An error raised by the violation of the given constraint.
    pub fn constraint_violation(message: impl Into<String>, constraint: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            constraint: Some(constraint.into()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn constraint(&self) -> Option<&str> {
        self.constraint.as_deref()
    }

    /// The write would push a wide-column row over the store's size limit.
    pub fn is_row_too_large(&self) -> bool {
        self.message.contains(ROW_TOO_LARGE)
    }

    /// The submitter already has a submission recorded for that date.
    pub fn is_duplicate_submission(&self) -> bool {
        self.constraint() == Some(UNIQUE_SUBMISSION_CONSTRAINT)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Refusing to write outside of the storage root: {0}")]
    InvalidPath(String),

    #[error("Failed to connect to {backend}: {message}")]
    Connect {
        backend: &'static str,
        message: String,
    },

    #[error("Object store write failed: {0}")]
    ObjectStore(#[from] RetryError<object_store::Error>),

    #[error("Database write failed: {0}")]
    Database(#[from] RetryError<DatabaseError>),

    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl StorageError {
    /// The batch itself is at fault, retrying it will not help.
    pub fn is_malformed(&self) -> bool {
        matches!(self, StorageError::Codec(_) | StorageError::InvalidPath(_))
    }
}

/// What a successful save did, for logs and metrics.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SaveReport {
    /// Number of artifacts or rows written
    pub written: usize,

    /// Raw blocks above the configured size, written anyway
    pub oversized_blocks: usize,

    /// The row was stored without its raw block because it was too large
    pub raw_block_dropped: bool,

    /// The submission was already recorded, nothing was written
    pub already_recorded: bool,
}

/// The storage backend of this deployment.
#[derive(Debug)]
pub enum Backend {
    ObjectStore(ObjectStoreBackend),
    Keyspaces(KeyspacesBackend),
    Postgres(PostgresBackend),
    Filesystem(FilesystemBackend),
}

impl Backend {
    /// Builds the backend described by the configuration.
    pub async fn connect(
        config: &StorageConfig,
        network_name: &str,
        max_block_size: usize,
    ) -> Result<Self, StorageError> {
        let backend = match config {
            StorageConfig::ObjectStore(c) => Self::ObjectStore(ObjectStoreBackend::connect(
                c,
                network_name,
                max_block_size,
            )?),
            StorageConfig::Keyspaces(c) => Self::Keyspaces(KeyspacesBackend::connect(c).await?),
            StorageConfig::Postgres(c) => Self::Postgres(PostgresBackend::connect(c).await?),
            StorageConfig::Filesystem(c) => Self::Filesystem(FilesystemBackend::new(&c.path)),
        };

        info!(backend = backend.name(), "Storage backend ready");
        Ok(backend)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Backend::ObjectStore(_) => "object_store",
            Backend::Keyspaces(_) => "keyspaces",
            Backend::Postgres(_) => "postgres",
            Backend::Filesystem(_) => "filesystem",
        }
    }

    pub async fn save(&self, objects: &ObjectsToSave) -> Result<SaveReport, StorageError> {
        match self {
            Backend::ObjectStore(b) => b.save(objects).await,
            Backend::Keyspaces(b) => b.save(objects).await,
            Backend::Postgres(b) => b.save(objects).await,
            Backend::Filesystem(b) => b.save(objects).await,
        }
    }
}
