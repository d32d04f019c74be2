//! Versioned schema migrations.
//!
//! Migrations are read from a directory of `<version>_<name>.up.<ext>` and
//! `<version>_<name>.down.<ext>` files. The version currently applied is kept in a
//! single-row history table `schema_migrations(version, dirty)`. A step is marked
//! dirty before it runs and clean once it succeeded, so an interrupted run leaves a
//! dirty row behind and every later run refuses to proceed until it is fixed by hand.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use uptime_retry::{retry, Budget, RetryError};

use crate::DatabaseError;

/// Name of the migration history table
pub const HISTORY_TABLE: &str = "schema_migrations";

/// Statements and queries needed to apply migrations.
#[async_trait]
pub trait SchemaSession: Send + Sync {
    /// Runs a single statement, discarding any rows it returns.
    async fn execute(&self, statement: &str) -> Result<(), DatabaseError>;

    /// All `(version, dirty)` rows of the given history table.
    async fn migration_history(&self, table: &str) -> Result<Vec<(i64, bool)>, DatabaseError>;
}

/// Statement flavour of the target store.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Dialect {
    Cql,
    Postgres,
}

impl Dialect {
    /// File extension of the scripts written in this dialect
    pub fn extension(&self) -> &'static str {
        match self {
            Dialect::Cql => "cql",
            Dialect::Postgres => "sql",
        }
    }

    fn create_history_table(&self, table: &str) -> String {
        match self {
            Dialect::Cql => {
                format!("CREATE TABLE IF NOT EXISTS {table} (version bigint PRIMARY KEY, dirty boolean)")
            }
            Dialect::Postgres => format!(
                "CREATE TABLE IF NOT EXISTS {table} (version bigint PRIMARY KEY, dirty boolean NOT NULL)"
            ),
        }
    }

    fn upsert_version(&self, table: &str, version: i64, dirty: bool) -> String {
        match self {
            // CQL inserts are upserts
            Dialect::Cql => format!("INSERT INTO {table} (version, dirty) VALUES ({version}, {dirty})"),
            Dialect::Postgres => format!(
                "INSERT INTO {table} (version, dirty) VALUES ({version}, {dirty}) \
                 ON CONFLICT (version) DO UPDATE SET dirty = EXCLUDED.dirty"
            ),
        }
    }

    fn delete_version(&self, table: &str, version: i64) -> String {
        format!("DELETE FROM {table} WHERE version = {version}")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("Failed to read migrations from {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid migration file name: {0}")]
    InvalidFileName(String),

    #[error("Migration {version} is missing its {direction} script")]
    MissingScript {
        version: i64,
        direction: &'static str,
    },

    #[error("Duplicate {direction} script for migration {version}")]
    Duplicate {
        version: i64,
        direction: &'static str,
    },

    #[error("Schema is dirty at version {0}, a previous migration did not complete")]
    Dirty(i64),

    #[error("Migration {version} failed: {source}")]
    Step {
        version: i64,
        source: RetryError<DatabaseError>,
    },

    #[error("Failed to access migration history: {0}")]
    History(RetryError<DatabaseError>),
}

/// One schema change and its inverse.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Migration {
    pub version: i64,
    pub name: String,
    pub up: String,
    pub down: String,
}

impl Migration {
    /// Loads every migration in `dir` written in the given dialect, by ascending version.
    pub fn load_dir(dir: impl AsRef<Path>, dialect: Dialect) -> Result<Vec<Self>, MigrationError> {
        let dir = dir.as_ref();
        let io_error = |source| MigrationError::Io {
            path: dir.to_path_buf(),
            source,
        };

        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(io_error)? {
            let path = entry.map_err(io_error)?.path();
            if !path.is_file() {
                continue;
            }

            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            let Some(stem) = file_name.strip_suffix(&format!(".{}", dialect.extension())) else {
                continue;
            };

            let contents = std::fs::read_to_string(&path).map_err(|source| MigrationError::Io {
                path: path.clone(),
                source,
            })?;

            files.push((stem.to_string(), contents));
        }

        Self::from_scripts(files)
    }

    /// Builds migrations from `(file stem, contents)` pairs such as `("1_create_submissions.up", "...")`.
    pub fn from_scripts(
        scripts: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Vec<Self>, MigrationError> {
        let mut by_version: BTreeMap<i64, (String, Option<String>, Option<String>)> =
            BTreeMap::new();

        for (stem, contents) in scripts {
            let (base, direction) = if let Some(base) = stem.strip_suffix(".up") {
                (base, "up")
            } else if let Some(base) = stem.strip_suffix(".down") {
                (base, "down")
            } else {
                return Err(MigrationError::InvalidFileName(stem));
            };

            let Some((version, name)) = base.split_once('_') else {
                return Err(MigrationError::InvalidFileName(stem));
            };

            let version = version
                .parse::<i64>()
                .map_err(|_| MigrationError::InvalidFileName(stem.clone()))?;

            let entry = by_version
                .entry(version)
                .or_insert_with(|| (name.to_string(), None, None));

            let slot = if direction == "up" {
                &mut entry.1
            } else {
                &mut entry.2
            };

            if slot.replace(contents).is_some() {
                return Err(MigrationError::Duplicate { version, direction });
            }
        }

        by_version
            .into_iter()
            .map(|(version, (name, up, down))| {
                Ok(Migration {
                    version,
                    name,
                    up: up.ok_or(MigrationError::MissingScript {
                        version,
                        direction: "up",
                    })?,
                    down: down.ok_or(MigrationError::MissingScript {
                        version,
                        direction: "down",
                    })?,
                })
            })
            .collect()
    }
}

/// Splits a script into its statements, dropping `--` comment lines and empty statements.
pub fn split_statements(script: &str) -> Vec<String> {
    let without_comments = script
        .lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n");

    without_comments
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Applies or reverts migrations against a store.
pub struct Migrator<'a, S: ?Sized> {
    session: &'a S,
    dialect: Dialect,
    history_table: String,
    migrations: Vec<Migration>,
}

impl<'a, S> Migrator<'a, S>
where
    S: SchemaSession + ?Sized,
{
    /// `namespace` qualifies the history table, e.g. with a keyspace.
    pub fn new(
        session: &'a S,
        dialect: Dialect,
        namespace: Option<&str>,
        mut migrations: Vec<Migration>,
    ) -> Self {
        migrations.sort_by_key(|m| m.version);

        let history_table = match namespace {
            Some(ns) => format!("{ns}.{HISTORY_TABLE}"),
            None => HISTORY_TABLE.to_string(),
        };

        Self {
            session,
            dialect,
            history_table,
            migrations,
        }
    }

    /// Applies all pending migrations in ascending order, returning the versions applied.
    ///
    /// Nothing pending is not an error.
    pub async fn up(&self) -> Result<Vec<i64>, MigrationError> {
        self.create_history_table().await?;

        let current = self.current_version().await?;
        let pending = self
            .migrations
            .iter()
            .filter(|m| current.is_none_or(|c| m.version > c))
            .collect::<Vec<_>>();

        if pending.is_empty() {
            info!(version = ?current, "No pending migrations");
            return Ok(Vec::new());
        }

        let mut previous = current;
        let mut applied = Vec::with_capacity(pending.len());

        for migration in pending {
            info!(version = migration.version, name = %migration.name, "Applying migration");

            self.set_version(previous, Some(migration.version), true)
                .await?;
            self.run_script(migration.version, &migration.up).await?;
            self.set_version(Some(migration.version), Some(migration.version), false)
                .await?;

            previous = Some(migration.version);
            applied.push(migration.version);
        }

        Ok(applied)
    }

    /// Reverts all applied migrations in descending order, returning the versions reverted.
    pub async fn down(&self) -> Result<Vec<i64>, MigrationError> {
        self.create_history_table().await?;

        let Some(current) = self.current_version().await? else {
            info!("No migrations to revert");
            return Ok(Vec::new());
        };

        let applied = self
            .migrations
            .iter()
            .rev()
            .filter(|m| m.version <= current)
            .collect::<Vec<_>>();

        let mut reverted = Vec::with_capacity(applied.len());
        let mut at = Some(current);

        for (i, migration) in applied.iter().enumerate() {
            info!(version = migration.version, name = %migration.name, "Reverting migration");

            let below = applied.get(i + 1).map(|m| m.version);

            self.set_version(at, Some(migration.version), true).await?;
            self.run_script(migration.version, &migration.down).await?;
            self.set_version(Some(migration.version), below, false)
                .await?;

            at = below;
            reverted.push(migration.version);
        }

        Ok(reverted)
    }

    /// The version currently applied, if any.
    pub async fn current_version(&self) -> Result<Option<i64>, MigrationError> {
        let rows = retry(Budget::STORAGE, || {
            self.session.migration_history(&self.history_table)
        })
        .await
        .map_err(MigrationError::History)?;

        let Some((version, dirty)) = rows.into_iter().max_by_key(|(version, _)| *version) else {
            return Ok(None);
        };

        if dirty {
            return Err(MigrationError::Dirty(version));
        }

        Ok(Some(version))
    }

    async fn create_history_table(&self) -> Result<(), MigrationError> {
        let statement = self.dialect.create_history_table(&self.history_table);

        retry(Budget::HISTORY_TABLE, || self.session.execute(&statement))
            .await
            .map_err(MigrationError::History)
    }

    /// Replaces the history row for `from` with one for `to`.
    async fn set_version(
        &self,
        from: Option<i64>,
        to: Option<i64>,
        dirty: bool,
    ) -> Result<(), MigrationError> {
        let mut statements = Vec::with_capacity(2);

        if let Some(from) = from.filter(|from| Some(*from) != to) {
            statements.push(self.dialect.delete_version(&self.history_table, from));
        }

        if let Some(to) = to {
            statements.push(self.dialect.upsert_version(&self.history_table, to, dirty));
        }

        for statement in &statements {
            retry(Budget::STORAGE, || self.session.execute(statement))
                .await
                .map_err(MigrationError::History)?;
        }

        Ok(())
    }

    async fn run_script(&self, version: i64, script: &str) -> Result<(), MigrationError> {
        for statement in split_statements(script) {
            debug!(version, %statement, "Executing migration statement");

            retry(Budget::MIGRATION, || self.session.execute(&statement))
                .await
                .map_err(|source| MigrationError::Step { version, source })?;
        }

        Ok(())
    }
}
