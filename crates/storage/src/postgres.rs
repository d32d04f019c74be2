use core::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use tracing::{debug, info};

use uptime_config::PostgresConfig;
use uptime_retry::{retry, Budget};
use uptime_types::{assemble_batch, ObjectsToSave, Submission};

use crate::migrate::SchemaSession;
use crate::{DatabaseError, SaveReport, StorageError};

#[async_trait]
pub trait SqlSession: SchemaSession {
    /// Inserts one row into `submissions`.
    async fn insert_submission(&self, submission: &Submission) -> Result<(), DatabaseError>;
}

/// [`SqlSession`] backed by a Postgres connection pool.
#[derive(Clone, Debug)]
pub struct PgSession {
    pool: PgPool,
}

impl PgSession {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &PostgresConfig) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(connect_options(config)?)
            .await
            .map_err(|e| StorageError::Connect {
                backend: "postgres",
                message: e.to_string(),
            })?;

        Ok(Self::new(pool))
    }
}

/// Connection settings for `config`. Credentials are passed as is, never through a URL.
pub fn connect_options(config: &PostgresConfig) -> Result<PgConnectOptions, StorageError> {
    let ssl_mode = PgSslMode::from_str(&config.ssl_mode).map_err(|e| StorageError::Connect {
        backend: "postgres",
        message: format!("invalid ssl mode '{}': {e}", config.ssl_mode),
    })?;

    Ok(PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.user)
        .password(&config.password)
        .database(&config.database)
        .ssl_mode(ssl_mode))
}

fn db_error(e: sqlx::Error) -> DatabaseError {
    if let sqlx::Error::Database(db) = &e {
        if let Some(constraint) = db.constraint() {
            return DatabaseError::constraint_violation(db.message(), constraint);
        }
    }

    DatabaseError::new(e.to_string())
}

#[async_trait]
impl SchemaSession for PgSession {
    async fn execute(&self, statement: &str) -> Result<(), DatabaseError> {
        sqlx::raw_sql(statement)
            .execute(&self.pool)
            .await
            .map(drop)
            .map_err(db_error)
    }

    async fn migration_history(&self, table: &str) -> Result<Vec<(i64, bool)>, DatabaseError> {
        let query = format!("SELECT version, dirty FROM {table}");

        sqlx::query_as::<_, (i64, bool)>(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)
    }
}

#[async_trait]
impl SqlSession for PgSession {
    async fn insert_submission(&self, submission: &Submission) -> Result<(), DatabaseError> {
        let snark_work = submission
            .snark_work
            .as_deref()
            .filter(|work| !work.is_empty());

        let query = if snark_work.is_some() {
            "INSERT INTO submissions (submitted_at_date, submitted_at, submitter, created_at, \
             block_hash, remote_addr, peer_id, graphql_control_port, built_with_commit_sha, snark_work) \
             VALUES ($1::date, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
        } else {
            "INSERT INTO submissions (submitted_at_date, submitted_at, submitter, created_at, \
             block_hash, remote_addr, peer_id, graphql_control_port, built_with_commit_sha) \
             VALUES ($1::date, $2, $3, $4, $5, $6, $7, $8, $9)"
        };

        let mut insert = sqlx::query(query)
            .bind(submission.submitted_at_date.as_str())
            .bind(submission.submitted_at.naive_utc())
            .bind(submission.submitter.as_str())
            .bind(submission.created_at.naive_utc())
            .bind(submission.block_hash.as_str())
            .bind(submission.remote_addr.as_str())
            .bind(submission.peer_id.as_str())
            .bind(submission.graphql_control_port.map(i32::from))
            .bind(submission.built_with_commit_sha.as_deref());

        if let Some(work) = snark_work {
            insert = insert.bind(work);
        }

        insert.execute(&self.pool).await.map(drop).map_err(db_error)
    }
}

/// Relational storage backend.
pub struct PostgresBackend {
    session: Arc<dyn SqlSession>,
}

impl fmt::Debug for PostgresBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresBackend").finish_non_exhaustive()
    }
}

impl PostgresBackend {
    pub fn new(session: Arc<dyn SqlSession>) -> Self {
        Self { session }
    }

    pub async fn connect(config: &PostgresConfig) -> Result<Self, StorageError> {
        let session = PgSession::connect(config).await?;
        info!(host = %config.host, database = %config.database, "Connected to relational store");

        Ok(Self::new(Arc::new(session)))
    }

    pub fn session(&self) -> &Arc<dyn SqlSession> {
        &self.session
    }

    /// A submitter already recorded for that date is reported, not treated as an error.
    pub async fn save(&self, objects: &ObjectsToSave) -> Result<SaveReport, StorageError> {
        let submission = assemble_batch(objects)?;

        let row = &submission;
        let already_recorded = retry(Budget::STORAGE, || async move {
            match self.session.insert_submission(row).await {
                Ok(()) => Ok(false),
                Err(e) if e.is_duplicate_submission() => Ok(true),
                Err(e) => Err(e),
            }
        })
        .await?;

        if already_recorded {
            info!(
                submitter = %submission.submitter,
                submitted_at = %submission.submitted_at,
                "Submission already recorded"
            );

            return Ok(SaveReport {
                already_recorded: true,
                ..SaveReport::default()
            });
        }

        debug!(
            submitter = %submission.submitter,
            submitted_at = %submission.submitted_at,
            "Saved submission"
        );

        Ok(SaveReport {
            written: 1,
            ..SaveReport::default()
        })
    }
}
