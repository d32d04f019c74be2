//! Cassandra-compatible wide-column store.
//!
//! One row per submission. A submission whose row would exceed the store's maximum
//! row size is written again without its raw block.

use core::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use openssl::ssl::{SslContext, SslContextBuilder, SslMethod, SslVerifyMode};
use scylla::frame::value::CqlTimestamp;
use scylla::statement::Consistency;
use scylla::{ExecutionProfile, Session, SessionBuilder};
use tracing::{debug, info, warn};

use uptime_config::KeyspacesConfig;
use uptime_retry::{retry, Budget};
use uptime_types::{assemble_batch, Block, ObjectsToSave, Submission};

use crate::migrate::SchemaSession;
use crate::{DatabaseError, SaveReport, StorageError};

/// Queries the wide-column backend issues, on top of schema management.
#[async_trait]
pub trait KeyspaceSession: SchemaSession {
    /// Inserts one row into `<keyspace>.submissions`, with or without the raw block column.
    async fn insert_submission(
        &self,
        keyspace: &str,
        submission: &Submission,
        with_raw_block: bool,
    ) -> Result<(), DatabaseError>;

    /// Inserts one row into `<keyspace>.blocks`.
    async fn insert_block(&self, keyspace: &str, block: &Block) -> Result<(), DatabaseError>;

    /// Names of all tables in the keyspace.
    async fn table_names(&self, keyspace: &str) -> Result<Vec<String>, DatabaseError>;
}

/// [`KeyspaceSession`] backed by a scylla driver session.
pub struct ScyllaSession {
    session: Session,
}

impl ScyllaSession {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    pub async fn connect(config: &KeyspacesConfig) -> Result<Self, StorageError> {
        let profile = ExecutionProfile::builder()
            .consistency(Consistency::LocalQuorum)
            .build();

        let mut builder = SessionBuilder::new()
            .known_node(config.contact_point())
            .use_keyspace(&config.keyspace, false)
            .default_execution_profile_handle(profile.into_handle())
            .ssl_context(ssl_context(config)?);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.user(username, password);
        }

        let session = builder.build().await.map_err(|e| StorageError::Connect {
            backend: "keyspaces",
            message: e.to_string(),
        })?;

        Ok(Self::new(session))
    }
}

/// TLS context for the session, `None` for a plaintext contact point.
///
/// The server certificate is always verified, against the configured CA
/// certificate or else the system trust store.
pub fn ssl_context(config: &KeyspacesConfig) -> Result<Option<SslContext>, StorageError> {
    if !config.uses_tls() {
        return Ok(None);
    }

    let tls_error = |e: openssl::error::ErrorStack| StorageError::Connect {
        backend: "keyspaces",
        message: format!("failed to set up TLS: {e}"),
    };

    let mut context = SslContextBuilder::new(SslMethod::tls()).map_err(tls_error)?;

    match &config.ssl_certificate_path {
        Some(path) => context.set_ca_file(path).map_err(tls_error)?,
        None => context.set_default_verify_paths().map_err(tls_error)?,
    }

    context.set_verify(SslVerifyMode::PEER);

    Ok(Some(context.build()))
}

fn db_error(e: impl fmt::Display) -> DatabaseError {
    DatabaseError::new(e.to_string())
}

#[async_trait]
impl SchemaSession for ScyllaSession {
    async fn execute(&self, statement: &str) -> Result<(), DatabaseError> {
        self.session
            .query(statement, ())
            .await
            .map(drop)
            .map_err(db_error)
    }

    async fn migration_history(&self, table: &str) -> Result<Vec<(i64, bool)>, DatabaseError> {
        let result = self
            .session
            .query(format!("SELECT version, dirty FROM {table}"), ())
            .await
            .map_err(db_error)?;

        result
            .rows_typed::<(i64, bool)>()
            .map_err(db_error)?
            .map(|row| row.map_err(db_error))
            .collect()
    }
}

#[async_trait]
impl KeyspaceSession for ScyllaSession {
    async fn insert_submission(
        &self,
        keyspace: &str,
        submission: &Submission,
        with_raw_block: bool,
    ) -> Result<(), DatabaseError> {
        let columns = "submitted_at_date, submitted_at, submitter, remote_addr, peer_id, \
                       snark_work, block_hash, created_at, graphql_control_port, built_with_commit_sha";

        let submitted_at = CqlTimestamp(submission.submitted_at.timestamp_millis());
        let created_at = CqlTimestamp(submission.created_at.timestamp_millis());
        let snark_work = submission.snark_work.as_ref().map(|b| b.to_vec());
        let port = submission.graphql_control_port.map(i32::from);
        let commit = submission.built_with_commit_sha.as_deref();

        let result = if with_raw_block {
            let query = format!(
                "INSERT INTO {keyspace}.submissions ({columns}, raw_block) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            );
            let values = (
                submission.submitted_at_date.as_str(),
                submitted_at,
                submission.submitter.as_str(),
                submission.remote_addr.as_str(),
                submission.peer_id.as_str(),
                snark_work,
                submission.block_hash.as_str(),
                created_at,
                port,
                commit,
                submission.raw_block.as_ref().map(|b| b.to_vec()),
            );
            self.session.query(query, values).await
        } else {
            let query = format!(
                "INSERT INTO {keyspace}.submissions ({columns}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            );
            let values = (
                submission.submitted_at_date.as_str(),
                submitted_at,
                submission.submitter.as_str(),
                submission.remote_addr.as_str(),
                submission.peer_id.as_str(),
                snark_work,
                submission.block_hash.as_str(),
                created_at,
                port,
                commit,
            );
            self.session.query(query, values).await
        };

        result.map(drop).map_err(db_error)
    }

    async fn insert_block(&self, keyspace: &str, block: &Block) -> Result<(), DatabaseError> {
        let query = format!("INSERT INTO {keyspace}.blocks (block_hash, raw_block) VALUES (?, ?)");

        self.session
            .query(query, (block.block_hash.as_str(), block.raw_block.to_vec()))
            .await
            .map(drop)
            .map_err(db_error)
    }

    async fn table_names(&self, keyspace: &str) -> Result<Vec<String>, DatabaseError> {
        let result = self
            .session
            .query(
                "SELECT table_name FROM system_schema.tables WHERE keyspace_name = ?",
                (keyspace,),
            )
            .await
            .map_err(db_error)?;

        result
            .rows_typed::<(String,)>()
            .map_err(db_error)?
            .map(|row| row.map(|(name,)| name).map_err(db_error))
            .collect()
    }
}

/// Wide-column storage backend.
pub struct KeyspacesBackend {
    session: Arc<dyn KeyspaceSession>,
    keyspace: String,
    store_blocks_separately: bool,
}

impl fmt::Debug for KeyspacesBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyspacesBackend")
            .field("keyspace", &self.keyspace)
            .field("store_blocks_separately", &self.store_blocks_separately)
            .finish_non_exhaustive()
    }
}

impl KeyspacesBackend {
    pub fn new(
        session: Arc<dyn KeyspaceSession>,
        keyspace: impl Into<String>,
        store_blocks_separately: bool,
    ) -> Self {
        Self {
            session,
            keyspace: keyspace.into(),
            store_blocks_separately,
        }
    }

    pub async fn connect(config: &KeyspacesConfig) -> Result<Self, StorageError> {
        let session = ScyllaSession::connect(config).await?;
        info!(
            contact_point = %config.contact_point(),
            tls = config.uses_tls(),
            keyspace = %config.keyspace,
            "Connected to wide-column store"
        );

        Ok(Self::new(
            Arc::new(session),
            &config.keyspace,
            config.store_blocks_separately,
        ))
    }

    pub fn session(&self) -> &Arc<dyn KeyspaceSession> {
        &self.session
    }

    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }

    pub async fn save(&self, objects: &ObjectsToSave) -> Result<SaveReport, StorageError> {
        let submission = assemble_batch(objects)?;

        debug!(
            submitter = %submission.submitter,
            block_hash = %submission.block_hash,
            submitted_at = %submission.submitted_at,
            "Saving submission"
        );

        let mut report = SaveReport::default();

        if self.store_blocks_separately {
            if let Some(raw_block) = &submission.raw_block {
                let block = Block {
                    block_hash: submission.block_hash.clone(),
                    raw_block: raw_block.clone(),
                };

                retry(Budget::STORAGE, || {
                    self.session.insert_block(&self.keyspace, &block)
                })
                .await?;

                report.written += 1;
            }

            let submission = submission.without_raw_block();
            retry(Budget::STORAGE, || {
                self.session
                    .insert_submission(&self.keyspace, &submission, false)
            })
            .await?;
        } else {
            report.raw_block_dropped = self.insert_degrading(&submission).await?;
        }

        report.written += 1;
        Ok(report)
    }

    /// Inserts the row with its raw block, falling back to a row without it if the store
    /// rejects the row as too large. Returns whether the raw block was dropped.
    async fn insert_degrading(&self, submission: &Submission) -> Result<bool, StorageError> {
        let dropped = retry(Budget::STORAGE, || async move {
            match self
                .session
                .insert_submission(&self.keyspace, submission, true)
                .await
            {
                Ok(()) => Ok(false),
                Err(e) if e.is_row_too_large() => {
                    warn!(
                        submitter = %submission.submitter,
                        size = submission.raw_block_len(),
                        "Block too large, inserting without raw block"
                    );

                    self.session
                        .insert_submission(&self.keyspace, submission, false)
                        .await
                        .map(|()| true)
                }
                Err(e) => Err(e),
            }
        })
        .await?;

        Ok(dropped)
    }
}

/// Waits until every table can be queried.
///
/// Freshly created tables are not usable right away on some managed stores.
pub async fn wait_for_tables(
    session: &(impl SchemaSession + ?Sized),
    keyspace: &str,
    tables: &[&str],
) -> Result<(), StorageError> {
    for table in tables {
        let probe = format!("SELECT * FROM {keyspace}.{table} LIMIT 1");

        retry(Budget::SCHEMA_WAIT, || session.execute(&probe)).await?;
        debug!(%keyspace, %table, "Table is ready");
    }

    Ok(())
}

/// Drops every table of the keyspace, returning their names.
pub async fn drop_all_tables(
    session: &(impl KeyspaceSession + ?Sized),
    keyspace: &str,
) -> Result<Vec<String>, StorageError> {
    info!(%keyspace, "Dropping all tables");

    let dropped = retry(Budget::STORAGE, || async move {
        let tables = session.table_names(keyspace).await?;

        for table in &tables {
            session
                .execute(&format!("DROP TABLE {keyspace}.{table}"))
                .await?;
        }

        Ok::<_, DatabaseError>(tables)
    })
    .await?;

    Ok(dropped)
}
