#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};

use uptime_storage::{DatabaseError, KeyspaceSession, SchemaSession, SqlSession, ROW_TOO_LARGE};
use uptime_types::path::{block_path, submission_path};
use uptime_types::{Block, ObjectsToSave, Submission};

pub fn submitted_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 2, 1, 12, 0, 0).unwrap()
}

/// A batch with one submission and, optionally, the block it announces.
pub fn batch(submitter: &str, raw_block: Option<&[u8]>) -> ObjectsToSave {
    let body = format!(
        r#"{{"submitter":"{submitter}","created_at":"2024-02-01T11:59:58Z","remote_addr":"10.0.0.1:8301","peer_id":"12D3KooW","block_hash":"3NKhash","snark_work":"AQID","graphql_control_port":3085}}"#
    );

    let mut objects = ObjectsToSave::new();
    objects.insert(submission_path(submitted_at(), submitter), body);

    if let Some(raw_block) = raw_block {
        objects.insert(block_path("3NKhash"), Bytes::copy_from_slice(raw_block));
    }

    objects
}

/// History table emulation shared by the fake sessions.
#[derive(Default)]
pub struct FakeSchema {
    pub statements: Mutex<Vec<String>>,
    pub history: Mutex<BTreeMap<i64, bool>>,

    /// Statements containing this text always fail
    pub failing: Mutex<Option<String>>,

    /// Number of calls that fail before the store becomes reachable
    pub unavailable_for: AtomicUsize,
}

impl FakeSchema {
    pub fn fail_on(&self, text: &str) {
        *self.failing.lock().unwrap() = Some(text.to_string());
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    pub fn history(&self) -> BTreeMap<i64, bool> {
        self.history.lock().unwrap().clone()
    }

    /// Consumes one injected outage, if any is left.
    pub fn check_available(&self) -> Result<(), DatabaseError> {
        let outage = self
            .unavailable_for
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));

        match outage {
            Ok(_) => Err(DatabaseError::new("Connection timed out")),
            Err(_) => Ok(()),
        }
    }

    fn execute(&self, statement: &str) -> Result<(), DatabaseError> {
        self.check_available()?;

        if let Some(failing) = self.failing.lock().unwrap().as_deref() {
            if statement.contains(failing) {
                return Err(DatabaseError::new(format!("Syntax error in '{statement}'")));
            }
        }

        self.statements.lock().unwrap().push(statement.to_string());

        if !statement.contains("schema_migrations") {
            return Ok(());
        }

        let mut history = self.history.lock().unwrap();

        if let Some(values) = statement.split("VALUES (").nth(1) {
            let values = values.split(')').next().unwrap_or_default();
            let (version, dirty) = values.split_once(", ").unwrap();
            history.insert(version.parse().unwrap(), dirty.parse().unwrap());
        } else if let Some(version) = statement.split("WHERE version = ").nth(1) {
            history.remove(&version.trim().parse().unwrap());
        }

        Ok(())
    }
}

/// In-memory wide-column store rejecting rows above `max_row_size` bytes of raw block.
pub struct FakeKeyspaces {
    pub schema: FakeSchema,
    pub max_row_size: usize,
    pub rows: Mutex<Vec<Submission>>,
    pub blocks: Mutex<Vec<Block>>,
    pub tables: Mutex<Vec<String>>,
    pub insert_attempts: AtomicUsize,
}

impl FakeKeyspaces {
    pub fn new(max_row_size: usize) -> Self {
        Self {
            schema: FakeSchema::default(),
            max_row_size,
            rows: Mutex::default(),
            blocks: Mutex::default(),
            tables: Mutex::new(vec!["submissions".to_string(), "blocks".to_string()]),
            insert_attempts: AtomicUsize::new(0),
        }
    }

    pub fn rows(&self) -> Vec<Submission> {
        self.rows.lock().unwrap().clone()
    }

    pub fn blocks(&self) -> Vec<Block> {
        self.blocks.lock().unwrap().clone()
    }
}

#[async_trait]
impl SchemaSession for FakeKeyspaces {
    async fn execute(&self, statement: &str) -> Result<(), DatabaseError> {
        self.schema.execute(statement)?;

        if let Some(table) = statement.strip_prefix("DROP TABLE ") {
            let table = table.rsplit('.').next().unwrap_or(table);
            self.tables.lock().unwrap().retain(|t| t != table);
        }

        Ok(())
    }

    async fn migration_history(&self, _table: &str) -> Result<Vec<(i64, bool)>, DatabaseError> {
        self.schema.check_available()?;
        Ok(self.schema.history().into_iter().collect())
    }
}

#[async_trait]
impl KeyspaceSession for FakeKeyspaces {
    async fn insert_submission(
        &self,
        _keyspace: &str,
        submission: &Submission,
        with_raw_block: bool,
    ) -> Result<(), DatabaseError> {
        self.insert_attempts.fetch_add(1, Ordering::SeqCst);
        self.schema.check_available()?;

        let row = if with_raw_block {
            submission.clone()
        } else {
            submission.without_raw_block()
        };

        if row.raw_block_len() > self.max_row_size {
            return Err(DatabaseError::new(format!(
                "Database returned an error: Invalid query, Error message: {ROW_TOO_LARGE}"
            )));
        }

        self.rows.lock().unwrap().push(row);
        Ok(())
    }

    async fn insert_block(&self, _keyspace: &str, block: &Block) -> Result<(), DatabaseError> {
        self.schema.check_available()?;
        self.blocks.lock().unwrap().push(block.clone());
        Ok(())
    }

    async fn table_names(&self, _keyspace: &str) -> Result<Vec<String>, DatabaseError> {
        self.schema.check_available()?;
        Ok(self.tables.lock().unwrap().clone())
    }
}

/// In-memory relational store enforcing one submission per submitter and date.
#[derive(Default)]
pub struct FakeSql {
    pub schema: FakeSchema,
    pub rows: Mutex<Vec<Submission>>,
}

impl FakeSql {
    pub fn rows(&self) -> Vec<Submission> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl SchemaSession for FakeSql {
    async fn execute(&self, statement: &str) -> Result<(), DatabaseError> {
        self.schema.execute(statement)
    }

    async fn migration_history(&self, _table: &str) -> Result<Vec<(i64, bool)>, DatabaseError> {
        self.schema.check_available()?;
        Ok(self.schema.history().into_iter().collect())
    }
}

#[async_trait]
impl SqlSession for FakeSql {
    async fn insert_submission(&self, submission: &Submission) -> Result<(), DatabaseError> {
        self.schema.check_available()?;

        let mut rows = self.rows.lock().unwrap();

        let duplicate = rows.iter().any(|row| {
            row.submitter == submission.submitter
                && row.submitted_at_date == submission.submitted_at_date
        });

        if duplicate {
            return Err(DatabaseError::constraint_violation(
                "duplicate key value violates unique constraint \"uq_submissions_submitter_date\"",
                uptime_storage::UNIQUE_SUBMISSION_CONSTRAINT,
            ));
        }

        rows.push(submission.clone());
        Ok(())
    }
}
