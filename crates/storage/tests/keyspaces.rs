mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::Bytes;

use common::{batch, submitted_at, FakeKeyspaces};
use uptime_storage::keyspaces::{drop_all_tables, wait_for_tables};
use uptime_storage::{KeyspacesBackend, StorageError};

const KEYSPACE: &str = "bpu_integration_dev";

#[tokio::test(start_paused = true)]
async fn oversized_row_is_stored_without_raw_block() {
    let session = Arc::new(FakeKeyspaces::new(16));
    let backend = KeyspacesBackend::new(session.clone(), KEYSPACE, false);

    let report = backend
        .save(&batch("B62qalice", Some(&[7; 64])))
        .await
        .unwrap();

    assert!(report.raw_block_dropped);
    assert_eq!(report.written, 1);
    assert_eq!(session.insert_attempts.load(Ordering::SeqCst), 2);

    let rows = session.rows();
    assert_eq!(rows.len(), 1);

    let row = &rows[0];
    assert_eq!(row.raw_block, None);
    assert_eq!(row.submitter, "B62qalice");
    assert_eq!(row.submitted_at, submitted_at());
    assert_eq!(row.submitted_at_date, "2024-02-01");
    assert_eq!(row.block_hash, "3NKhash");
    assert_eq!(row.remote_addr, "10.0.0.1:8301");
    assert_eq!(row.peer_id, "12D3KooW");
    assert_eq!(row.graphql_control_port, Some(3085));
    assert_eq!(row.snark_work, Some(Bytes::from_static(&[1, 2, 3])));
}

#[tokio::test(start_paused = true)]
async fn block_within_limit_is_kept() {
    let session = Arc::new(FakeKeyspaces::new(1024));
    let backend = KeyspacesBackend::new(session.clone(), KEYSPACE, false);

    let report = backend
        .save(&batch("B62qalice", Some(&[7; 64])))
        .await
        .unwrap();

    assert!(!report.raw_block_dropped);
    assert_eq!(session.insert_attempts.load(Ordering::SeqCst), 1);
    assert_eq!(session.rows()[0].raw_block_len(), 64);
}

#[tokio::test(start_paused = true)]
async fn blocks_stored_separately() {
    let session = Arc::new(FakeKeyspaces::new(16));
    let backend = KeyspacesBackend::new(session.clone(), KEYSPACE, true);

    let report = backend
        .save(&batch("B62qalice", Some(&[7; 64])))
        .await
        .unwrap();

    assert_eq!(report.written, 2);
    assert!(!report.raw_block_dropped);

    let blocks = session.blocks();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].block_hash, "3NKhash");
    assert_eq!(blocks[0].raw_block.len(), 64);

    assert_eq!(session.rows()[0].raw_block, None);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried() {
    let session = Arc::new(FakeKeyspaces::new(1024));
    session.schema.unavailable_for.store(2, Ordering::SeqCst);

    let backend = KeyspacesBackend::new(session.clone(), KEYSPACE, false);
    backend.save(&batch("B62qalice", None)).await.unwrap();

    assert_eq!(session.insert_attempts.load(Ordering::SeqCst), 3);
    assert_eq!(session.rows().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn exhausted_budget_is_reported() {
    let session = Arc::new(FakeKeyspaces::new(1024));
    session.schema.unavailable_for.store(10, Ordering::SeqCst);

    let backend = KeyspacesBackend::new(session.clone(), KEYSPACE, false);
    let result = backend.save(&batch("B62qalice", None)).await;

    match result {
        Err(StorageError::Database(e)) => assert_eq!(e.attempts, 3),
        other => panic!("expected a database error, got {other:?}"),
    }
    assert!(session.rows().is_empty());
}

#[tokio::test]
async fn batch_without_submission_is_malformed() {
    let session = Arc::new(FakeKeyspaces::new(1024));
    let backend = KeyspacesBackend::new(session.clone(), KEYSPACE, false);

    let mut objects = uptime_types::ObjectsToSave::new();
    objects.insert("blocks/3NKhash.dat", Bytes::from_static(b"block"));

    let err = backend.save(&objects).await.unwrap_err();
    assert!(err.is_malformed());
    assert_eq!(session.insert_attempts.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn tables_are_awaited_and_dropped() {
    let session = FakeKeyspaces::new(1024);
    session.schema.unavailable_for.store(4, Ordering::SeqCst);

    wait_for_tables(&session, KEYSPACE, &["submissions", "blocks"])
        .await
        .unwrap();

    assert_eq!(
        session.schema.statements(),
        vec![
            format!("SELECT * FROM {KEYSPACE}.submissions LIMIT 1"),
            format!("SELECT * FROM {KEYSPACE}.blocks LIMIT 1"),
        ]
    );

    let dropped = drop_all_tables(&session, KEYSPACE).await.unwrap();
    assert_eq!(dropped, vec!["submissions", "blocks"]);
    assert!(session.tables.lock().unwrap().is_empty());
}
