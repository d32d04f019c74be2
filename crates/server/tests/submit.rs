use std::path::Path;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use uptime_admission::{AdmissionGate, AttemptCounter, Whitelist, WhitelistCell};
use uptime_metrics::{Metrics, SharedRegistry};
use uptime_server::{health, root, serve, submit, AppState, SubmitRequest, BANNER};
use uptime_storage::{Backend, FilesystemBackend};
use uptime_types::ObjectsToSave;

const SUBMISSION_PATH: &str = "submissions/2024-02-01/2024-02-01T12:00:00Z-B62qalice.json";

fn batch(submitter: &str) -> ObjectsToSave {
    let mut objects = ObjectsToSave::new();
    objects.insert(
        format!("submissions/2024-02-01/2024-02-01T12:00:00Z-{submitter}.json"),
        format!(r#"{{"submitter":"{submitter}","remote_addr":"10.0.0.1:8301","block_hash":"3NKhash"}}"#),
    );
    objects.insert("blocks/3NKhash.dat", Bytes::from_static(b"raw block"));
    objects
}

fn body(objects: &ObjectsToSave) -> Bytes {
    Bytes::from(serde_json::to_vec(&SubmitRequest::from(objects)).unwrap())
}

struct Setup {
    state: AppState,
    registry: SharedRegistry,
}

fn setup(root: &Path, whitelist: Option<Arc<WhitelistCell>>, limit: usize) -> Setup {
    let registry = SharedRegistry::default();
    let metrics = Metrics::register(&registry);

    let state = AppState::new(
        Backend::Filesystem(FilesystemBackend::new(root)),
        AdmissionGate::new(whitelist, AttemptCounter::new(limit)),
        metrics,
    );

    Setup { state, registry }
}

fn whitelist(keys: &[&str]) -> Arc<WhitelistCell> {
    let mut whitelist = Whitelist::new();
    for key in keys {
        whitelist.insert(*key, Default::default());
    }
    Arc::new(WhitelistCell::with_snapshot(whitelist))
}

fn exported(registry: &SharedRegistry) -> String {
    let mut text = String::new();
    registry.encode(&mut text).unwrap();
    text
}

#[tokio::test]
async fn accepted_submission_is_stored() {
    let dir = tempfile::tempdir().unwrap();
    let Setup { state, registry } = setup(dir.path(), None, 10);

    let (status, response) = submit(State(state), body(&batch("B62qalice"))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response.0["status"], "ok");
    assert!(dir.path().join(SUBMISSION_PATH).is_file());
    assert_eq!(
        std::fs::read(dir.path().join("blocks/3NKhash.dat")).unwrap(),
        b"raw block"
    );

    let text = exported(&registry);
    assert!(text.contains("uptime_submissions_received_total 1"));
    assert!(text.contains("uptime_submissions_accepted_total 1"));
}

#[tokio::test]
async fn undecodable_body_is_a_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let Setup { state, registry } = setup(dir.path(), None, 10);

    let (status, response) = submit(State(state), Bytes::from_static(b"{\"objects\": 42}")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(response.0["error"].is_string());
    assert!(exported(&registry).contains(r#"uptime_submissions_rejected_total{reason="malformed"} 1"#));
}

#[tokio::test]
async fn batch_without_submission_is_a_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let Setup { state, .. } = setup(dir.path(), None, 10);

    let mut objects = ObjectsToSave::new();
    objects.insert("blocks/3NKhash.dat", Bytes::from_static(b"raw block"));

    let (status, _) = submit(State(state), body(&objects)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(!dir.path().join("blocks").exists());
}

#[tokio::test]
async fn unknown_submitter_is_unauthorized() {
    let dir = tempfile::tempdir().unwrap();
    let Setup { state, registry } = setup(dir.path(), Some(whitelist(&["B62qbob"])), 10);

    let (status, _) = submit(State(state), body(&batch("B62qalice"))).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(!dir.path().join("submissions").exists());
    assert!(exported(&registry).contains(r#"uptime_submissions_rejected_total{reason="whitelist"} 1"#));
}

#[tokio::test]
async fn submitter_over_quota_is_rate_limited() {
    let dir = tempfile::tempdir().unwrap();
    let Setup { state, registry } = setup(dir.path(), Some(whitelist(&["B62qalice"])), 1);

    let (first, _) = submit(State(state.clone()), body(&batch("B62qalice"))).await;
    let (second, _) = submit(State(state), body(&batch("B62qalice"))).await;

    assert_eq!(first, StatusCode::OK);
    assert_eq!(second, StatusCode::TOO_MANY_REQUESTS);
    assert!(exported(&registry).contains(r#"uptime_submissions_rejected_total{reason="rate_limit"} 1"#));
}

#[tokio::test]
async fn storage_failure_is_an_internal_error() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("not-a-directory");
    std::fs::write(&file, b"").unwrap();

    let Setup { state, registry } = setup(&file, None, 10);

    let (status, response) = submit(State(state), body(&batch("B62qalice"))).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.0["error"], "Failed to save submission");
    assert!(exported(&registry).contains("uptime_save_failures_total 1"));
}

#[tokio::test]
async fn failed_save_does_not_use_quota() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("not-a-directory");
    std::fs::write(&file, b"").unwrap();

    let Setup { state, registry } = setup(&file, Some(whitelist(&["B62qalice"])), 1);

    let (first, _) = submit(State(state.clone()), body(&batch("B62qalice"))).await;
    let (second, _) = submit(State(state.clone()), body(&batch("B62qalice"))).await;

    assert_eq!(first, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(second, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        state
            .gate
            .counter()
            .count_at("B62qalice", std::time::Instant::now()),
        0
    );

    let text = exported(&registry);
    assert!(text.contains("uptime_save_failures_total 2"));
    assert!(!text.contains(r#"reason="rate_limit""#));
}

#[tokio::test]
async fn health_follows_whitelist_readiness() {
    let dir = tempfile::tempdir().unwrap();

    let cell = Arc::new(WhitelistCell::new());
    let Setup { state, .. } = setup(dir.path(), Some(Arc::clone(&cell)), 10);

    let (status, response) = health(State(state.clone())).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.0["status"], "unavailable");

    cell.store(Whitelist::new());

    let (status, response) = health(State(state)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response.0["status"], "ok");
}

#[tokio::test]
async fn health_is_ok_without_whitelist() {
    let dir = tempfile::tempdir().unwrap();
    let Setup { state, .. } = setup(dir.path(), None, 10);

    let (status, _) = health(State(state)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn banner_is_served_over_http() {
    assert_eq!(root().await, BANNER);

    let dir = tempfile::tempdir().unwrap();
    let Setup { state, .. } = setup(dir.path(), None, 10);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();

    let server = tokio::spawn(serve(listener, state, async move {
        let _ = stopped.await;
    }));

    let mut stream = TcpStream::connect(address).await.unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
    assert!(response.ends_with(BANNER), "{response}");

    stop.send(()).unwrap();
    server.await.unwrap().unwrap();
}
