//! HTTP surface of the ingestion service.
//!
//! Block producers `POST` their artifacts to `/v1/submit`. Each batch is assembled
//! into a submission, gated on the submitter, then handed to the storage backend.

use std::future::Future;
use std::io;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use uptime_admission::AdmissionGate;
use uptime_metrics::Metrics;
use uptime_storage::Backend;

mod handlers;
mod metrics;

pub use handlers::{health, root, submit, Artifact, SubmitRequest, BANNER};
pub use metrics::serve_metrics;

/// Largest accepted submission request, in bytes
pub const MAX_SUBMIT_PAYLOAD_SIZE: usize = 50 * 1024 * 1024;

/// Shared by every request handler
#[derive(Clone, Debug)]
pub struct AppState {
    pub backend: Arc<Backend>,
    pub gate: Arc<AdmissionGate>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(backend: Backend, gate: AdmissionGate, metrics: Metrics) -> Self {
        Self {
            backend: Arc::new(backend),
            gate: Arc::new(gate),
            metrics,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/v1/submit", post(submit))
        .layer(DefaultBodyLimit::max(MAX_SUBMIT_PAYLOAD_SIZE))
        .with_state(state)
}

/// Serves the API on `listener` until `shutdown` completes.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> io::Result<()> {
    let address = listener.local_addr()?;
    info!(%address, backend = state.backend.name(), "Serving submissions");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
