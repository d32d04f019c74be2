use std::collections::BTreeMap;
use std::fmt::Display;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use uptime_admission::Rejection;
use uptime_metrics::{Metrics, RejectReason};
use uptime_storage::SaveReport;
use uptime_types::serialization::serde_base64;
use uptime_types::{assemble_batch, ObjectsToSave};

use crate::AppState;

pub const BANNER: &str = "delegation backend service";

/// Body of a submission request: artifacts keyed by path, base64 encoded.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub objects: BTreeMap<String, Artifact>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact(#[serde(with = "serde_base64")] pub Bytes);

impl SubmitRequest {
    pub fn into_objects(self) -> ObjectsToSave {
        self.objects
            .into_iter()
            .map(|(path, Artifact(data))| (path, data))
            .collect()
    }
}

impl From<&ObjectsToSave> for SubmitRequest {
    fn from(objects: &ObjectsToSave) -> Self {
        Self {
            objects: objects
                .iter()
                .map(|(path, data)| (path.clone(), Artifact(data.clone())))
                .collect(),
        }
    }
}

type Response = (StatusCode, Json<Value>);

fn ok() -> Response {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

fn failure(status: StatusCode, message: impl Display) -> Response {
    (status, Json(json!({ "error": message.to_string() })))
}

fn malformed(metrics: &Metrics, e: impl Display) -> Response {
    debug!("Malformed submission: {e}");
    metrics.reject(RejectReason::Malformed);
    failure(StatusCode::BAD_REQUEST, e)
}

fn record_save(metrics: &Metrics, report: &SaveReport) {
    metrics.accepted.inc();
    metrics.oversized_blocks.inc_by(report.oversized_blocks as u64);

    if report.raw_block_dropped {
        metrics.degraded_inserts.inc();
    }

    if report.already_recorded {
        metrics.duplicate_inserts.inc();
    }
}

pub async fn root() -> &'static str {
    BANNER
}

pub async fn health(State(state): State<AppState>) -> Response {
    if state.gate.is_ready() {
        ok()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unavailable" })),
        )
    }
}

pub async fn submit(State(state): State<AppState>, body: Bytes) -> Response {
    let metrics = &state.metrics;
    metrics.received.inc();

    let objects = match serde_json::from_slice::<SubmitRequest>(&body) {
        Ok(request) => request.into_objects(),
        Err(e) => return malformed(metrics, e),
    };

    let submission = match assemble_batch(&objects) {
        Ok(submission) => submission,
        Err(e) => return malformed(metrics, e),
    };

    let submitter = submission.submitter.as_str();

    let admitted_at = Instant::now();

    if let Err(rejection) = state.gate.admit_at(submitter, admitted_at) {
        let (status, reason) = match rejection {
            Rejection::NotWhitelisted => (StatusCode::UNAUTHORIZED, RejectReason::Whitelist),
            Rejection::RateLimited => (StatusCode::TOO_MANY_REQUESTS, RejectReason::RateLimit),
        };

        metrics.reject(reason);
        return failure(status, rejection);
    }

    let started = Instant::now();
    let result = state.backend.save(&objects).await;
    metrics
        .save_duration
        .observe(started.elapsed().as_secs_f64());

    // Only stored submissions count against the hourly quota
    if result.is_err() {
        state.gate.release(submitter, admitted_at);
    }

    match result {
        Ok(report) => {
            record_save(metrics, &report);
            debug!(%submitter, written = report.written, "Submission saved");
            ok()
        }
        Err(e) if e.is_malformed() => {
            warn!(%submitter, "Rejected by storage: {e}");
            malformed(metrics, e)
        }
        Err(e) => {
            metrics.save_failures.inc();
            error!(%submitter, backend = state.backend.name(), "Failed to save submission: {e}");
            failure(StatusCode::INTERNAL_SERVER_ERROR, "Failed to save submission")
        }
    }
}
