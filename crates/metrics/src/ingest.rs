use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{linear_buckets, Histogram};

use crate::SharedRegistry;

/// Why a submission was not stored
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RejectReason {
    Whitelist,
    RateLimit,
    Malformed,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::Whitelist => "whitelist",
            RejectReason::RateLimit => "rate_limit",
            RejectReason::Malformed => "malformed",
        }
    }
}

type Labels = Vec<(&'static str, &'static str)>;

#[derive(Clone, Debug)]
pub struct Metrics {
    /// Submission requests received
    pub received: Counter,

    /// Submissions stored, including already recorded ones
    pub accepted: Counter,

    /// Submissions turned away, by reason
    pub rejected: Family<Labels, Counter>,

    /// Submissions the storage backend failed to save
    pub save_failures: Counter,

    /// Raw blocks above the maximum block size
    pub oversized_blocks: Counter,

    /// Wide-column rows stored without their raw block
    pub degraded_inserts: Counter,

    /// Relational inserts of a submission already recorded
    pub duplicate_inserts: Counter,

    /// Time spent saving a batch, in seconds
    pub save_duration: Histogram,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            received: Counter::default(),
            accepted: Counter::default(),
            rejected: Family::default(),
            save_failures: Counter::default(),
            oversized_blocks: Counter::default(),
            degraded_inserts: Counter::default(),
            duplicate_inserts: Counter::default(),
            save_duration: Histogram::new(linear_buckets(0.05, 0.25, 20)),
        }
    }

    pub fn register(registry: &SharedRegistry) -> Self {
        let metrics = Self::new();

        registry.with_prefix("uptime", |registry| {
            registry.register(
                "submissions_received",
                "Submission requests received",
                metrics.received.clone(),
            );

            registry.register(
                "submissions_accepted",
                "Submissions stored, including already recorded ones",
                metrics.accepted.clone(),
            );

            registry.register(
                "submissions_rejected",
                "Submissions turned away, by reason",
                metrics.rejected.clone(),
            );

            registry.register(
                "save_failures",
                "Submissions the storage backend failed to save",
                metrics.save_failures.clone(),
            );

            registry.register(
                "oversized_blocks",
                "Raw blocks above the maximum block size",
                metrics.oversized_blocks.clone(),
            );

            registry.register(
                "degraded_inserts",
                "Wide-column rows stored without their raw block",
                metrics.degraded_inserts.clone(),
            );

            registry.register(
                "duplicate_inserts",
                "Relational inserts of a submission already recorded",
                metrics.duplicate_inserts.clone(),
            );

            registry.register(
                "save_duration_seconds",
                "Time spent saving a batch",
                metrics.save_duration.clone(),
            );
        });

        metrics
    }

    pub fn reject(&self, reason: RejectReason) {
        self.rejected
            .get_or_create(&vec![("reason", reason.as_str())])
            .inc();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
