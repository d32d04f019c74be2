mod ingest;
mod registry;

pub use ingest::{Metrics, RejectReason};
pub use registry::SharedRegistry;

pub use prometheus_client::metrics::counter::Counter;
pub use prometheus_client::metrics::family::Family;
pub use prometheus_client::metrics::gauge::Gauge;
pub use prometheus_client::metrics::histogram::{linear_buckets, Histogram};
pub use prometheus_client::registry::Registry;
