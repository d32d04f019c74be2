//! Admission control for inbound submissions.
//!
//! A submission is persisted only if its submitter is on the active whitelist
//! (when whitelisting is enabled) and has not exceeded its hourly quota.

mod counter;
mod gate;
mod whitelist;

pub use counter::{AttemptCounter, DEFAULT_REQUESTS_PER_PK_HOURLY, RATE_WINDOW};
pub use gate::{AdmissionGate, Rejection};
pub use whitelist::{
    refresh_loop, refresh_once, FileWhitelistSource, Whitelist, WhitelistCell, WhitelistError,
    WhitelistSource, DEFAULT_REFRESH_INTERVAL,
};
