use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::{AttemptCounter, WhitelistCell};

/// Why a submission was turned away.
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("Submitter is not on the whitelist")]
    NotWhitelisted,

    #[error("Too many submissions from this submitter in the last hour")]
    RateLimited,
}

impl Rejection {
    /// Label used for metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::NotWhitelisted => "whitelist",
            Rejection::RateLimited => "rate_limit",
        }
    }
}

/// Decides whether a submission may be persisted.
///
/// The whitelist is checked first, so requests from unknown submitters do not
/// consume any quota.
#[derive(Debug)]
pub struct AdmissionGate {
    whitelist: Option<Arc<WhitelistCell>>,
    counter: AttemptCounter,
}

impl AdmissionGate {
    /// `whitelist` is `None` when whitelisting is disabled.
    pub fn new(whitelist: Option<Arc<WhitelistCell>>, counter: AttemptCounter) -> Self {
        Self { whitelist, counter }
    }

    pub fn whitelist(&self) -> Option<&Arc<WhitelistCell>> {
        self.whitelist.as_ref()
    }

    pub fn counter(&self) -> &AttemptCounter {
        &self.counter
    }

    /// Ready once the first whitelist snapshot is in, or right away without a whitelist.
    pub fn is_ready(&self) -> bool {
        self.whitelist.as_ref().is_none_or(|cell| cell.is_loaded())
    }

    pub fn admit(&self, submitter: &str) -> Result<(), Rejection> {
        self.admit_at(submitter, Instant::now())
    }

    pub fn admit_at(&self, submitter: &str, now: Instant) -> Result<(), Rejection> {
        if let Some(cell) = &self.whitelist {
            if !cell.load().contains(submitter) {
                debug!(%submitter, "Submitter not whitelisted");
                return Err(Rejection::NotWhitelisted);
            }
        }

        if !self.counter.record_at(submitter, now) {
            debug!(%submitter, limit = self.counter.max_per_window(), "Submitter rate limited");
            return Err(Rejection::RateLimited);
        }

        Ok(())
    }

    /// Returns the quota taken by an admission at `admitted_at` whose submission
    /// was not stored.
    pub fn release(&self, submitter: &str, admitted_at: Instant) {
        if self.counter.release_at(submitter, admitted_at) {
            debug!(%submitter, "Released quota of unsaved submission");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Whitelist;

    fn whitelist(keys: &[&str]) -> Whitelist {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_whitelist_disabled_admits_anyone() {
        let gate = AdmissionGate::new(None, AttemptCounter::new(10));
        assert!(gate.is_ready());
        assert_eq!(gate.admit("B62qanyone"), Ok(()));
    }

    #[test]
    fn test_unknown_submitter_is_rejected_without_using_quota() {
        let cell = Arc::new(WhitelistCell::with_snapshot(whitelist(&["B62qalice"])));
        let gate = AdmissionGate::new(Some(cell), AttemptCounter::new(10));
        let now = Instant::now();

        assert_eq!(gate.admit_at("B62qmallory", now), Err(Rejection::NotWhitelisted));
        assert_eq!(gate.counter().count_at("B62qmallory", now), 0);
        assert_eq!(gate.admit_at("B62qalice", now), Ok(()));
    }

    #[test]
    fn test_quota_applies_after_whitelist() {
        let cell = Arc::new(WhitelistCell::with_snapshot(whitelist(&["B62qalice"])));
        let gate = AdmissionGate::new(Some(cell), AttemptCounter::new(2));
        let now = Instant::now();

        assert_eq!(gate.admit_at("B62qalice", now), Ok(()));
        assert_eq!(gate.admit_at("B62qalice", now), Ok(()));
        assert_eq!(gate.admit_at("B62qalice", now), Err(Rejection::RateLimited));
    }

    #[test]
    fn test_release_restores_quota() {
        let gate = AdmissionGate::new(None, AttemptCounter::new(1));
        let now = Instant::now();

        assert_eq!(gate.admit_at("B62qalice", now), Ok(()));
        gate.release("B62qalice", now);
        assert_eq!(gate.admit_at("B62qalice", now), Ok(()));
        assert_eq!(gate.admit_at("B62qalice", now), Err(Rejection::RateLimited));
    }

    #[test]
    fn test_not_ready_until_first_snapshot() {
        let cell = Arc::new(WhitelistCell::new());
        let gate = AdmissionGate::new(Some(Arc::clone(&cell)), AttemptCounter::default());

        assert!(!gate.is_ready());
        assert_eq!(gate.admit("B62qalice"), Err(Rejection::NotWhitelisted));

        cell.store(whitelist(&["B62qalice"]));
        assert!(gate.is_ready());
        assert_eq!(gate.admit("B62qalice"), Ok(()));
    }

    #[test]
    fn test_labels() {
        assert_eq!(Rejection::NotWhitelisted.as_str(), "whitelist");
        assert_eq!(Rejection::RateLimited.as_str(), "rate_limit");
    }
}
