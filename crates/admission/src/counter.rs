use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Length of the rolling window over which requests are counted
pub const RATE_WINDOW: Duration = Duration::from_secs(60 * 60);

/// Maximum accepted submissions per submitter within the rate window
pub const DEFAULT_REQUESTS_PER_PK_HOURLY: usize = 120;

/// Per-submitter sliding counter of accepted requests over the trailing hour.
///
/// Each submitter keeps the instants of its accepted requests still inside the
/// window. A request is accepted only if fewer than `max_per_window` of those
/// remain, in which case it is recorded. Rejected requests are not recorded, so
/// a submitter that keeps hammering the service regains quota as soon as its
/// oldest accepted request leaves the window.
#[derive(Debug)]
pub struct AttemptCounter {
    attempts: DashMap<String, VecDeque<Instant>>,
    max_per_window: usize,
    window: Duration,
}

impl Default for AttemptCounter {
    fn default() -> Self {
        Self::new(DEFAULT_REQUESTS_PER_PK_HOURLY)
    }
}

impl AttemptCounter {
    pub fn new(max_per_window: usize) -> Self {
        Self::with_window(max_per_window, RATE_WINDOW)
    }

    pub fn with_window(max_per_window: usize, window: Duration) -> Self {
        Self {
            attempts: DashMap::new(),
            max_per_window,
            window,
        }
    }

    pub fn max_per_window(&self) -> usize {
        self.max_per_window
    }

    /// Records a request from `submitter` if it is within quota.
    pub fn record(&self, submitter: &str) -> bool {
        self.record_at(submitter, Instant::now())
    }

    /// Same as [`AttemptCounter::record`], at an explicit instant.
    ///
    /// The per-submitter entry stays locked for the whole check-and-increment.
    pub fn record_at(&self, submitter: &str, now: Instant) -> bool {
        let mut attempts = self.attempts.entry(submitter.to_string()).or_default();

        while let Some(oldest) = attempts.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                attempts.pop_front();
            } else {
                break;
            }
        }

        if attempts.len() >= self.max_per_window {
            return false;
        }

        attempts.push_back(now);
        true
    }

    /// Gives back a request recorded at `at`, for a submission that was not stored.
    ///
    /// Returns whether a matching request was found.
    pub fn release_at(&self, submitter: &str, at: Instant) -> bool {
        let Some(mut attempts) = self.attempts.get_mut(submitter) else {
            return false;
        };

        match attempts.iter().rposition(|recorded| *recorded == at) {
            Some(index) => {
                attempts.remove(index);
                true
            }
            None => false,
        }
    }

    /// Number of accepted requests from `submitter` still inside the window at `now`.
    pub fn count_at(&self, submitter: &str, now: Instant) -> usize {
        self.attempts.get(submitter).map_or(0, |attempts| {
            attempts
                .iter()
                .filter(|at| now.saturating_duration_since(**at) < self.window)
                .count()
        })
    }

    /// Drops submitters without any request inside the window.
    pub fn prune(&self, now: Instant) {
        self.attempts.retain(|_, attempts| {
            attempts
                .back()
                .is_some_and(|last| now.saturating_duration_since(*last) < self.window)
        });
    }

    pub fn tracked_submitters(&self) -> usize {
        self.attempts.len()
    }
}
