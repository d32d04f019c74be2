//! Retry with exponential backoff.
//!
//! Every fallible remote operation of the service goes through [`retry`], each call
//! site picking its own [`Budget`]: short for writes on the ingestion path, long for
//! schema changes and schema waits.
//!
//! There is no jitter and no circuit breaking. Once the budget is exhausted the last
//! error is handed back to the caller together with the number of attempts made.

use core::fmt;
use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// How many times an operation is attempted, and how long to wait after the first failure.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Budget {
    pub max_attempts: usize,
    pub initial_delay: Duration,
}

impl Budget {
    /// Writes on the ingestion path
    pub const STORAGE: Self = Self::new(3, Duration::from_millis(300));

    /// Creation of the migration history table
    pub const HISTORY_TABLE: Self = Self::new(5, Duration::from_secs(1));

    /// Applying or reverting a migration step
    pub const MIGRATION: Self = Self::new(10, Duration::from_secs(1));

    /// Waiting for freshly created tables to become usable
    pub const SCHEMA_WAIT: Self = Self::new(15, Duration::from_secs(1));

    pub const fn new(max_attempts: usize, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
        }
    }

    /// The delays slept between consecutive attempts.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        ExponentialBackoff::new(self.initial_delay).take(self.max_attempts.saturating_sub(1))
    }
}

/// Delays doubling from an initial value, forever.
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    next: Duration,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration) -> Self {
        Self { next: initial }
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next;
        self.next = current.saturating_mul(2);
        Some(current)
    }
}

/// The operation kept failing until the budget ran out.
#[derive(Debug, thiserror::Error)]
#[error("Operation failed after {attempts} attempts: {last}")]
pub struct RetryError<E> {
    pub attempts: usize,
    pub last: E,
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        self.last
    }
}

/// Runs `op` until it succeeds, at most `budget.max_attempts` times.
///
/// After the n-th failed attempt the task sleeps for `initial_delay * 2^(n-1)`.
/// There is no sleep after the final attempt. A budget of zero attempts
/// still runs the operation once.
pub async fn retry<T, E, F, Fut>(budget: Budget, mut op: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let max_attempts = budget.max_attempts.max(1);
    let mut delays = budget.delays();
    let mut attempt = 0;

    loop {
        attempt += 1;

        let error = match op().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let Some(delay) = delays.next() else {
            return Err(RetryError {
                attempts: attempt,
                last: error,
            });
        };

        debug!(attempt, max_attempts, ?delay, "Operation failed, retrying: {error}");
        tokio::time::sleep(delay).await;
    }
}
