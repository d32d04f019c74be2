use chrono::{DateTime, DurationRound, NaiveDate, TimeDelta, Utc};

use uptime_config::PeriodInput;

/// Interval used when it cannot be derived from the inputs, in hours
pub const DEFAULT_INTERVAL_HOURS: i64 = 12;

fn default_interval() -> TimeDelta {
    TimeDelta::hours(DEFAULT_INTERVAL_HOURS)
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum PeriodError {
    #[error(
        "Period start ({start}) and end ({end}) do not match the interval of {interval_minutes} minutes"
    )]
    Mismatch {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval_minutes: i64,
    },

    #[error("Period interval must be positive, got {0} minutes")]
    NonPositive(i64),

    #[error("Period bounds are out of range")]
    OutOfRange,
}

/// A fully determined observation window, `end - start == interval`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PeriodConfig {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub interval: TimeDelta,
}

impl PeriodConfig {
    /// Resolves a partial window against the current time.
    pub fn resolve(input: &PeriodInput) -> Result<Self, PeriodError> {
        resolve_period(input.start, input.end, input.interval_minutes, Utc::now())
    }

    /// Whether `at` falls within `[start, end)`.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }

    /// Length of the window in whole hours, rounded down.
    pub fn hours(&self) -> i64 {
        self.interval.num_hours()
    }

    /// Every UTC day the window touches, in order.
    pub fn days(&self) -> Vec<NaiveDate> {
        let mut days = Vec::new();
        let mut day = self.start.date_naive();

        while day.and_hms_opt(0, 0, 0).map(|d| d.and_utc()) < Some(self.end) {
            days.push(day);

            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }

        days
    }
}

/// `now` rounded down to the last midnight or noon, UTC.
pub fn default_end(now: DateTime<Utc>) -> DateTime<Utc> {
    now.duration_trunc(default_interval()).unwrap_or(now)
}

/// Fills in whatever part of the window is missing.
///
/// - all three given: they must agree
/// - two given: the third is derived
/// - only start or only end: the interval defaults to 12 hours
/// - only the interval: the window ends at [`default_end`]
/// - nothing: the 12 hours ending at [`default_end`]
pub fn resolve_period(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    interval_minutes: Option<i64>,
    now: DateTime<Utc>,
) -> Result<PeriodConfig, PeriodError> {
    let interval = match interval_minutes {
        Some(minutes) if minutes <= 0 => return Err(PeriodError::NonPositive(minutes)),
        Some(minutes) => Some(TimeDelta::try_minutes(minutes).ok_or(PeriodError::OutOfRange)?),
        None => None,
    };

    let shift = |at: DateTime<Utc>, delta: TimeDelta| {
        at.checked_add_signed(delta).ok_or(PeriodError::OutOfRange)
    };

    let (start, end, interval) = match (start, end, interval) {
        (Some(start), Some(end), Some(interval)) => {
            if end - start != interval {
                return Err(PeriodError::Mismatch {
                    start,
                    end,
                    interval_minutes: interval.num_minutes(),
                });
            }
            (start, end, interval)
        }
        (Some(start), Some(end), None) => (start, end, end - start),
        (Some(start), None, Some(interval)) => (start, shift(start, interval)?, interval),
        (None, Some(end), Some(interval)) => (shift(end, -interval)?, end, interval),
        (Some(start), None, None) => (start, shift(start, default_interval())?, default_interval()),
        (None, Some(end), None) => (shift(end, -default_interval())?, end, default_interval()),
        (None, None, Some(interval)) => {
            let end = default_end(now);
            (shift(end, -interval)?, end, interval)
        }
        (None, None, None) => {
            let end = default_end(now);
            (shift(end, -default_interval())?, end, default_interval())
        }
    };

    Ok(PeriodConfig {
        start,
        end,
        interval,
    })
}
