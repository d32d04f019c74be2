//! Per-identity uptime.
//!
//! Each identity's submissions are replayed in time order. The first one is always a
//! hit. Every later one is a hit only if it arrives strictly more than
//! `sync_period - 5` minutes after the previous hit, so bursts within one slot count once.

use std::collections::HashMap;

use chrono::{DateTime, TimeDelta, Utc};

use uptime_types::Submission;

use crate::identity::Identity;
use crate::period::PeriodConfig;
use crate::AnalyzerError;

/// Slack granted on the expected cadence, in minutes
pub const TOLERANCE_MINUTES: i64 = 5;

/// Submissions a perfectly live node makes over the period.
pub fn expected_count(sync_period_minutes: u32, period: &PeriodConfig) -> Result<u64, AnalyzerError> {
    if sync_period_minutes == 0 {
        return Err(AnalyzerError::ZeroExpectedCount);
    }

    let per_hour = u64::from(60 / sync_period_minutes);
    let hours = u64::try_from(period.hours()).unwrap_or(0);

    match per_hour * hours {
        0 => Err(AnalyzerError::ZeroExpectedCount),
        expected => Ok(expected),
    }
}

/// `100 * hits / expected`, capped at 100.
pub fn uptime_percent(hits: u64, expected: u64) -> f64 {
    if expected == 0 {
        return 0.0;
    }

    (100.0 * hits as f64 / expected as f64).min(100.0)
}

/// Two decimals, e.g. `8.33`.
pub fn format_percent(percent: f64) -> String {
    format!("{percent:.2}")
}

/// Where an identity stands in the replay of its submissions.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Timeline {
    #[default]
    NoSubmissionSeen,
    TrackingGaps {
        last_hit: DateTime<Utc>,
        hits: u64,
    },
}

impl Timeline {
    /// Records a submission made at `at`. Submissions must be observed in time order.
    pub fn observe(&mut self, at: DateTime<Utc>, sync_period_minutes: u32) {
        let min_gap = TimeDelta::minutes(i64::from(sync_period_minutes) - TOLERANCE_MINUTES);

        *self = match *self {
            Timeline::NoSubmissionSeen => Timeline::TrackingGaps {
                last_hit: at,
                hits: 1,
            },
            Timeline::TrackingGaps { last_hit, hits } if at > last_hit + min_gap => {
                Timeline::TrackingGaps {
                    last_hit: at,
                    hits: hits + 1,
                }
            }
            unchanged => unchanged,
        };
    }

    /// Number of on-time submissions seen.
    pub fn done(self) -> u64 {
        match self {
            Timeline::NoSubmissionSeen => 0,
            Timeline::TrackingGaps { hits, .. } => hits,
        }
    }
}

/// Uptime of one identity over the period.
#[derive(Clone, Debug, PartialEq)]
pub struct IdentityUptime {
    pub identity: Identity,
    pub hits: u64,
    pub expected: u64,
    pub percent: f64,
}

impl IdentityUptime {
    pub fn formatted(&self) -> String {
        format_percent(self.percent)
    }
}

/// Uptime calculation over a resolved period.
#[derive(Copy, Clone, Debug)]
pub struct UptimeAnalyzer {
    pub period: PeriodConfig,
    pub sync_period_minutes: u32,
    pub ignore_ips: bool,
}

impl UptimeAnalyzer {
    pub fn new(period: PeriodConfig, sync_period_minutes: u32, ignore_ips: bool) -> Self {
        Self {
            period,
            sync_period_minutes,
            ignore_ips,
        }
    }

    /// Uptime of a single identity, formatted with two decimals.
    pub fn get_uptime(
        &self,
        identity: &Identity,
        submissions: &[Submission],
    ) -> Result<String, AnalyzerError> {
        let uptime = self
            .analyze(submissions)?
            .into_iter()
            .find(|u| u.identity.id == identity.id)
            .map_or(0.0, |u| u.percent);

        Ok(format_percent(uptime))
    }

    /// Uptime of every identity with at least one submission in the period,
    /// in order of first appearance.
    ///
    /// Submissions outside the period are ignored. The rest are replayed in time order.
    pub fn analyze(&self, submissions: &[Submission]) -> Result<Vec<IdentityUptime>, AnalyzerError> {
        let expected = expected_count(self.sync_period_minutes, &self.period)?;

        let mut in_period = submissions
            .iter()
            .filter(|s| self.period.contains(s.submitted_at))
            .collect::<Vec<_>>();
        in_period.sort_by_key(|s| s.submitted_at);

        let mut order = Vec::<Identity>::new();
        let mut timelines = HashMap::<String, Timeline>::new();

        for submission in in_period {
            let identity = Identity::of(submission, self.ignore_ips);

            let timeline = timelines.entry(identity.id.clone()).or_insert_with(|| {
                order.push(identity.clone());
                Timeline::default()
            });

            timeline.observe(submission.submitted_at, self.sync_period_minutes);
        }

        let uptimes = order
            .into_iter()
            .map(|identity| {
                let hits = timelines
                    .get(&identity.id)
                    .copied()
                    .unwrap_or_default()
                    .done();

                IdentityUptime {
                    identity,
                    hits,
                    expected,
                    percent: uptime_percent(hits, expected),
                }
            })
            .collect();

        Ok(uptimes)
    }
}
