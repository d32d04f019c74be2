//! Uptime analysis over the submissions stored by the ingestion service.
//!
//! An analysis run resolves the observation window, reads back every submission
//! made within it, groups the submissions into identities and reports, for each
//! identity, the share of expected submissions that actually arrived on time.

use std::path::PathBuf;

use tracing::info;

use uptime_config::AnalyzerConfig;

pub mod identity;
pub mod period;
pub mod report;
pub mod source;
pub mod uptime;

pub use identity::Identity;
pub use period::{resolve_period, PeriodConfig, PeriodError};
pub use report::Report;
pub use source::SubmissionSource;
pub use uptime::{expected_count, uptime_percent, IdentityUptime, Timeline, UptimeAnalyzer};

#[derive(Debug, thiserror::Error)]
pub enum AnalyzerError {
    #[error("Invalid period: {0}")]
    Period(#[from] PeriodError),

    #[error("The period is too short for the sync period, no submission is expected")]
    ZeroExpectedCount,

    #[error("Storage access failed: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write to stdout: {0}")]
    Stdout(std::io::Error),
}

/// Runs one analysis as configured, with the window resolved against the current time.
pub async fn run(config: &AnalyzerConfig) -> Result<Report, AnalyzerError> {
    let period = PeriodConfig::resolve(&config.period)?;
    let source = SubmissionSource::open(&config.source, &config.network_name)?;

    analyze(&source, period, config.sync_period_minutes, config.ignore_ips).await
}

/// Reads back the submissions of the period and computes every identity's uptime.
pub async fn analyze(
    source: &SubmissionSource,
    period: PeriodConfig,
    sync_period_minutes: u32,
    ignore_ips: bool,
) -> Result<Report, AnalyzerError> {
    let analyzer = UptimeAnalyzer::new(period, sync_period_minutes, ignore_ips);

    // Fail before reading anything back
    expected_count(sync_period_minutes, &period)?;

    info!(
        start = %period.start,
        end = %period.end,
        sync_period_minutes,
        ignore_ips,
        "Analyzing uptime"
    );

    let submissions = source.submissions(&period).await?;
    let rows = analyzer.analyze(&submissions)?;

    info!(
        submissions = submissions.len(),
        identities = rows.len(),
        "Analysis complete"
    );

    Ok(Report {
        period,
        ignore_ips,
        rows,
    })
}
