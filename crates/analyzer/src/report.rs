use core::fmt;
use std::io::Write;

use chrono::{DateTime, SecondsFormat, Utc};
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use tracing::info;

use uptime_config::OutputConfig;

use crate::period::PeriodConfig;
use crate::source::s3_store;
use crate::uptime::IdentityUptime;
use crate::AnalyzerError;

/// Semicolon separated uptime report.
#[derive(Clone, Debug, PartialEq)]
pub struct Report {
    pub period: PeriodConfig,
    pub ignore_ips: bool,
    pub rows: Vec<IdentityUptime>,
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl Report {
    /// `summary_<start>-<end>.csv`
    pub fn file_name(&self) -> String {
        let format = "%Y-%m-%dT%H:%M:%S";
        format!(
            "summary_{}-{}.csv",
            self.period.start.format(format),
            self.period.end.format(format)
        )
    }

    /// Writes the report to every configured output.
    ///
    /// The S3 upload goes to `<s3_key>/<file name>` in `s3_bucket`, using the ambient
    /// AWS credentials. Without a region the one of the AWS environment is used.
    pub async fn publish(
        &self,
        output: &OutputConfig,
        region: Option<&str>,
    ) -> Result<(), AnalyzerError> {
        let contents = self.to_string();

        if output.stdout {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(contents.as_bytes())
                .and_then(|()| stdout.flush())
                .map_err(AnalyzerError::Stdout)?;
        }

        if let Some(path) = &output.local {
            tokio::fs::write(path, &contents)
                .await
                .map_err(|source| AnalyzerError::Io {
                    path: path.clone(),
                    source,
                })?;
            info!(path = %path.display(), "Report written");
        }

        if let Some((bucket, key)) = output.s3() {
            let store = s3_store(region, bucket, None, None)?;
            self.upload(&store, key).await?;
        }

        Ok(())
    }

    /// Uploads the report as `<key_prefix>/<file name>`, returning its location.
    pub async fn upload(
        &self,
        store: &dyn ObjectStore,
        key_prefix: &str,
    ) -> Result<Path, AnalyzerError> {
        let location = Path::from(format!(
            "{}/{}",
            key_prefix.trim_end_matches('/'),
            self.file_name()
        ));

        store
            .put(&location, PutPayload::from(self.to_string()))
            .await?;

        info!(%location, "Report uploaded");
        Ok(location)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let start = timestamp(self.period.start);
        let end = timestamp(self.period.end);
        let interval = self
            .period
            .interval
            .to_std()
            .map(|d| humantime::format_duration(d).to_string())
            .unwrap_or_default();

        if self.ignore_ips {
            writeln!(f, "Period start; {start}")?;
            writeln!(f, "Period end; {end}")?;
            writeln!(f, "Interval; {interval}")?;
            writeln!(f, "public key; uptime (%)")?;

            for row in &self.rows {
                writeln!(f, "{}; {}", row.identity.public_key, row.formatted())?;
            }
        } else {
            writeln!(f, "Period start; {start};")?;
            writeln!(f, "Period end; {end};")?;
            writeln!(f, "Interval; {interval};")?;
            writeln!(f, "public key; public ip; uptime (%)")?;

            for row in &self.rows {
                writeln!(
                    f,
                    "{}; {}; {}",
                    row.identity.public_key,
                    row.identity.public_ip,
                    row.formatted()
                )?;
            }
        }

        Ok(())
    }
}
