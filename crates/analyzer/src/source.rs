use std::sync::Arc;

use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::path::Path;
use object_store::ObjectStore;
use tracing::{debug, warn};

use uptime_config::SourceConfig;
use uptime_types::path::SUBMITTED_AT_DATE_FORMAT;
use uptime_types::{parse_submission, Submission, SubmissionPath, SUBMISSIONS_PREFIX};

use crate::period::PeriodConfig;
use crate::AnalyzerError;

/// Read access to the submissions written by the ingestion service.
#[derive(Debug)]
pub struct SubmissionSource {
    store: Arc<dyn ObjectStore>,
    prefix: Option<String>,
}

impl SubmissionSource {
    /// `prefix` is the key prefix under which artifact paths are stored, if any.
    pub fn new(store: Arc<dyn ObjectStore>, prefix: Option<String>) -> Self {
        Self {
            store,
            prefix: prefix.filter(|p| !p.is_empty()),
        }
    }

    /// The network's bucket, or the root directory of the filesystem backend.
    pub fn open(config: &SourceConfig, network_name: &str) -> Result<Self, AnalyzerError> {
        match config {
            SourceConfig::S3 {
                region,
                account_id,
                bucket_name_suffix,
                access_key_id,
                secret_access_key,
                endpoint,
            } => {
                let store = s3_store(
                    Some(region.as_str()),
                    &format!("{account_id}-{bucket_name_suffix}"),
                    access_key_id.as_deref().zip(secret_access_key.as_deref()),
                    endpoint.as_deref(),
                )?;
                Ok(Self::new(Arc::new(store), Some(network_name.to_string())))
            }
            SourceConfig::Local { path } => {
                let store = LocalFileSystem::new_with_prefix(path)?;
                Ok(Self::new(Arc::new(store), None))
            }
        }
    }

    fn key(&self, path: &str) -> Path {
        match &self.prefix {
            Some(prefix) => Path::from(format!("{prefix}/{path}")),
            None => Path::from(path),
        }
    }

    fn artifact_path<'a>(&self, key: &'a str) -> &'a str {
        self.prefix
            .as_deref()
            .and_then(|prefix| key.strip_prefix(prefix))
            .map_or(key, |rest| rest.trim_start_matches('/'))
    }

    /// Every submission stored for a day the period touches and made within the period,
    /// in time order.
    ///
    /// Listings are consumed to the end however many pages they span. Artifacts that
    /// cannot be read back as submissions are logged and skipped.
    pub async fn submissions(&self, period: &PeriodConfig) -> Result<Vec<Submission>, AnalyzerError> {
        let mut submissions = Vec::new();

        for day in period.days() {
            let day_prefix = self.key(&format!(
                "{SUBMISSIONS_PREFIX}{}",
                day.format(SUBMITTED_AT_DATE_FORMAT)
            ));

            let listing = self
                .store
                .list(Some(&day_prefix))
                .try_collect::<Vec<_>>()
                .await?;

            debug!(prefix = %day_prefix, objects = listing.len(), "Listed submissions");

            for meta in listing {
                let key = meta.location.to_string();
                let path = self.artifact_path(&key);

                let submitted_at = match SubmissionPath::parse(path) {
                    Ok(parsed) => parsed.submitted_at,
                    Err(e) => {
                        warn!(%key, "Skipping artifact with unexpected name: {e}");
                        continue;
                    }
                };

                if !period.contains(submitted_at) {
                    continue;
                }

                let data = self.store.get(&meta.location).await?.bytes().await?;

                match parse_submission(&data, path) {
                    Ok(submission) => submissions.push(submission),
                    Err(e) => warn!(%key, "Skipping unreadable submission: {e}"),
                }
            }
        }

        submissions.sort_by(|a, b| {
            a.submitted_at
                .cmp(&b.submitted_at)
                .then_with(|| a.submitter.cmp(&b.submitter))
        });

        Ok(submissions)
    }
}

/// S3 bucket, with static credentials if given, the ambient AWS environment otherwise.
pub fn s3_store(
    region: Option<&str>,
    bucket: &str,
    credentials: Option<(&str, &str)>,
    endpoint: Option<&str>,
) -> Result<impl ObjectStore, AnalyzerError> {
    let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);

    if let Some(region) = region {
        builder = builder.with_region(region);
    }

    if let Some((key_id, secret)) = credentials {
        builder = builder
            .with_access_key_id(key_id)
            .with_secret_access_key(secret);
    }

    if let Some(endpoint) = endpoint {
        builder = builder.with_endpoint(endpoint).with_allow_http(true);
    }

    Ok(builder.build()?)
}
