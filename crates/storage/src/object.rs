use std::sync::Arc;

use object_store::aws::AmazonS3Builder;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use tracing::{debug, warn};

use uptime_config::ObjectStoreConfig;
use uptime_retry::{retry, Budget};
use uptime_types::{ObjectsToSave, BLOCKS_PREFIX};

use crate::{SaveReport, StorageError};

/// Writes every artifact verbatim to `<prefix>/<artifact path>`.
#[derive(Debug)]
pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    max_block_size: usize,
}

impl ObjectStoreBackend {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>, max_block_size: usize) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            max_block_size,
        }
    }

    /// S3 bucket `<account_id>-<bucket_name_suffix>`, keys prefixed by the network name.
    ///
    /// Static credentials are used when configured, otherwise the ambient AWS environment.
    pub fn connect(
        config: &ObjectStoreConfig,
        network_name: &str,
        max_block_size: usize,
    ) -> Result<Self, StorageError> {
        let mut builder = AmazonS3Builder::from_env()
            .with_region(&config.region)
            .with_bucket_name(config.bucket_name());

        if let (Some(key_id), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            builder = builder
                .with_access_key_id(key_id)
                .with_secret_access_key(secret);
        }

        if let Some(endpoint) = &config.endpoint {
            builder = builder.with_endpoint(endpoint).with_allow_http(true);
        }

        let store = builder.build().map_err(|e| StorageError::Connect {
            backend: "object_store",
            message: e.to_string(),
        })?;

        Ok(Self::new(Arc::new(store), network_name, max_block_size))
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Full key of an artifact.
    pub fn key(&self, path: &str) -> Path {
        if self.prefix.is_empty() {
            Path::from(path)
        } else {
            Path::from(format!("{}/{path}", self.prefix))
        }
    }

    pub async fn save(&self, objects: &ObjectsToSave) -> Result<SaveReport, StorageError> {
        let mut report = SaveReport::default();

        for (path, data) in objects {
            if path.starts_with(BLOCKS_PREFIX) && data.len() > self.max_block_size {
                warn!(
                    %path,
                    size = data.len(),
                    max = self.max_block_size,
                    "Block exceeds the maximum size, it will not fit in wide-column storage"
                );
                report.oversized_blocks += 1;
            }

            let key = self.key(path);

            retry(Budget::STORAGE, || {
                self.store.put(&key, PutPayload::from(data.clone()))
            })
            .await?;

            debug!(%key, size = data.len(), "Stored artifact");
            report.written += 1;
        }

        Ok(report)
    }
}
