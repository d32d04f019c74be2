use std::path::{Component, Path, PathBuf};

use tracing::debug;

use uptime_types::ObjectsToSave;

use crate::{SaveReport, StorageError};

/// Writes every artifact to `<root>/<artifact path>`.
///
/// Local failures are not retried.
#[derive(Clone, Debug)]
pub struct FilesystemBackend {
    root: PathBuf,
}

impl FilesystemBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of an artifact under the root. Paths escaping the root are rejected.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(path);

        let inside_root = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));

        if path.is_empty() || !inside_root {
            return Err(StorageError::InvalidPath(path.to_string()));
        }

        Ok(self.root.join(relative))
    }

    pub async fn save(&self, objects: &ObjectsToSave) -> Result<SaveReport, StorageError> {
        let mut report = SaveReport::default();

        for (path, data) in objects {
            let target = self.resolve(path)?;
            let io_error = |source| StorageError::Io {
                path: target.clone(),
                source,
            };

            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
            }

            tokio::fs::write(&target, data).await.map_err(io_error)?;

            debug!(path = %target.display(), size = data.len(), "Stored artifact");
            report.written += 1;
        }

        Ok(report)
    }
}
