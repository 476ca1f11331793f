//! File extraction: limits enforcement and publication to storage

use crate::config::StorageSettings;
use crate::error::SandboxError;
use crate::execution::ExecutionId;
use crate::limits::{is_ignored, FileLimits};
use crate::storage::{ArtifactStore, LocalDirStore};
use crate::types::{Artifact, DropReason, DroppedFile};
use ember_common::list_output_files;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Files published for one execution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Published {
    /// URLs in the order the files were harvested
    pub urls: Vec<String>,
    pub dropped: Vec<DroppedFile>,
}

/// Applies file limits to harvested artifacts and hands them to storage.
#[derive(Clone)]
pub struct FileExtractor {
    limits: FileLimits,
    store: Option<Arc<dyn ArtifactStore>>,
}

impl FileExtractor {
    pub fn new(limits: FileLimits, store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            limits,
            store: Some(store),
        }
    }

    /// Extractor that publishes nothing; executors skip harvesting entirely.
    pub fn disabled(limits: FileLimits) -> Self {
        Self {
            limits,
            store: None,
        }
    }

    pub fn from_settings(settings: &StorageSettings, limits: FileLimits) -> Self {
        if !settings.enabled {
            return Self::disabled(limits);
        }
        let mut store = LocalDirStore::new(&settings.root);
        if let Some(base) = &settings.public_base_url {
            store = store.with_public_base_url(base);
        }
        Self::new(limits, Arc::new(store))
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    pub fn limits(&self) -> &FileLimits {
        &self.limits
    }

    /// Publish `artifacts`, re-checking limits against their actual sizes.
    pub async fn publish(&self, execution_id: &ExecutionId, artifacts: Vec<Artifact>) -> Published {
        let mut published = Published::default();
        let Some(store) = &self.store else {
            return published;
        };

        let mut budget = self.limits.budget();
        for artifact in artifacts {
            let size = artifact.size();
            if is_ignored(&artifact.name, size) {
                continue;
            }
            if let Err(reason) = budget.admit(size) {
                let error = SandboxError::FileLimitExceeded {
                    name: artifact.name.clone(),
                    reason,
                };
                warn!(execution_id = %execution_id, error = %error, "dropping produced file");
                published
                    .dropped
                    .push(DroppedFile::new(artifact.name, Some(size), reason));
                continue;
            }

            match store.store(execution_id, &artifact.name, artifact.content).await {
                Ok(url) => {
                    debug!(execution_id = %execution_id, file = %artifact.name, size, "file stored");
                    published.urls.push(url);
                }
                Err(e) => {
                    warn!(
                        execution_id = %execution_id,
                        file = %artifact.name,
                        store = store.name(),
                        error = %e,
                        "failed to store produced file"
                    );
                    published.dropped.push(DroppedFile::new(
                        artifact.name,
                        Some(size),
                        DropReason::StorageFailed,
                    ));
                }
            }
        }

        published
    }
}

/// Harvest a host directory that served as a sandbox's output directory.
pub async fn collect_output_dir(
    dir: &Path,
    limits: &FileLimits,
) -> (Vec<Artifact>, Vec<DroppedFile>) {
    let entries = match list_output_files(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "cannot list output directory");
            return (Vec::new(), Vec::new());
        }
    };

    let (accepted, mut dropped) = limits.select(entries);
    let mut artifacts = Vec::with_capacity(accepted.len());
    for entry in accepted {
        match tokio::fs::read(dir.join(&entry.name)).await {
            Ok(content) => artifacts.push(Artifact::new(entry.name, content)),
            Err(e) => {
                warn!(file = %entry.name, error = %e, "cannot read produced file");
                dropped.push(DroppedFile::new(
                    entry.name,
                    Some(entry.size),
                    DropReason::TransferFailed,
                ));
            }
        }
    }
    (artifacts, dropped)
}
