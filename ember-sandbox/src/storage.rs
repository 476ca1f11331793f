//! Sinks for harvested files

use crate::error::{Result, SandboxError};
use crate::execution::ExecutionId;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;

/// Destination for files produced by an execution; returns a URL per file.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn store(&self, execution_id: &ExecutionId, name: &str, content: Bytes)
        -> Result<String>;

    fn name(&self) -> &str;
}

/// Writes files under `<root>/<execution_id>/<name>`.
pub struct LocalDirStore {
    root: PathBuf,
    public_base_url: Option<String>,
}

impl LocalDirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            public_base_url: None,
        }
    }

    /// Serve URLs as `<base>/<execution_id>/<name>` instead of `file://` paths.
    pub fn with_public_base_url(mut self, base: impl Into<String>) -> Self {
        self.public_base_url = Some(base.into());
        self
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }
}

#[async_trait]
impl ArtifactStore for LocalDirStore {
    async fn store(
        &self,
        execution_id: &ExecutionId,
        name: &str,
        content: Bytes,
    ) -> Result<String> {
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(SandboxError::Storage(format!("invalid file name '{}'", name)));
        }

        let dir = self.root.join(execution_id.to_string());
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            SandboxError::Storage(format!("cannot create {}: {}", dir.display(), e))
        })?;
        let path = dir.join(name);
        tokio::fs::write(&path, &content).await.map_err(|e| {
            SandboxError::Storage(format!("cannot write {}: {}", path.display(), e))
        })?;

        Ok(match &self.public_base_url {
            Some(base) => format!("{}/{}/{}", base.trim_end_matches('/'), execution_id, name),
            None => format!("file://{}", path.display()),
        })
    }

    fn name(&self) -> &str {
        "local"
    }
}
