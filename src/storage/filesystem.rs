//! Filesystem object storage backend

use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::ObjectStore;
use crate::error::{BackhaulError, Result};

/// Filesystem-based object storage
#[derive(Debug, Clone)]
pub struct FilesystemStore {
    base_path: PathBuf,
}

impl FilesystemStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Map a key to a path under the base directory
    ///
    /// Keys are slash-separated; path traversal segments are rejected.
    fn key_to_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
            return Err(BackhaulError::Storage(format!("Invalid object key: {}", key)));
        }
        Ok(self.base_path.join(key))
    }
}

#[async_trait]
impl ObjectStore for FilesystemStore {
    async fn put(&self, key: &str, content: Bytes) -> Result<()> {
        let path = self.key_to_path(key)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| BackhaulError::Storage(format!("Failed to create {}: {}", key, e)))?;
        }

        let mut file = fs::File::create(&path)
            .await
            .map_err(|e| BackhaulError::Storage(format!("Failed to create {}: {}", key, e)))?;
        file.write_all(&content)
            .await
            .map_err(|e| BackhaulError::Storage(format!("Failed to write {}: {}", key, e)))?;
        file.sync_all()
            .await
            .map_err(|e| BackhaulError::Storage(format!("Failed to sync {}: {}", key, e)))?;

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let path = self.key_to_path(key)?;
        let content = fs::read(&path)
            .await
            .map_err(|e| BackhaulError::Storage(format!("Failed to read {}: {}", key, e)))?;
        Ok(Bytes::from(content))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.key_to_path(key)?;
        Ok(path.exists())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.key_to_path(key)?;
        fs::remove_file(&path)
            .await
            .map_err(|e| BackhaulError::Storage(format!("Failed to delete {}: {}", key, e)))?;
        Ok(())
    }
}
