//! Object storage backends

pub mod filesystem;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

pub use filesystem::FilesystemStore;

/// Object storage trait
///
/// Artifacts live under deterministic keys of the form
/// `{engine}/{target_id}/{timestamp}.{format}`. Backends treat keys as
/// opaque slash-separated paths.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store content under the given key
    async fn put(&self, key: &str, content: Bytes) -> Result<()>;

    /// Retrieve content by key
    async fn get(&self, key: &str) -> Result<Bytes>;

    /// Check whether a key exists
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Delete content by key
    async fn delete(&self, key: &str) -> Result<()>;
}
