// Object store abstraction
//
// The daemon holds no copy of cached objects: every GET and PUT is a live
// round trip through an `ObjectStore`, which must be safe to share across
// concurrent request tasks.

use async_trait::async_trait;
use bytes::Bytes;

pub mod memory;
pub mod s3;

pub use memory::MemoryStore;
pub use s3::S3Store;

/// Boxed error carried by store failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failures reported by an object store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The key does not exist in the bucket
    #[error("no such key: {0}")]
    NotFound(String),

    /// The store answered but the object body could not be collected
    #[error("failed to read object body: {0}")]
    Read(#[source] BoxError),

    /// Any other failure (transport, credentials, permissions, bucket missing)
    #[error("object store error: {0}")]
    Backend(#[source] BoxError),
}

/// Blob store backing the cache, scoped to a single bucket
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch the full object stored at `key`
    async fn get(&self, key: &str) -> Result<Bytes, StoreError>;

    /// Store `body` at `key`, replacing any previous object
    async fn put(&self, key: &str, body: Bytes) -> Result<(), StoreError>;

    /// Check that the bucket exists and is reachable with the current credentials
    async fn head_bucket(&self) -> Result<(), StoreError>;

    /// Name of the bucket this store is bound to
    fn bucket(&self) -> &str;
}
