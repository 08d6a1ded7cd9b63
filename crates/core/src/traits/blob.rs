//! Append-only object store trait

use async_trait::async_trait;

use crate::error::CollaboratorError;

/// The compliance object store.
///
/// Append-only by construction: there is no delete on this trait.
/// Retention runs as a separate job against the backing store, outside
/// application code.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Append a blob under `key`. Repeated appends to the same key
    /// accumulate; they never overwrite.
    async fn append(&self, key: &str, blob: Vec<u8>) -> Result<(), CollaboratorError>;

    /// Keys under a prefix, for export surfaces.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, CollaboratorError>;

    /// Read the accumulated blobs under `key`, concatenated in append
    /// order. `None` for an absent key.
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, CollaboratorError>;
}
