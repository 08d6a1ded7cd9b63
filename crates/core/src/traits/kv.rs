//! Ephemeral key-value collaborator trait

use std::time::Duration;

use async_trait::async_trait;

use crate::error::CollaboratorError;

/// List-oriented ephemeral store (Redis-shaped) backing the message
/// buffer.
#[async_trait]
pub trait EphemeralKv: Send + Sync {
    /// Append to the list at `key`, refreshing its sliding TTL. Returns
    /// the new list length.
    async fn list_push(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<usize, CollaboratorError>;

    /// Drop the oldest `count` elements from the list at `key`.
    async fn list_trim(&self, key: &str, count: usize) -> Result<(), CollaboratorError>;

    /// Read elements `[start, stop)` in insertion order; `stop = usize::MAX`
    /// reads to the end.
    async fn list_range(
        &self,
        key: &str,
        start: usize,
        stop: usize,
    ) -> Result<Vec<String>, CollaboratorError>;

    /// Remaining TTL of `key`, or `None` for a missing key.
    async fn key_ttl(&self, key: &str) -> Result<Option<Duration>, CollaboratorError>;
}
