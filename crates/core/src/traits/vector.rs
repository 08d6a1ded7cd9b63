//! Vector database and embedding traits

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CollaboratorError;

/// One stored semantic memory row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub user_id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub ts: DateTime<Utc>,
}

/// A search hit with its similarity score.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub record: VectorRecord,
    pub score: f32,
}

/// The vector database.
///
/// Every read and delete is scoped by `user_id`; implementations must
/// never return or touch another user's rows.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, record: VectorRecord) -> Result<(), CollaboratorError>;

    /// Top-k by cosine similarity within the caller's user scope.
    async fn search(
        &self,
        user_id: &str,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<VectorHit>, CollaboratorError>;

    /// Every row in the caller's user scope, for catalog surfaces.
    async fn list(&self, user_id: &str) -> Result<Vec<VectorRecord>, CollaboratorError>;

    /// Returns true when a row was deleted.
    async fn delete(&self, user_id: &str, memory_id: &str) -> Result<bool, CollaboratorError>;

    /// Returns the number of rows deleted.
    async fn delete_all(&self, user_id: &str) -> Result<usize, CollaboratorError>;
}

/// Text embedding seam. The stored dimension is fixed per index.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, CollaboratorError>;
}
