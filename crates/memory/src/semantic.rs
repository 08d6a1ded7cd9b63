//! Long-term semantic memory
//!
//! Per-user vector memory behind the [`VectorIndex`] collaborator trait.
//! Every read and delete is scoped to the calling user; the store is the
//! place where that scoping is enforced, not the callers. Writes pass the
//! redaction gate and fail closed on unsafe content.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use concierge_core::{CollaboratorError, Embedder, VectorHit, VectorIndex, VectorRecord};
use concierge_redact::Redactor;

use crate::error::MemoryError;

/// A stored semantic memory, as surfaced to callers (no embedding).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticMemory {
    pub id: String,
    pub user_id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub ts: DateTime<Utc>,
}

impl From<VectorRecord> for SemanticMemory {
    fn from(record: VectorRecord) -> Self {
        Self {
            id: record.id,
            user_id: record.user_id,
            content: record.content,
            metadata: record.metadata,
            ts: record.ts,
        }
    }
}

/// A search hit with its cosine similarity.
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticHit {
    pub memory: SemanticMemory,
    pub score: f32,
}

/// User-scoped semantic memory over a vector index.
pub struct SemanticStore {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    redactor: Arc<Redactor>,
}

impl SemanticStore {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        redactor: Arc<Redactor>,
    ) -> Self {
        Self {
            index,
            embedder,
            redactor,
        }
    }

    /// Store a memory for `user_id`.
    ///
    /// Fails closed with [`MemoryError::UnsafeContent`] when the redactor
    /// finds raw PII: callers must redact before storing. Pre-redacted
    /// content (placeholders only) passes the gate.
    pub async fn upsert(
        &self,
        user_id: &str,
        content: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<SemanticMemory, MemoryError> {
        if !self.redactor.is_safe_for_vector_store(content) {
            tracing::warn!(user_id = %user_id, "semantic upsert refused: unsafe content");
            return Err(MemoryError::UnsafeContent);
        }

        let embedding = self.embedder.embed(content).await?;
        let record = VectorRecord {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            content: content.to_string(),
            embedding,
            metadata,
            ts: Utc::now(),
        };
        self.index.upsert(record.clone()).await?;
        Ok(record.into())
    }

    /// Top-k memories for `user_id` by cosine similarity to `query`.
    pub async fn search(
        &self,
        user_id: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<SemanticHit>, MemoryError> {
        let embedding = self.embedder.embed(query).await?;
        let hits = self.index.search(user_id, &embedding, k).await?;
        Ok(hits
            .into_iter()
            .map(|VectorHit { record, score }| SemanticHit {
                memory: record.into(),
                score,
            })
            .collect())
    }

    /// Every memory stored for `user_id`.
    pub async fn list(&self, user_id: &str) -> Result<Vec<SemanticMemory>, MemoryError> {
        let records = self.index.list(user_id).await?;
        Ok(records.into_iter().map(Into::into).collect())
    }

    /// Delete one memory. Returns whether it existed.
    pub async fn delete(&self, user_id: &str, memory_id: &str) -> Result<bool, MemoryError> {
        Ok(self.index.delete(user_id, memory_id).await?)
    }

    /// Delete everything for `user_id`. Returns the number removed.
    pub async fn delete_all(&self, user_id: &str) -> Result<usize, MemoryError> {
        let removed = self.index.delete_all(user_id).await?;
        tracing::info!(user_id = %user_id, removed, "semantic memories deleted");
        Ok(removed)
    }
}

/// In-process cosine index, the reference [`VectorIndex`].
#[derive(Default)]
pub struct InMemoryVectorIndex {
    rows: DashMap<String, Vec<VectorRecord>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, record: VectorRecord) -> Result<(), CollaboratorError> {
        let mut rows = self.rows.entry(record.user_id.clone()).or_default();
        if let Some(existing) = rows.iter_mut().find(|r| r.id == record.id) {
            *existing = record;
        } else {
            rows.push(record);
        }
        Ok(())
    }

    async fn search(
        &self,
        user_id: &str,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<VectorHit>, CollaboratorError> {
        let mut hits: Vec<VectorHit> = self
            .rows
            .get(user_id)
            .map(|rows| {
                rows.iter()
                    .map(|record| VectorHit {
                        record: record.clone(),
                        score: cosine(embedding, &record.embedding),
                    })
                    .collect()
            })
            .unwrap_or_default();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }

    async fn list(&self, user_id: &str) -> Result<Vec<VectorRecord>, CollaboratorError> {
        Ok(self
            .rows
            .get(user_id)
            .map(|r| r.value().clone())
            .unwrap_or_default())
    }

    async fn delete(&self, user_id: &str, memory_id: &str) -> Result<bool, CollaboratorError> {
        if let Some(mut rows) = self.rows.get_mut(user_id) {
            let before = rows.len();
            rows.retain(|r| r.id != memory_id);
            return Ok(rows.len() < before);
        }
        Ok(false)
    }

    async fn delete_all(&self, user_id: &str) -> Result<usize, CollaboratorError> {
        Ok(self
            .rows
            .remove(user_id)
            .map(|(_, rows)| rows.len())
            .unwrap_or(0))
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Deterministic feature-hashing embedder (d = 384).
///
/// Not a language model: it hashes words into a fixed-dimension vector so
/// that texts sharing vocabulary land near each other. Good enough for
/// the reference index and for tests; production injects a real embedder
/// behind the same trait.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new() -> Self {
        Self { dimension: 384 }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, CollaboratorError> {
        use sha2::{Digest, Sha256};

        let mut vector = vec![0.0f32; self.dimension];
        for word in text.to_lowercase().split_whitespace() {
            let digest = Sha256::digest(word.as_bytes());
            let bucket = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) as usize
                % self.dimension;
            let sign = if digest[4] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concierge_redact::GazetteerRecognizer;

    fn store() -> SemanticStore {
        SemanticStore::new(
            Arc::new(InMemoryVectorIndex::new()),
            Arc::new(HashingEmbedder::new()),
            Arc::new(Redactor::new().with_ner(Arc::new(GazetteerRecognizer::new()))),
        )
    }

    #[tokio::test]
    async fn test_upsert_and_search() {
        let store = store();
        store
            .upsert("u1", "prefers quiet graphics cards", BTreeMap::new())
            .await
            .unwrap();
        store
            .upsert("u1", "lives near the main station", BTreeMap::new())
            .await
            .unwrap();

        let hits = store.search("u1", "quiet graphics cards", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].memory.content.contains("graphics"));
    }

    #[tokio::test]
    async fn test_unsafe_content_fails_closed() {
        let store = store();
        let err = store
            .upsert("u1", "my email is anna@example.ch", BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::UnsafeContent));

        // Nothing was stored.
        assert!(store.list("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pre_redacted_content_passes() {
        let store = store();
        let memory = store
            .upsert("u1", "contact email is [EMAIL]", BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(memory.user_id, "u1");
    }

    #[tokio::test]
    async fn test_user_scoping_never_leaks() {
        let store = store();
        store
            .upsert("u1", "prefers silent fans", BTreeMap::new())
            .await
            .unwrap();
        store
            .upsert("u2", "prefers silent fans", BTreeMap::new())
            .await
            .unwrap();

        let hits = store.search("u1", "silent fans", 10).await.unwrap();
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|h| h.memory.user_id == "u1"));
    }

    #[tokio::test]
    async fn test_delete_and_delete_all() {
        let store = store();
        let m = store
            .upsert("u1", "first note", BTreeMap::new())
            .await
            .unwrap();
        store
            .upsert("u1", "second note", BTreeMap::new())
            .await
            .unwrap();

        assert!(store.delete("u1", &m.id).await.unwrap());
        assert!(!store.delete("u1", &m.id).await.unwrap());
        assert_eq!(store.delete_all("u1").await.unwrap(), 1);
        assert!(store.list("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cross_user_delete_is_scoped() {
        let store = store();
        let m = store
            .upsert("u1", "keep this", BTreeMap::new())
            .await
            .unwrap();

        // Another user cannot delete it.
        assert!(!store.delete("u2", &m.id).await.unwrap());
        assert_eq!(store.list("u1").await.unwrap().len(), 1);
    }
}
