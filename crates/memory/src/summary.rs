//! Rolling summary store
//!
//! Append-only per session. The newest summary supersedes older ones for
//! prompt building, but nothing is ever deleted; old summaries stay for
//! audit. Writes go through to the durable backend before the cache sees
//! them; reads prefer the cache.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use concierge_core::CollaboratorError;

use crate::error::MemoryError;

/// One rolling summary of a stretch of conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub id: String,
    pub session_id: String,
    pub text: String,
    /// Buffer sequence numbers this summary covers.
    pub covered_message_ids: Vec<u64>,
    pub created_at: DateTime<Utc>,
    pub token_estimate: usize,
    /// True when the summarization model was unavailable and the text is
    /// a concatenate-and-truncate fallback.
    #[serde(default)]
    pub degraded: bool,
}

impl Summary {
    pub fn new(session_id: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        let token_estimate = crate::tokens::estimate_tokens(&text);
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            text,
            covered_message_ids: Vec::new(),
            created_at: Utc::now(),
            token_estimate,
            degraded: false,
        }
    }
}

/// Durable backend for summaries.
#[async_trait]
pub trait SummaryBackend: Send + Sync {
    async fn append(&self, summary: &Summary) -> Result<(), CollaboratorError>;

    /// All summaries for a session, oldest first.
    async fn list(&self, session_id: &str) -> Result<Vec<Summary>, CollaboratorError>;
}

/// In-process reference backend.
#[derive(Default)]
pub struct InMemorySummaryBackend {
    rows: DashMap<String, Vec<Summary>>,
}

impl InMemorySummaryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SummaryBackend for InMemorySummaryBackend {
    async fn append(&self, summary: &Summary) -> Result<(), CollaboratorError> {
        self.rows
            .entry(summary.session_id.clone())
            .or_default()
            .push(summary.clone());
        Ok(())
    }

    async fn list(&self, session_id: &str) -> Result<Vec<Summary>, CollaboratorError> {
        Ok(self
            .rows
            .get(session_id)
            .map(|r| r.value().clone())
            .unwrap_or_default())
    }
}

/// Write-through summary store with a read cache.
pub struct SummaryStore {
    backend: Arc<dyn SummaryBackend>,
    cache: DashMap<String, Vec<Summary>>,
}

impl SummaryStore {
    pub fn new(backend: Arc<dyn SummaryBackend>) -> Self {
        Self {
            backend,
            cache: DashMap::new(),
        }
    }

    /// Append a summary. The backend write must succeed before the cache
    /// (and therefore any reader) sees it.
    pub async fn append(&self, summary: Summary) -> Result<(), MemoryError> {
        self.backend.append(&summary).await?;
        self.cache
            .entry(summary.session_id.clone())
            .or_default()
            .push(summary);
        Ok(())
    }

    /// The current (most recent) summary for a session.
    pub async fn current(&self, session_id: &str) -> Result<Option<Summary>, MemoryError> {
        if let Some(cached) = self.cache.get(session_id) {
            return Ok(cached.last().cloned());
        }
        let all = self.backend.list(session_id).await?;
        let current = all.last().cloned();
        self.cache.insert(session_id.to_string(), all);
        Ok(current)
    }

    /// Full summary history, oldest first.
    pub async fn all(&self, session_id: &str) -> Result<Vec<Summary>, MemoryError> {
        Ok(self.backend.list(session_id).await?)
    }
}
