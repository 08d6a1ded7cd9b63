//! Durable relational store traits
//!
//! The session store persists contexts through this seam. The protocol is
//! deliberately transactional: write, read back, then commit. The
//! read-back inside the open transaction is what catches a second writer
//! before anything becomes visible.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CollaboratorError;

/// The `sessions` row as the durable store sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSession {
    pub session_id: String,
    pub user_id: Option<String>,
    /// Denormalized from the context for cheap read-back comparison.
    pub state: String,
    pub context_blob: String,
    pub schema_version: u32,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// An open transaction on one session row.
#[async_trait]
pub trait SessionTxn: Send {
    async fn write(&mut self, row: StoredSession) -> Result<(), CollaboratorError>;

    /// Read the row as this transaction would commit it.
    async fn read_back(&mut self) -> Result<Option<StoredSession>, CollaboratorError>;

    async fn commit(self: Box<Self>) -> Result<(), CollaboratorError>;

    async fn rollback(self: Box<Self>) -> Result<(), CollaboratorError>;
}

/// The durable relational store, keyed by `session_id`.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Read the committed row outside any transaction.
    async fn fetch(&self, session_id: &str) -> Result<Option<StoredSession>, CollaboratorError>;

    /// Open a transaction scoped to one session row.
    async fn begin(&self, session_id: &str) -> Result<Box<dyn SessionTxn>, CollaboratorError>;
}
