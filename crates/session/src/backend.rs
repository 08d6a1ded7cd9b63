//! In-process transactional backend
//!
//! Reference implementation of the [`SessionBackend`] collaborator: a
//! map of committed rows plus single-row transactions that buffer the
//! write until commit. Production swaps in a relational adapter behind
//! the same trait.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use concierge_core::{CollaboratorError, SessionBackend, SessionTxn, StoredSession};

/// In-memory committed rows.
#[derive(Default)]
pub struct InMemorySessionBackend {
    rows: Arc<DashMap<String, StoredSession>>,
}

impl InMemorySessionBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed row count, for tests.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

struct InMemoryTxn {
    rows: Arc<DashMap<String, StoredSession>>,
    session_id: String,
    pending: Option<StoredSession>,
}

#[async_trait]
impl SessionTxn for InMemoryTxn {
    async fn write(&mut self, row: StoredSession) -> Result<(), CollaboratorError> {
        if row.session_id != self.session_id {
            return Err(CollaboratorError::io(
                "session_backend",
                "transaction is scoped to another session",
            ));
        }
        self.pending = Some(row);
        Ok(())
    }

    async fn read_back(&mut self) -> Result<Option<StoredSession>, CollaboratorError> {
        // The row as this transaction would commit it.
        Ok(self
            .pending
            .clone()
            .or_else(|| self.rows.get(&self.session_id).map(|r| r.value().clone())))
    }

    async fn commit(self: Box<Self>) -> Result<(), CollaboratorError> {
        if let Some(row) = self.pending {
            self.rows.insert(self.session_id, row);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

#[async_trait]
impl SessionBackend for InMemorySessionBackend {
    async fn fetch(&self, session_id: &str) -> Result<Option<StoredSession>, CollaboratorError> {
        Ok(self.rows.get(session_id).map(|r| r.value().clone()))
    }

    async fn begin(&self, session_id: &str) -> Result<Box<dyn SessionTxn>, CollaboratorError> {
        Ok(Box::new(InMemoryTxn {
            rows: self.rows.clone(),
            session_id: session_id.to_string(),
            pending: None,
        }))
    }
}
