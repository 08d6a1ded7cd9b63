//! Compliance audit log
//!
//! Append-only object storage partitioned by session, date and kind.
//! Writes are fire-and-forget from the hot path: the store enqueues and a
//! background writer drains with retry and a dead-letter buffer. There is
//! no delete anywhere on this surface; retention is a separate job
//! against the backing store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use concierge_core::{CollaboratorError, ObjectStore};

use crate::error::MemoryError;

/// Audit record categories, each with its own key prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    Chat,
    Fsm,
    Contract,
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditArtifact {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub kind: AuditKind,
    /// Contract id, used only for `kind = contract` key layout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_id: Option<String>,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditArtifact {
    pub fn new(session_id: impl Into<String>, kind: AuditKind, payload: serde_json::Value) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: None,
            kind,
            contract_id: None,
            payload,
            created_at: Utc::now(),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_contract(mut self, contract_id: impl Into<String>) -> Self {
        self.contract_id = Some(contract_id.into());
        self
    }

    /// Object-store key for this artifact.
    ///
    /// `chat_logs/{session}/{yyyy/mm/dd}.json`,
    /// `fsm_logs/{session}/{yyyy/mm/dd}.json`,
    /// `contracts/{session}/{contract_id}.json`.
    pub fn key(&self) -> String {
        match self.kind {
            AuditKind::Chat => format!(
                "chat_logs/{}/{}.json",
                self.session_id,
                self.created_at.format("%Y/%m/%d")
            ),
            AuditKind::Fsm => format!(
                "fsm_logs/{}/{}.json",
                self.session_id,
                self.created_at.format("%Y/%m/%d")
            ),
            AuditKind::Contract => format!(
                "contracts/{}/{}.json",
                self.session_id,
                self.contract_id.as_deref().unwrap_or("unknown")
            ),
        }
    }
}

enum WriterCommand {
    Write(AuditArtifact),
    Flush(oneshot::Sender<()>),
}

/// Fire-and-forget audit writer.
pub struct AuditStore {
    tx: mpsc::Sender<WriterCommand>,
    dead_letter: Arc<Mutex<Vec<AuditArtifact>>>,
}

const QUEUE_DEPTH: usize = 1024;
const MAX_ATTEMPTS: u32 = 3;

impl AuditStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        let (tx, mut rx) = mpsc::channel::<WriterCommand>(QUEUE_DEPTH);
        let dead_letter: Arc<Mutex<Vec<AuditArtifact>>> = Arc::new(Mutex::new(Vec::new()));
        let dead_letter_writer = dead_letter.clone();

        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    WriterCommand::Write(artifact) => {
                        if let Err(err) = write_with_retry(store.as_ref(), &artifact).await {
                            tracing::error!(
                                session_id = %artifact.session_id,
                                error = %err,
                                "audit write dead-lettered after retries"
                            );
                            dead_letter_writer.lock().push(artifact);
                        }
                    }
                    WriterCommand::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });

        Self { tx, dead_letter }
    }

    /// Enqueue an artifact. Never blocks and never fails the caller's
    /// turn; a full queue dead-letters immediately.
    pub fn record(&self, artifact: AuditArtifact) {
        if let Err(err) = self.tx.try_send(WriterCommand::Write(artifact)) {
            match err {
                mpsc::error::TrySendError::Full(WriterCommand::Write(artifact)) => {
                    tracing::warn!(
                        session_id = %artifact.session_id,
                        "audit queue full, dead-lettering"
                    );
                    self.dead_letter.lock().push(artifact);
                }
                _ => tracing::error!("audit writer is gone"),
            }
        }
    }

    /// Wait until every enqueued write has been attempted. Test and
    /// shutdown surface, not the hot path.
    pub async fn flush(&self) -> Result<(), MemoryError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(WriterCommand::Flush(done_tx))
            .await
            .map_err(|_| MemoryError::corrupt("audit", "writer task terminated"))?;
        done_rx
            .await
            .map_err(|_| MemoryError::corrupt("audit", "writer task terminated"))?;
        Ok(())
    }

    /// Artifacts that exhausted their retries.
    pub fn dead_letters(&self) -> Vec<AuditArtifact> {
        self.dead_letter.lock().clone()
    }
}

async fn write_with_retry(
    store: &dyn ObjectStore,
    artifact: &AuditArtifact,
) -> Result<(), CollaboratorError> {
    let blob = serde_json::to_vec(artifact)
        .map_err(|e| CollaboratorError::malformed("audit", e.to_string()))?;
    // One artifact per line within the day object.
    let mut line = blob;
    line.push(b'\n');

    let mut backoff = Duration::from_millis(50);
    let mut last_err = None;
    for attempt in 1..=MAX_ATTEMPTS {
        match store.append(&artifact.key(), line.clone()).await {
            Ok(()) => return Ok(()),
            Err(err) => {
                tracing::warn!(attempt, error = %err, "audit append failed");
                last_err = Some(err);
                if attempt < MAX_ATTEMPTS {
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| CollaboratorError::io("audit", "unreachable")))
}

/// In-process reference [`ObjectStore`].
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: DashMap<String, Vec<u8>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn append(&self, key: &str, blob: Vec<u8>) -> Result<(), CollaboratorError> {
        self.objects.entry(key.to_string()).or_default().extend(blob);
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, CollaboratorError> {
        let mut keys: Vec<String> = self
            .objects
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, CollaboratorError> {
        Ok(self.objects.get(key).map(|v| v.value().clone()))
    }
}

/// Object store double that fails a set number of times, for retry tests.
pub struct FlakyObjectStore {
    inner: InMemoryObjectStore,
    failures_left: Mutex<u32>,
}

impl FlakyObjectStore {
    pub fn failing(times: u32) -> Self {
        Self {
            inner: InMemoryObjectStore::new(),
            failures_left: Mutex::new(times),
        }
    }
}

#[async_trait::async_trait]
impl ObjectStore for FlakyObjectStore {
    async fn append(&self, key: &str, blob: Vec<u8>) -> Result<(), CollaboratorError> {
        {
            let mut left = self.failures_left.lock();
            if *left > 0 {
                *left -= 1;
                return Err(CollaboratorError::io("object_store", "transient outage"));
            }
        }
        self.inner.append(key, blob).await
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, CollaboratorError> {
        self.inner.list_keys(prefix).await
    }

    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, CollaboratorError> {
        self.inner.read(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let mut artifact = AuditArtifact::new("s1", AuditKind::Chat, serde_json::json!({}));
        artifact.created_at = "2026-08-01T10:00:00Z".parse().unwrap();
        assert_eq!(artifact.key(), "chat_logs/s1/2026/08/01.json");

        let artifact = AuditArtifact::new("s1", AuditKind::Contract, serde_json::json!({}))
            .with_contract("purchase");
        assert_eq!(artifact.key(), "contracts/s1/purchase.json");
    }

    #[tokio::test]
    async fn test_record_and_flush() {
        let backing = Arc::new(InMemoryObjectStore::new());
        let store = AuditStore::new(backing.clone());

        store.record(AuditArtifact::new(
            "s1",
            AuditKind::Fsm,
            serde_json::json!({"from": "start", "to": "search"}),
        ));
        store.flush().await.unwrap();

        let keys = backing.list_keys("fsm_logs/s1/").await.unwrap();
        assert_eq!(keys.len(), 1);
        let blob = backing.read(&keys[0]).await.unwrap().unwrap();
        assert!(String::from_utf8(blob).unwrap().contains("\"search\""));
    }

    #[tokio::test]
    async fn test_appends_accumulate() {
        let backing = Arc::new(InMemoryObjectStore::new());
        let store = AuditStore::new(backing.clone());

        for i in 0..3 {
            store.record(AuditArtifact::new(
                "s1",
                AuditKind::Chat,
                serde_json::json!({ "turn": i }),
            ));
        }
        store.flush().await.unwrap();

        let keys = backing.list_keys("chat_logs/s1/").await.unwrap();
        let blob = backing.read(&keys[0]).await.unwrap().unwrap();
        let lines = String::from_utf8(blob).unwrap();
        assert_eq!(lines.trim().lines().count(), 3);
    }

    #[tokio::test]
    async fn test_retry_recovers_transient_outage() {
        let backing = Arc::new(FlakyObjectStore::failing(2));
        let store = AuditStore::new(backing.clone());

        store.record(AuditArtifact::new(
            "s1",
            AuditKind::Chat,
            serde_json::json!({}),
        ));
        store.flush().await.unwrap();

        assert!(store.dead_letters().is_empty());
        assert_eq!(backing.list_keys("chat_logs/").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_dead_letter() {
        let backing = Arc::new(FlakyObjectStore::failing(10));
        let store = AuditStore::new(backing);

        store.record(AuditArtifact::new(
            "s1",
            AuditKind::Chat,
            serde_json::json!({}),
        ));
        store.flush().await.unwrap();

        assert_eq!(store.dead_letters().len(), 1);
    }
}
