//! Ephemeral message buffer
//!
//! Per-session ordered window of recent messages over the ephemeral KV
//! collaborator. The store never trims on its own: when a cap is
//! exceeded, the append reports overflow and the orchestrator decides
//! when to summarize and trim. That ordering is what guarantees no
//! message is lost between summary and trim.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use concierge_config::BufferSettings;
use concierge_core::{EphemeralKv, Message};

use crate::error::MemoryError;
use crate::tokens::estimate_tokens;

/// A buffered message with its per-session sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferedMessage {
    pub seq: u64,
    #[serde(flatten)]
    pub message: Message,
}

/// Result of an append, reporting cap state to the caller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AppendOutcome {
    /// A cap (messages or tokens) is exceeded after this append.
    pub overflow: bool,
    /// Estimated tokens beyond the configured cap.
    pub excess_tokens: usize,
    /// Sequence number assigned to the appended message.
    pub seq: u64,
}

/// Ephemeral per-session message window.
pub struct BufferStore {
    kv: Arc<dyn EphemeralKv>,
    settings: BufferSettings,
}

impl BufferStore {
    pub fn new(kv: Arc<dyn EphemeralKv>, settings: BufferSettings) -> Self {
        Self { kv, settings }
    }

    fn key(session_id: &str) -> String {
        format!("buffer:{}", session_id)
    }

    async fn read_all(&self, session_id: &str) -> Result<Vec<BufferedMessage>, MemoryError> {
        let raw = self
            .kv
            .list_range(&Self::key(session_id), 0, usize::MAX)
            .await?;
        raw.iter()
            .map(|item| {
                serde_json::from_str(item)
                    .map_err(|e| MemoryError::corrupt("buffer", e.to_string()))
            })
            .collect()
    }

    /// Append a message, returning the cap state. Never trims.
    pub async fn append(
        &self,
        session_id: &str,
        message: Message,
    ) -> Result<AppendOutcome, MemoryError> {
        let existing = self.read_all(session_id).await?;
        let seq = existing.last().map(|m| m.seq + 1).unwrap_or(1);

        let buffered = BufferedMessage { seq, message };
        let encoded = serde_json::to_string(&buffered)
            .map_err(|e| MemoryError::corrupt("buffer", e.to_string()))?;
        let len = self
            .kv
            .list_push(&Self::key(session_id), encoded, self.settings.ttl())
            .await?;

        let tokens: usize = existing
            .iter()
            .map(|m| estimate_tokens(&m.message.content))
            .sum::<usize>()
            + estimate_tokens(&buffered.message.content);

        let overflow = len > self.settings.max_messages || tokens > self.settings.max_tokens;
        let outcome = AppendOutcome {
            overflow,
            excess_tokens: tokens.saturating_sub(self.settings.max_tokens),
            seq,
        };
        if overflow {
            tracing::debug!(
                session_id = %session_id,
                messages = len,
                tokens,
                "buffer overflow signalled"
            );
        }
        Ok(outcome)
    }

    /// Most recent `n` messages in insertion order.
    pub async fn tail(&self, session_id: &str, n: usize) -> Result<Vec<Message>, MemoryError> {
        let all = self.read_all(session_id).await?;
        let start = all.len().saturating_sub(n);
        Ok(all[start..].iter().map(|m| m.message.clone()).collect())
    }

    /// Oldest `k` messages with their sequence numbers, for the
    /// summarizer.
    pub async fn oldest(
        &self,
        session_id: &str,
        k: usize,
    ) -> Result<Vec<BufferedMessage>, MemoryError> {
        let all = self.read_all(session_id).await?;
        Ok(all.into_iter().take(k).collect())
    }

    /// Estimated token total for the session.
    pub async fn token_count(&self, session_id: &str) -> Result<usize, MemoryError> {
        let all = self.read_all(session_id).await?;
        Ok(all
            .iter()
            .map(|m| estimate_tokens(&m.message.content))
            .sum())
    }

    pub async fn len(&self, session_id: &str) -> Result<usize, MemoryError> {
        Ok(self.read_all(session_id).await?.len())
    }

    /// Drop the oldest `k` messages. Called only after the covering
    /// summary is durable.
    pub async fn trim_oldest(&self, session_id: &str, k: usize) -> Result<(), MemoryError> {
        self.kv.list_trim(&Self::key(session_id), k).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKv;
    use concierge_core::Role;

    fn store_with_caps(max_messages: usize, max_tokens: usize) -> BufferStore {
        BufferStore::new(
            Arc::new(InMemoryKv::new()),
            BufferSettings {
                max_messages,
                max_tokens,
                ttl_secs: 3600,
            },
        )
    }

    #[tokio::test]
    async fn test_append_and_tail_order() {
        let store = store_with_caps(30, 4000);
        for i in 0..5 {
            store
                .append("s1", Message::user(format!("message {}", i)))
                .await
                .unwrap();
        }

        let tail = store.tail("s1", 2).await.unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].content, "message 3");
        assert_eq!(tail[1].content, "message 4");
    }

    #[tokio::test]
    async fn test_overflow_on_message_cap() {
        let store = store_with_caps(3, 100_000);
        for i in 0..3 {
            let outcome = store
                .append("s1", Message::user(format!("m{}", i)))
                .await
                .unwrap();
            assert!(!outcome.overflow);
        }
        let outcome = store.append("s1", Message::user("m3")).await.unwrap();
        assert!(outcome.overflow);

        // Nothing was trimmed behind the caller's back.
        assert_eq!(store.len("s1").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_overflow_reports_excess_tokens() {
        let store = store_with_caps(100, 10);
        let long = "word ".repeat(40);
        let outcome = store.append("s1", Message::user(long)).await.unwrap();
        assert!(outcome.overflow);
        assert!(outcome.excess_tokens > 0);
    }

    #[tokio::test]
    async fn test_oldest_and_trim() {
        let store = store_with_caps(30, 4000);
        for i in 0..6 {
            store
                .append("s1", Message::new(Role::User, format!("m{}", i)))
                .await
                .unwrap();
        }

        let oldest = store.oldest("s1", 2).await.unwrap();
        assert_eq!(oldest[0].message.content, "m0");
        assert_eq!(oldest[0].seq, 1);

        store.trim_oldest("s1", 2).await.unwrap();
        let tail = store.tail("s1", 10).await.unwrap();
        assert_eq!(tail.len(), 4);
        assert_eq!(tail[0].content, "m2");
    }

    #[tokio::test]
    async fn test_sequence_numbers_monotonic() {
        let store = store_with_caps(30, 4000);
        let a = store.append("s1", Message::user("a")).await.unwrap();
        let b = store.append("s1", Message::user("b")).await.unwrap();
        assert!(b.seq > a.seq);

        // Sessions do not share sequences.
        let other = store.append("s2", Message::user("x")).await.unwrap();
        assert_eq!(other.seq, 1);
    }
}
