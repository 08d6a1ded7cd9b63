//! In-process ephemeral KV
//!
//! Reference implementation of the [`EphemeralKv`] collaborator trait:
//! per-key lists with a sliding TTL, the shape a Redis adapter would
//! expose. Expiry is lazy: a key past its TTL reads as absent and is
//! dropped on next touch.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use concierge_core::{CollaboratorError, EphemeralKv};

struct ListEntry {
    items: VecDeque<String>,
    expires_at: Instant,
}

/// In-memory list store with per-key TTL.
#[derive(Default)]
pub struct InMemoryKv {
    lists: DashMap<String, ListEntry>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn drop_if_expired(&self, key: &str) {
        let expired = self
            .lists
            .get(key)
            .map(|e| e.expires_at <= Instant::now())
            .unwrap_or(false);
        if expired {
            self.lists.remove(key);
        }
    }
}

#[async_trait]
impl EphemeralKv for InMemoryKv {
    async fn list_push(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<usize, CollaboratorError> {
        self.drop_if_expired(key);
        let mut entry = self.lists.entry(key.to_string()).or_insert_with(|| ListEntry {
            items: VecDeque::new(),
            expires_at: Instant::now() + ttl,
        });
        entry.items.push_back(value);
        // Sliding TTL: every append refreshes the window.
        entry.expires_at = Instant::now() + ttl;
        Ok(entry.items.len())
    }

    async fn list_trim(&self, key: &str, count: usize) -> Result<(), CollaboratorError> {
        self.drop_if_expired(key);
        if let Some(mut entry) = self.lists.get_mut(key) {
            for _ in 0..count.min(entry.items.len()) {
                entry.items.pop_front();
            }
        }
        Ok(())
    }

    async fn list_range(
        &self,
        key: &str,
        start: usize,
        stop: usize,
    ) -> Result<Vec<String>, CollaboratorError> {
        self.drop_if_expired(key);
        Ok(self
            .lists
            .get(key)
            .map(|entry| {
                entry
                    .items
                    .iter()
                    .skip(start)
                    .take(stop.saturating_sub(start))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn key_ttl(&self, key: &str) -> Result<Option<Duration>, CollaboratorError> {
        self.drop_if_expired(key);
        Ok(self
            .lists
            .get(key)
            .map(|entry| entry.expires_at.saturating_duration_since(Instant::now())))
    }
}
