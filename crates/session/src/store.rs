//! The session store

use std::sync::Arc;
use std::time::Instant;

use chrono::Duration as ChronoDuration;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use concierge_config::{SearchSettings, SessionSettings};
use concierge_core::{
    constraint, ContractState, SessionBackend, SessionContext, StoredSession,
    CONTEXT_SCHEMA_VERSION,
};

use crate::error::SessionError;

/// Upgrades a serialized context from an older schema version to the
/// current one.
pub trait SchemaUpgrader: Send + Sync {
    fn upgrade(
        &self,
        value: serde_json::Value,
        from_version: u32,
    ) -> Result<serde_json::Value, SessionError>;
}

struct CachedContext {
    ctx: SessionContext,
    cached_at: Instant,
}

/// Sole writer of session contexts.
///
/// Concurrency discipline: callers serialize turns per session through
/// [`SessionStore::lock`]; cross-session operations run in parallel. The
/// in-process cache is refreshed inside the lock on commit, so a reader
/// that has taken the lock never sees a stale context.
pub struct SessionStore {
    backend: Arc<dyn SessionBackend>,
    upgrader: Option<Arc<dyn SchemaUpgrader>>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    cache: DashMap<String, CachedContext>,
    settings: SessionSettings,
    search_settings: SearchSettings,
}

impl SessionStore {
    pub fn new(
        backend: Arc<dyn SessionBackend>,
        settings: SessionSettings,
        search_settings: SearchSettings,
    ) -> Self {
        Self {
            backend,
            upgrader: None,
            locks: DashMap::new(),
            cache: DashMap::new(),
            settings,
            search_settings,
        }
    }

    pub fn with_upgrader(mut self, upgrader: Arc<dyn SchemaUpgrader>) -> Self {
        self.upgrader = Some(upgrader);
        self
    }

    /// Acquire the per-session mutex. At most one turn-worker holds it
    /// per session at any time.
    pub async fn lock(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    /// Load a session context, preferring the cache within its TTL.
    /// For reads outside the per-session lock.
    pub async fn load(&self, session_id: &str) -> Result<Option<SessionContext>, SessionError> {
        if let Some(cached) = self.cache.get(session_id) {
            if cached.cached_at.elapsed() < self.settings.cache_ttl() {
                return Ok(Some(cached.ctx.clone()));
            }
        }
        self.load_fresh(session_id).await
    }

    /// Load straight from storage, refreshing the cache. Callers holding
    /// the per-session lock use this so the turn never starts from a
    /// stale cache entry.
    pub async fn load_fresh(
        &self,
        session_id: &str,
    ) -> Result<Option<SessionContext>, SessionError> {
        let Some(row) = self.backend.fetch(session_id).await? else {
            return Ok(None);
        };
        let ctx = self.decode(row)?;
        self.cache.insert(
            session_id.to_string(),
            CachedContext {
                ctx: ctx.clone(),
                cached_at: Instant::now(),
            },
        );
        Ok(Some(ctx))
    }

    /// Atomic save: validate, write, read back, commit, cache.
    ///
    /// A read-back mismatch is retried once; a second mismatch surfaces
    /// as [`SessionError::Conflict`].
    pub async fn save(&self, ctx: &SessionContext) -> Result<(), SessionError> {
        // S1: invariants. Nothing is written on failure.
        self.validate(ctx)?;

        let mut ctx = ctx.clone();
        ctx.touch();

        if self.try_save(&ctx).await? {
            self.cache_commit(&ctx);
            return Ok(());
        }
        tracing::warn!(
            session_id = %ctx.session_id,
            "read-back mismatch on save, retrying once"
        );
        if self.try_save(&ctx).await? {
            self.cache_commit(&ctx);
            return Ok(());
        }

        tracing::error!(
            session_id = %ctx.session_id,
            "read-back mismatch persists: second writer suspected"
        );
        Err(SessionError::Conflict {
            session_id: ctx.session_id.clone(),
        })
    }

    /// S6: refresh the cache only after the commit.
    fn cache_commit(&self, ctx: &SessionContext) {
        self.cache.insert(
            ctx.session_id.clone(),
            CachedContext {
                ctx: ctx.clone(),
                cached_at: Instant::now(),
            },
        );
    }

    /// One write/read-back/commit round. `Ok(false)` is a mismatch that
    /// was rolled back.
    async fn try_save(&self, ctx: &SessionContext) -> Result<bool, SessionError> {
        let blob = serde_json::to_string(ctx).map_err(|e| SessionError::Corrupt(e.to_string()))?;
        let row = StoredSession {
            session_id: ctx.session_id.clone(),
            user_id: ctx.user_id.clone(),
            state: ctx.state.as_str().to_string(),
            context_blob: blob,
            schema_version: ctx.schema_version,
            updated_at: ctx.updated_at,
            expires_at: ctx.updated_at
                + ChronoDuration::from_std(self.settings.retention())
                    .unwrap_or_else(|_| ChronoDuration::hours(24)),
        };

        // S2 + S3: open the transaction and write.
        let mut txn = self.backend.begin(&ctx.session_id).await?;
        txn.write(row).await?;

        // S4: read back and compare the fields the historical defect
        // corrupted.
        let matches = match txn.read_back().await? {
            Some(back) => {
                let decoded: Result<SessionContext, _> = serde_json::from_str(&back.context_blob);
                match decoded {
                    Ok(decoded) => {
                        back.state == ctx.state.as_str()
                            && decoded.state == ctx.state
                            && decoded.refinement_attempts == ctx.refinement_attempts
                            && decoded.search_results.len() == ctx.search_results.len()
                    }
                    Err(_) => false,
                }
            }
            None => false,
        };

        if !matches {
            txn.rollback().await?;
            return Ok(false);
        }

        // S5: commit.
        txn.commit().await?;
        Ok(true)
    }

    /// Lock, load (or create), mutate, save. For callers whose mutation
    /// is synchronous. The CSM loop drives lock/load/save itself.
    pub async fn with_session<F, T>(
        &self,
        session_id: &str,
        user_id: Option<String>,
        mutate: F,
    ) -> Result<T, SessionError>
    where
        F: FnOnce(&mut SessionContext) -> T,
    {
        let _guard = self.lock(session_id).await;
        let mut ctx = self
            .load_fresh(session_id)
            .await?
            .unwrap_or_else(|| SessionContext::new(session_id, user_id));
        let result = mutate(&mut ctx);
        self.save(&ctx).await?;
        Ok(result)
    }

    /// Validate invariants I1–I5. I1 (closed state enum) is enforced by
    /// the type; the rest are checked here.
    fn validate(&self, ctx: &SessionContext) -> Result<(), SessionError> {
        if ctx.session_id.is_empty() {
            return Err(SessionError::Validation("empty session_id".to_string()));
        }

        if ctx.schema_version > CONTEXT_SCHEMA_VERSION {
            return Err(SessionError::SchemaVersion {
                found: ctx.schema_version,
                supported: CONTEXT_SCHEMA_VERSION,
            });
        }

        // I2: serialization round-trips losslessly.
        let json = serde_json::to_value(ctx).map_err(|e| SessionError::Corrupt(e.to_string()))?;
        let back: SessionContext =
            serde_json::from_value(json.clone()).map_err(|e| SessionError::Corrupt(e.to_string()))?;
        let json_again =
            serde_json::to_value(&back).map_err(|e| SessionError::Corrupt(e.to_string()))?;
        if json != json_again {
            return Err(SessionError::Validation(
                "context does not round-trip through serialization".to_string(),
            ));
        }

        // I3: bounded refinement counter.
        if ctx.refinement_attempts > self.search_settings.max_refinements {
            return Err(SessionError::Validation(format!(
                "refinement_attempts {} exceeds cap {}",
                ctx.refinement_attempts, self.search_settings.max_refinements
            )));
        }

        // I4: at most three ranked products once matching has run.
        if ctx.ranked_products.len() > 3 {
            return Err(SessionError::Validation(format!(
                "{} ranked products, limit is 3",
                ctx.ranked_products.len()
            )));
        }

        // I5: past the search state, persisted results must not
        // definitively violate a hard constraint.
        let filtered_states = matches!(
            ctx.state,
            ContractState::PresentOptions
                | ContractState::ConfirmPurchase
                | ContractState::CompleteOrder
                | ContractState::Completed
        );
        if filtered_states {
            let constraints = constraint::parse_all(&ctx.hard_constraints);
            for item in &ctx.search_results {
                if constraints.iter().any(|c| c.evaluate(item) == Some(false)) {
                    return Err(SessionError::Validation(format!(
                        "search result {} violates a hard constraint past the search state",
                        item.id
                    )));
                }
            }
        }

        Ok(())
    }

    fn decode(&self, row: StoredSession) -> Result<SessionContext, SessionError> {
        if row.schema_version > CONTEXT_SCHEMA_VERSION {
            return Err(SessionError::SchemaVersion {
                found: row.schema_version,
                supported: CONTEXT_SCHEMA_VERSION,
            });
        }

        let mut value: serde_json::Value = serde_json::from_str(&row.context_blob)
            .map_err(|e| SessionError::Corrupt(e.to_string()))?;

        if row.schema_version < CONTEXT_SCHEMA_VERSION {
            let Some(upgrader) = &self.upgrader else {
                return Err(SessionError::SchemaVersion {
                    found: row.schema_version,
                    supported: CONTEXT_SCHEMA_VERSION,
                });
            };
            value = upgrader.upgrade(value, row.schema_version)?;
            value["schema_version"] = serde_json::json!(CONTEXT_SCHEMA_VERSION);
        }

        serde_json::from_value(value).map_err(|e| SessionError::Corrupt(e.to_string()))
    }

    /// Drop a session from the hot cache (archival/eviction path).
    pub fn evict(&self, session_id: &str) {
        self.cache.remove(session_id);
        self.locks.remove(session_id);
    }
}
