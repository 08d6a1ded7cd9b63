//! The stage runner

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;

use concierge_core::{CollaboratorError, Deadline, PipelineExecution, StageRecord};

/// Pipeline failures.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    /// The deadline expired before or during the stage.
    #[error("stage {stage} cancelled by deadline")]
    Cancelled { stage: &'static str },

    #[error("stage {stage} failed: {message}")]
    Stage {
        stage: &'static str,
        message: String,
    },
}

impl PipelineError {
    pub fn stage(stage: &'static str, message: impl Into<String>) -> Self {
        Self::Stage {
            stage,
            message: message.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled { .. } => true,
            Self::Collaborator(err) => err.is_deadline(),
            _ => false,
        }
    }
}

/// A typed pipeline stage.
///
/// Edges are declared by the pipeline that owns the stages; the runner
/// executes them in topological (here: linear) order.
#[async_trait]
pub trait Stage: Send + Sync {
    type Input: Send + Sync;
    type Output: Send + Sync;

    fn name(&self) -> &'static str;

    async fn run(
        &self,
        input: &Self::Input,
        deadline: Deadline,
    ) -> Result<Self::Output, PipelineError>;

    /// Cache key over the input; `None` disables caching for this stage.
    fn cache_key(&self, _input: &Self::Input) -> Option<String> {
        None
    }

    /// TTL for cached outputs of this stage.
    fn cache_ttl(&self) -> Duration {
        Duration::from_secs(3600)
    }

    /// Fallback invoked when the primary fails (including deadline
    /// expiry). Returning `Some` degrades instead of failing.
    async fn fallback(
        &self,
        _input: &Self::Input,
        _error: &PipelineError,
    ) -> Option<Self::Output> {
        None
    }
}

struct CacheSlot {
    value: serde_json::Value,
    expires_at: Instant,
}

/// Process-wide TTL cache shared by stages; keys include the stage name,
/// so the cache may be shared across pipelines and sessions.
#[derive(Default)]
pub struct StageCache {
    slots: DashMap<String, CacheSlot>,
}

impl StageCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, key: &str) -> Option<serde_json::Value> {
        let slot = self.slots.get(key)?;
        if slot.expires_at <= Instant::now() {
            drop(slot);
            self.slots.remove(key);
            return None;
        }
        Some(slot.value.clone())
    }

    fn put(&self, key: String, value: serde_json::Value, ttl: Duration) {
        self.slots.insert(
            key,
            CacheSlot {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Executes stages, recording duration, cache hits and degradation into
/// a [`PipelineExecution`].
pub struct PipelineRunner {
    cache: std::sync::Arc<StageCache>,
}

impl PipelineRunner {
    pub fn new(cache: std::sync::Arc<StageCache>) -> Self {
        Self { cache }
    }

    /// Run one stage: deadline check, cache lookup, primary, fallback.
    pub async fn execute<S>(
        &self,
        stage: &S,
        input: &S::Input,
        deadline: Deadline,
        execution: &mut PipelineExecution,
    ) -> Result<S::Output, PipelineError>
    where
        S: Stage,
        S::Output: Serialize + DeserializeOwned,
    {
        let started = Instant::now();
        let cache_key = stage
            .cache_key(input)
            .map(|k| format!("{}:{}", stage.name(), k));

        if let Some(key) = &cache_key {
            if let Some(cached) = self.cache.get(key) {
                if let Ok(output) = serde_json::from_value::<S::Output>(cached) {
                    execution.record_stage(StageRecord {
                        name: stage.name().to_string(),
                        duration_ms: started.elapsed().as_millis() as u64,
                        cache_hit: true,
                        degraded: false,
                    });
                    return Ok(output);
                }
                // A cache entry that no longer decodes is dropped and the
                // stage runs fresh.
                self.cache.slots.remove(key);
            }
        }

        let result = if deadline.is_expired() {
            Err(PipelineError::Cancelled {
                stage: stage.name(),
            })
        } else {
            stage.run(input, deadline).await
        };

        match result {
            Ok(output) => {
                if let Some(key) = cache_key {
                    if let Ok(value) = serde_json::to_value(&output) {
                        self.cache.put(key, value, stage.cache_ttl());
                    }
                }
                execution.record_stage(StageRecord {
                    name: stage.name().to_string(),
                    duration_ms: started.elapsed().as_millis() as u64,
                    cache_hit: false,
                    degraded: false,
                });
                Ok(output)
            }
            Err(error) => match stage.fallback(input, &error).await {
                Some(output) => {
                    tracing::warn!(
                        stage = stage.name(),
                        error = %error,
                        "stage degraded to fallback"
                    );
                    execution.record_stage(StageRecord {
                        name: stage.name().to_string(),
                        duration_ms: started.elapsed().as_millis() as u64,
                        cache_hit: false,
                        degraded: true,
                    });
                    Ok(output)
                }
                None => {
                    execution.record_stage(StageRecord {
                        name: stage.name().to_string(),
                        duration_ms: started.elapsed().as_millis() as u64,
                        cache_hit: false,
                        degraded: false,
                    });
                    Err(error)
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Doubler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Stage for Doubler {
        type Input = u32;
        type Output = u32;

        fn name(&self) -> &'static str {
            "doubler"
        }

        async fn run(&self, input: &u32, _deadline: Deadline) -> Result<u32, PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(input * 2)
        }

        fn cache_key(&self, input: &u32) -> Option<String> {
            Some(input.to_string())
        }
    }

    struct Failing {
        with_fallback: bool,
    }

    #[async_trait]
    impl Stage for Failing {
        type Input = u32;
        type Output = u32;

        fn name(&self) -> &'static str {
            "failing"
        }

        async fn run(&self, _input: &u32, _deadline: Deadline) -> Result<u32, PipelineError> {
            Err(PipelineError::stage("failing", "boom"))
        }

        async fn fallback(&self, _input: &u32, _error: &PipelineError) -> Option<u32> {
            self.with_fallback.then_some(0)
        }
    }

    fn runner() -> PipelineRunner {
        PipelineRunner::new(Arc::new(StageCache::new()))
    }

    fn far_deadline() -> Deadline {
        Deadline::after(Duration::from_secs(10))
    }

    #[tokio::test]
    async fn test_cache_hit_skips_stage() {
        let runner = runner();
        let stage = Doubler {
            calls: AtomicUsize::new(0),
        };
        let mut exec = PipelineExecution::new("test");

        let a = runner
            .execute(&stage, &21, far_deadline(), &mut exec)
            .await
            .unwrap();
        let b = runner
            .execute(&stage, &21, far_deadline(), &mut exec)
            .await
            .unwrap();

        assert_eq!(a, 42);
        assert_eq!(b, 42);
        assert_eq!(stage.calls.load(Ordering::SeqCst), 1);
        assert!(!exec.stages[0].cache_hit);
        assert!(exec.stages[1].cache_hit);
        assert!(exec.cache_hit);
    }

    #[tokio::test]
    async fn test_fallback_degrades() {
        let runner = runner();
        let mut exec = PipelineExecution::new("test");

        let out = runner
            .execute(&Failing { with_fallback: true }, &1, far_deadline(), &mut exec)
            .await
            .unwrap();

        assert_eq!(out, 0);
        assert!(exec.degraded);
        assert!(exec.stages[0].degraded);
    }

    #[tokio::test]
    async fn test_no_fallback_propagates() {
        let runner = runner();
        let mut exec = PipelineExecution::new("test");

        let err = runner
            .execute(&Failing { with_fallback: false }, &1, far_deadline(), &mut exec)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Stage { .. }));
    }

    #[tokio::test]
    async fn test_expired_deadline_cancels_stage() {
        let runner = runner();
        let stage = Doubler {
            calls: AtomicUsize::new(0),
        };
        let mut exec = PipelineExecution::new("test");

        let err = runner
            .execute(&stage, &3, Deadline::after(Duration::ZERO), &mut exec)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(stage.calls.load(Ordering::SeqCst), 0);
    }
}
