//! Pipeline execution records
//!
//! Every pipeline run appends one [`PipelineExecution`] to the session
//! context so operators can reconstruct what each turn actually did.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome class of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    /// Completed on the primary path.
    Ok,
    /// Product search gate: the result set is too large to rank.
    TooMany,
    /// Completed on a fallback path; output is usable but partial.
    Degraded,
    /// Deadline expired mid-pipeline.
    Cancelled,
    /// No fallback absorbed the failure.
    Failed,
}

/// Per-stage accounting within one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub name: String,
    pub duration_ms: u64,
    pub cache_hit: bool,
    pub degraded: bool,
}

/// One pipeline run, recorded on the session context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineExecution {
    pub pipeline: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub status: PipelineStatus,
    /// True when any stage served from cache.
    pub cache_hit: bool,
    /// True when any stage degraded to its fallback.
    pub degraded: bool,
    #[serde(default)]
    pub stages: Vec<StageRecord>,
}

impl PipelineExecution {
    pub fn new(pipeline: impl Into<String>) -> Self {
        Self {
            pipeline: pipeline.into(),
            started_at: Utc::now(),
            duration_ms: 0,
            status: PipelineStatus::Ok,
            cache_hit: false,
            degraded: false,
            stages: Vec::new(),
        }
    }

    /// Fold a finished stage into the run-level flags.
    pub fn record_stage(&mut self, stage: StageRecord) {
        self.cache_hit |= stage.cache_hit;
        self.degraded |= stage.degraded;
        self.stages.push(stage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_flags_roll_up() {
        let mut exec = PipelineExecution::new("product_search");
        exec.record_stage(StageRecord {
            name: "search".into(),
            duration_ms: 120,
            cache_hit: false,
            degraded: false,
        });
        exec.record_stage(StageRecord {
            name: "attribute_analyze".into(),
            duration_ms: 3,
            cache_hit: true,
            degraded: false,
        });

        assert!(exec.cache_hit);
        assert!(!exec.degraded);
        assert_eq!(exec.stages.len(), 2);
    }
}
