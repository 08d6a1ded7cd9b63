//! Main settings record

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Message buffer limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferSettings {
    /// Cap on buffered messages per session.
    #[serde(default = "default_buffer_max_messages")]
    pub max_messages: usize,
    /// Cap on estimated tokens per session.
    #[serde(default = "default_buffer_max_tokens")]
    pub max_tokens: usize,
    /// Sliding TTL per session key, in seconds.
    #[serde(default = "default_buffer_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_buffer_max_messages() -> usize {
    30
}
fn default_buffer_max_tokens() -> usize {
    4000
}
fn default_buffer_ttl_secs() -> u64 {
    12 * 60 * 60
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self {
            max_messages: default_buffer_max_messages(),
            max_tokens: default_buffer_max_tokens(),
            ttl_secs: default_buffer_ttl_secs(),
        }
    }
}

impl BufferSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Rolling summarization thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarySettings {
    /// Token count that triggers summarization.
    #[serde(default = "default_summary_trigger_tokens")]
    pub trigger_tokens: usize,
    /// Oldest messages folded into each summary.
    #[serde(default = "default_summary_chunk")]
    pub chunk: usize,
    /// Summary length bounds, in tokens.
    #[serde(default = "default_summary_max_len")]
    pub max_len: usize,
    #[serde(default = "default_summary_min_len")]
    pub min_len: usize,
}

fn default_summary_trigger_tokens() -> usize {
    3000
}
fn default_summary_chunk() -> usize {
    10
}
fn default_summary_max_len() -> usize {
    150
}
fn default_summary_min_len() -> usize {
    30
}

impl Default for SummarySettings {
    fn default() -> Self {
        Self {
            trigger_tokens: default_summary_trigger_tokens(),
            chunk: default_summary_chunk(),
            max_len: default_summary_max_len(),
            min_len: default_summary_min_len(),
        }
    }
}

/// Product search pipeline limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
    /// Items requested from the provider, hard cap.
    #[serde(default = "default_provider_cap")]
    pub provider_cap: usize,
    /// Result-gate threshold: more than this asks for refinement.
    #[serde(default = "default_gate_limit")]
    pub gate_limit: usize,
    /// Refinement rounds before forcing preference matching.
    #[serde(default = "default_max_refinements")]
    pub max_refinements: u8,
    /// Attribute analysis cache TTL, in seconds.
    #[serde(default = "default_analysis_cache_ttl_secs")]
    pub analysis_cache_ttl_secs: u64,
}

fn default_provider_cap() -> usize {
    100
}
fn default_gate_limit() -> usize {
    50
}
fn default_max_refinements() -> u8 {
    3
}
fn default_analysis_cache_ttl_secs() -> u64 {
    60 * 60
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            provider_cap: default_provider_cap(),
            gate_limit: default_gate_limit(),
            max_refinements: default_max_refinements(),
            analysis_cache_ttl_secs: default_analysis_cache_ttl_secs(),
        }
    }
}

/// Preference match pipeline limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreferenceSettings {
    /// Ranked items surfaced to the user.
    #[serde(default = "default_preference_top_k")]
    pub top_k: usize,
    /// Per-item spec scrape timeout, in milliseconds.
    #[serde(default = "default_spec_timeout_ms")]
    pub spec_timeout_ms: u64,
}

fn default_preference_top_k() -> usize {
    3
}
fn default_spec_timeout_ms() -> u64 {
    1500
}

impl Default for PreferenceSettings {
    fn default() -> Self {
        Self {
            top_k: default_preference_top_k(),
            spec_timeout_ms: default_spec_timeout_ms(),
        }
    }
}

impl PreferenceSettings {
    pub fn spec_timeout(&self) -> Duration {
        Duration::from_millis(self.spec_timeout_ms)
    }
}

/// Intent router thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterSettings {
    /// Below this confidence the router falls back to chat.
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f32,
    /// Budget for the classification LLM call, in milliseconds.
    #[serde(default = "default_llm_deadline_ms")]
    pub llm_deadline_ms: u64,
}

fn default_confidence_floor() -> f32 {
    0.6
}
fn default_llm_deadline_ms() -> u64 {
    3000
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            confidence_floor: default_confidence_floor(),
            llm_deadline_ms: default_llm_deadline_ms(),
        }
    }
}

impl RouterSettings {
    pub fn llm_deadline(&self) -> Duration {
        Duration::from_millis(self.llm_deadline_ms)
    }
}

/// Redactor feature switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedactorSettings {
    /// Run the named-entity layer after the regex layer.
    #[serde(default = "default_true")]
    pub use_ner: bool,
    /// Allow the LLM fallback layer. Off in locality-restricted
    /// deployments.
    #[serde(default)]
    pub allow_llm_fallback: bool,
}

fn default_true() -> bool {
    true
}

impl Default for RedactorSettings {
    fn default() -> Self {
        Self {
            use_ner: true,
            allow_llm_fallback: false,
        }
    }
}

/// Session store tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// In-process context cache TTL, in seconds.
    #[serde(default = "default_session_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Hot-store retention after last activity, in seconds.
    #[serde(default = "default_session_retention_secs")]
    pub retention_secs: u64,
}

fn default_session_cache_ttl_secs() -> u64 {
    5 * 60
}
fn default_session_retention_secs() -> u64 {
    24 * 60 * 60
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_session_cache_ttl_secs(),
            retention_secs: default_session_retention_secs(),
        }
    }
}

impl SessionSettings {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

/// Turn scheduling and backpressure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencySettings {
    /// Per-turn deadline, in milliseconds.
    #[serde(default = "default_turn_deadline_ms")]
    pub turn_deadline_ms: u64,
    /// Queued turns per session before callers get "busy".
    #[serde(default = "default_session_queue_depth")]
    pub session_queue_depth: usize,
    /// Concurrent turns across all sessions.
    #[serde(default = "default_global_turn_cap")]
    pub global_turn_cap: usize,
}

fn default_turn_deadline_ms() -> u64 {
    30_000
}
fn default_session_queue_depth() -> usize {
    4
}
fn default_global_turn_cap() -> usize {
    256
}

impl Default for ConcurrencySettings {
    fn default() -> Self {
        Self {
            turn_deadline_ms: default_turn_deadline_ms(),
            session_queue_depth: default_session_queue_depth(),
            global_turn_cap: default_global_turn_cap(),
        }
    }
}

impl ConcurrencySettings {
    pub fn turn_deadline(&self) -> Duration {
        Duration::from_millis(self.turn_deadline_ms)
    }
}

/// Everything tunable, in one record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub buffer: BufferSettings,
    #[serde(default)]
    pub summary: SummarySettings,
    #[serde(default)]
    pub search: SearchSettings,
    #[serde(default)]
    pub preference: PreferenceSettings,
    #[serde(default)]
    pub router: RouterSettings,
    #[serde(default)]
    pub redactor: RedactorSettings,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub concurrency: ConcurrencySettings,
}

impl Settings {
    /// Defaults only, no file or environment.
    pub fn baseline() -> Self {
        Self::default()
    }

    /// Load from an optional file, then apply `CONCIERGE__` environment
    /// overrides (`CONCIERGE__ROUTER__CONFIDENCE_FLOOR=0.7`).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        let config = builder
            .add_source(Environment::with_prefix("CONCIERGE").separator("__"))
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject configurations the core cannot honor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.router.confidence_floor) {
            return Err(ConfigError::Invalid(format!(
                "router.confidence_floor must be in [0, 1], got {}",
                self.router.confidence_floor
            )));
        }
        if self.search.gate_limit > self.search.provider_cap {
            return Err(ConfigError::Invalid(format!(
                "search.gate_limit ({}) exceeds search.provider_cap ({})",
                self.search.gate_limit, self.search.provider_cap
            )));
        }
        if self.summary.min_len > self.summary.max_len {
            return Err(ConfigError::Invalid(
                "summary.min_len exceeds summary.max_len".to_string(),
            ));
        }
        if self.preference.top_k == 0 {
            return Err(ConfigError::Invalid(
                "preference.top_k must be at least 1".to_string(),
            ));
        }
        if self.concurrency.session_queue_depth == 0 || self.concurrency.global_turn_cap == 0 {
            return Err(ConfigError::Invalid(
                "concurrency limits must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
