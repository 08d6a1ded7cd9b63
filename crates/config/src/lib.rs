//! Configuration for the concierge assistant
//!
//! A single typed [`Settings`] record covers every tunable the core
//! honors. Values layer file < environment (`CONCIERGE__` prefix), and
//! every field has a default matching the documented deployment baseline,
//! so an empty config is a valid one.
//!
//! The volatility keyword sets are the one runtime-updatable piece; they
//! live behind [`VolatilityStore`], which hands out immutable snapshots.

pub mod settings;
pub mod volatility;

pub use settings::{
    BufferSettings, ConcurrencySettings, PreferenceSettings, RedactorSettings, RouterSettings,
    SearchSettings, SessionSettings, Settings, SummarySettings,
};
pub use volatility::{VolatilityKeywords, VolatilityStore};

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
