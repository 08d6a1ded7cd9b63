//! Intent routing
//!
//! Two stages per turn:
//! 1. a deterministic volatility pre-pass over the user text (keyword
//!    sets + temporal cues), then
//! 2. LLM classification against a dynamic manifest of intent kinds,
//!    registered contracts and tools.
//!
//! The router never fails a turn: validation failures, low confidence and
//! deadline expiry all collapse to the chat fallback.

pub mod manifest;
pub mod router;
pub mod volatility;

pub use manifest::{ContractDescriptor, ManifestSource, RoutingManifest, ToolDescriptor};
pub use router::IntentRouter;
pub use volatility::{classify_volatility, VolatilityAssessment};
