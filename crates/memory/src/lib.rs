//! Memory tiers for the concierge assistant
//!
//! Four tiers with distinct lifetimes and write disciplines:
//! - [`BufferStore`]: ephemeral per-session message window (sliding TTL)
//! - [`SummaryStore`]: append-only rolling summaries, write-through
//! - [`SemanticStore`]: long-term per-user vector memory, redaction-gated
//! - [`AuditStore`]: append-only compliance log, off the hot path
//!
//! plus the [`RollingSummarizer`] that folds buffer overflow into
//! summaries without ever losing a message.

pub mod audit;
pub mod buffer;
pub mod error;
pub mod kv;
pub mod semantic;
pub mod summarizer;
pub mod summary;
pub mod tokens;

pub use audit::{AuditArtifact, AuditKind, AuditStore, InMemoryObjectStore};
pub use buffer::{AppendOutcome, BufferStore, BufferedMessage};
pub use error::MemoryError;
pub use kv::InMemoryKv;
pub use semantic::{HashingEmbedder, InMemoryVectorIndex, SemanticHit, SemanticMemory, SemanticStore};
pub use summarizer::RollingSummarizer;
pub use summary::{InMemorySummaryBackend, Summary, SummaryBackend, SummaryStore};
pub use tokens::estimate_tokens;
