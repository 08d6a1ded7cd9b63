//! PII detection and redaction
//!
//! The gate every piece of text passes before crossing a durability
//! boundary. Three detection layers run in order (structured-PII regexes,
//! a named-entity recognizer, an optional LLM fallback) and three
//! redaction modes replace what they find. Redaction is idempotent and the
//! whole component is a pure, reentrant function object: no interior
//! state, safe to share across turn workers.

pub mod entity;
pub mod ner;
pub mod patterns;
pub mod redactor;

pub use entity::{DetectionMethod, PiiEntity, PiiSeverity, PiiType};
pub use ner::{GazetteerRecognizer, NamedEntityRecognizer, NerError};
pub use redactor::{RedactionMode, RedactionOutcome, Redactor};
