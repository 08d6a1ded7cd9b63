//! The redaction gate

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::entity::PiiEntity;
use crate::ner::NamedEntityRecognizer;
use crate::patterns::detect_structured;

/// How detected spans are replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RedactionMode {
    /// Replace with `[TYPE]`.
    #[default]
    Placeholder,
    /// Replace with `[TYPE_<first 8 hex of SHA-256>]`, stable across
    /// calls, so the same value redacts identically everywhere.
    Hash,
    /// Remove the span, collapsing surrounding whitespace to one space.
    Drop,
}

/// Result of one redaction pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedactionOutcome {
    pub redacted_text: String,
    /// Detected spans with offsets into the original text.
    pub entities: Vec<PiiEntity>,
    /// Whether the redacted text may enter the vector store.
    pub safe_for_vector_store: bool,
    /// True when a detection layer failed and the pass ran regex-only.
    pub degraded: bool,
}

// Matches the placeholders this module emits, so a second pass never
// re-detects them (idempotency).
static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[(?:EMAIL|PHONE|IBAN|CARD|AHV|PERSON|ORG|GPE|DATE)(?:_[0-9a-f]{8})?\]").unwrap()
});

/// PII detection + redaction gate.
///
/// Pure function object: no interior state, reentrant, shareable across
/// turn workers. Layers run in order: structured regexes, then the
/// named-entity recognizer, then the optional LLM fallback. Later
/// layers never override an earlier hit on the same span.
pub struct Redactor {
    ner: Option<Arc<dyn NamedEntityRecognizer>>,
    llm_fallback: Option<Arc<dyn NamedEntityRecognizer>>,
}

impl Redactor {
    /// Regex-only redactor.
    pub fn new() -> Self {
        Self {
            ner: None,
            llm_fallback: None,
        }
    }

    /// Attach the named-entity layer.
    pub fn with_ner(mut self, ner: Arc<dyn NamedEntityRecognizer>) -> Self {
        self.ner = Some(ner);
        self
    }

    /// Attach the LLM fallback layer. Keep this off in
    /// locality-restricted deployments.
    pub fn with_llm_fallback(mut self, recognizer: Arc<dyn NamedEntityRecognizer>) -> Self {
        self.llm_fallback = Some(recognizer);
        self
    }

    /// Detect without redacting. Used by stores gating writes.
    pub fn scan(&self, text: &str) -> (Vec<PiiEntity>, bool) {
        if text.is_empty() {
            return (Vec::new(), false);
        }

        // First hit wins on overlap, both across layers and within the
        // structured layer (a digit run can match phone and card shapes).
        let mut entities: Vec<PiiEntity> = Vec::new();
        for entity in detect_structured(text) {
            if !entities.iter().any(|e| e.overlaps(&entity)) {
                entities.push(entity);
            }
        }
        let mut degraded = false;

        for layer in [&self.ner, &self.llm_fallback].into_iter().flatten() {
            match layer.recognize(text) {
                Ok(found) => {
                    for entity in found {
                        if !entities.iter().any(|e| e.overlaps(&entity)) {
                            entities.push(entity);
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "entity recognizer failed, continuing regex-only");
                    degraded = true;
                }
            }
        }

        // Never re-detect our own placeholders.
        entities.retain(|e| {
            !PLACEHOLDER
                .find_iter(text)
                .any(|m| e.start < m.end() && m.start() < e.end)
        });

        entities.sort_by_key(|e| (e.start, e.end));
        (entities, degraded)
    }

    /// Whether raw `text` may be written to the vector store as-is.
    pub fn is_safe_for_vector_store(&self, text: &str) -> bool {
        let (entities, degraded) = self.scan(text);
        entities.is_empty() && !degraded
    }

    /// Redact `text`. Idempotent: redacting already-redacted text is a
    /// no-op. Empty input yields empty output and no entities.
    pub fn redact(&self, text: &str, mode: RedactionMode) -> RedactionOutcome {
        if text.is_empty() {
            return RedactionOutcome {
                redacted_text: String::new(),
                entities: Vec::new(),
                safe_for_vector_store: true,
                degraded: false,
            };
        }

        let (entities, degraded) = self.scan(text);
        let mut redacted = text.to_string();

        // Replace back to front so earlier offsets stay valid.
        for entity in entities.iter().rev() {
            match mode {
                RedactionMode::Placeholder => {
                    redacted.replace_range(
                        entity.start..entity.end,
                        &format!("[{}]", entity.pii_type.tag()),
                    );
                }
                RedactionMode::Hash => {
                    redacted.replace_range(
                        entity.start..entity.end,
                        &format!("[{}_{}]", entity.pii_type.tag(), short_hash(&entity.text)),
                    );
                }
                RedactionMode::Drop => {
                    drop_span(&mut redacted, entity.start, entity.end);
                }
            }
        }

        RedactionOutcome {
            redacted_text: redacted,
            entities,
            safe_for_vector_store: !degraded,
            degraded,
        }
    }
}

impl Default for Redactor {
    fn default() -> Self {
        Self::new()
    }
}

/// First 8 hex chars of SHA-256 over the span.
fn short_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..8].to_string()
}

/// Remove `[start, end)` and collapse the whitespace around the cut to a
/// single space.
fn drop_span(text: &mut String, start: usize, end: usize) {
    text.replace_range(start..end, "");

    let head_ws = text[..start].ends_with([' ', '\t']);
    let tail = &text[start..];
    let tail_ws_len = tail.len() - tail.trim_start_matches([' ', '\t']).len();

    if head_ws && tail_ws_len > 0 {
        text.replace_range(start..start + tail_ws_len, "");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::PiiType;
    use crate::ner::{FailingRecognizer, GazetteerRecognizer};

    fn full_redactor() -> Redactor {
        Redactor::new().with_ner(Arc::new(GazetteerRecognizer::new()))
    }

    #[test]
    fn test_empty_input() {
        let outcome = full_redactor().redact("", RedactionMode::Placeholder);
        assert_eq!(outcome.redacted_text, "");
        assert!(outcome.entities.is_empty());
        assert!(outcome.safe_for_vector_store);
    }

    #[test]
    fn test_placeholder_mode() {
        let outcome = full_redactor().redact(
            "write to anna.keller@example.ch about it",
            RedactionMode::Placeholder,
        );
        assert_eq!(outcome.redacted_text, "write to [EMAIL] about it");
        assert_eq!(outcome.entities.len(), 1);
    }

    #[test]
    fn test_hash_mode_stable() {
        let redactor = full_redactor();
        let a = redactor.redact("mail anna.keller@example.ch now", RedactionMode::Hash);
        let b = redactor.redact("ping anna.keller@example.ch again", RedactionMode::Hash);

        // Same span means same hash token, stable across calls.
        let token_a = a.redacted_text.split_whitespace().nth(1).unwrap().to_string();
        let token_b = b.redacted_text.split_whitespace().nth(1).unwrap().to_string();
        assert_eq!(token_a, token_b);
        assert!(token_a.starts_with("[EMAIL_"));
    }

    #[test]
    fn test_drop_mode_whitespace() {
        let outcome = full_redactor().redact(
            "call +41 79 123 45 67 tomorrow",
            RedactionMode::Drop,
        );
        assert_eq!(outcome.redacted_text, "call tomorrow");
    }

    #[test]
    fn test_idempotency() {
        let redactor = full_redactor();
        for mode in [
            RedactionMode::Placeholder,
            RedactionMode::Hash,
            RedactionMode::Drop,
        ] {
            let input =
                "Anna Keller pays with CH93 0076 2011 6238 5295 7 from anna@example.ch";
            let once = redactor.redact(input, mode);
            let twice = redactor.redact(&once.redacted_text, mode);
            assert_eq!(
                once.redacted_text, twice.redacted_text,
                "mode {:?} not idempotent",
                mode
            );
            assert!(twice.entities.is_empty());
        }
    }

    #[test]
    fn test_ner_failure_degrades_to_regex_only() {
        let redactor = Redactor::new().with_ner(Arc::new(FailingRecognizer));
        let outcome = redactor.redact(
            "Anna Keller, anna@example.ch",
            RedactionMode::Placeholder,
        );

        // Structured PII still caught; free-text PII missed; flagged.
        assert!(outcome.degraded);
        assert!(!outcome.safe_for_vector_store);
        assert!(outcome.redacted_text.contains("[EMAIL]"));
        assert!(outcome.redacted_text.contains("Anna Keller"));
    }

    #[test]
    fn test_earlier_layer_wins_overlap() {
        // "Anna Keller" would also be a PERSON run, but the email regex
        // sees the full address first where they overlap.
        let outcome = full_redactor().redact(
            "contact Anna.Keller@firm.ch",
            RedactionMode::Placeholder,
        );
        let email_count = outcome
            .entities
            .iter()
            .filter(|e| e.pii_type == PiiType::Email)
            .count();
        assert_eq!(email_count, 1);
        for e in &outcome.entities {
            assert!(
                e.pii_type != PiiType::Person || !outcome.entities.iter().any(
                    |other| other.pii_type == PiiType::Email && other.overlaps(e)
                )
            );
        }
    }

    #[test]
    fn test_scan_gates_vector_store() {
        let redactor = full_redactor();
        assert!(!redactor.is_safe_for_vector_store("my AHV is 756.1234.5678.97"));
        assert!(redactor.is_safe_for_vector_store("prefers quiet graphics cards"));
    }
}
