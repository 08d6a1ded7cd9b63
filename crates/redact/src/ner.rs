//! Named-entity layer
//!
//! The recognizer is pluggable: deployments with a real NER model adapt
//! it behind [`NamedEntityRecognizer`]; the in-repo
//! [`GazetteerRecognizer`] is a heuristic implementation good enough for
//! the redaction gate. A recognizer failure never reaches the caller:
//! the redactor downgrades to regex-only and flags the result degraded.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::entity::{DetectionMethod, PiiEntity, PiiType};

/// Recognizer failure. Carried internally; the redactor absorbs it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum NerError {
    #[error("recognizer unavailable: {0}")]
    Unavailable(String),

    #[error("recognizer failed: {0}")]
    Failed(String),
}

/// A named-entity recognizer over free text.
pub trait NamedEntityRecognizer: Send + Sync {
    fn recognize(&self, text: &str) -> Result<Vec<PiiEntity>, NerError>;
}

static CAPITALIZED_RUN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-ZÄÖÜ][a-zäöüéèà]+(?:\s+[A-ZÄÖÜ][a-zäöüéèà]+)+\b").unwrap()
});

static DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b\d{1,2}\.\d{1,2}\.\d{2,4}\b|\b(?:January|February|March|April|May|June|July|August|September|October|November|December)\s+\d{1,2}(?:,\s*\d{4})?\b",
    )
    .unwrap()
});

const ORG_SUFFIXES: &[&str] = &["AG", "GmbH", "SA", "Sàrl", "Ltd", "Inc", "SE"];

const GPE_TERMS: &[&str] = &[
    "Zurich", "Zürich", "Geneva", "Genève", "Basel", "Bern", "Lausanne", "Lucerne", "Lugano",
    "Switzerland", "Schweiz", "Suisse", "Germany", "Austria", "France", "Italy",
];

/// Heuristic gazetteer recognizer.
///
/// Capitalized multi-word runs become PERSON unless followed by a legal
/// suffix (ORG); known place names become GPE; numeric and month-name
/// dates become DATE.
#[derive(Debug, Default)]
pub struct GazetteerRecognizer;

impl GazetteerRecognizer {
    pub fn new() -> Self {
        Self
    }
}

impl NamedEntityRecognizer for GazetteerRecognizer {
    fn recognize(&self, text: &str) -> Result<Vec<PiiEntity>, NerError> {
        let mut entities = Vec::new();

        for term in GPE_TERMS {
            let mut from = 0;
            while let Some(pos) = text[from..].find(term) {
                let start = from + pos;
                let end = start + term.len();
                entities.push(
                    PiiEntity::new(PiiType::Gpe, *term, start, end)
                        .with_method(DetectionMethod::Ner)
                        .with_confidence(0.9),
                );
                from = end;
            }
        }

        for m in CAPITALIZED_RUN.find_iter(text) {
            // A run followed by a legal-form suffix is an organization.
            let rest = &text[m.end()..];
            let is_org = ORG_SUFFIXES
                .iter()
                .any(|s| rest.trim_start().starts_with(s));
            let run = m.as_str();
            // Skip runs that are entirely known places; the GPE pass has
            // them already.
            if GPE_TERMS.contains(&run) {
                continue;
            }
            let (pii_type, confidence) = if is_org {
                (PiiType::Org, 0.8)
            } else {
                (PiiType::Person, 0.7)
            };
            entities.push(
                PiiEntity::new(pii_type, run, m.start(), m.end())
                    .with_method(DetectionMethod::Ner)
                    .with_confidence(confidence),
            );
        }

        for m in DATE.find_iter(text) {
            entities.push(
                PiiEntity::new(PiiType::Date, m.as_str(), m.start(), m.end())
                    .with_method(DetectionMethod::Ner)
                    .with_confidence(0.85),
            );
        }

        Ok(entities)
    }
}

/// Test recognizer that always fails, for degradation paths.
#[derive(Debug, Default)]
pub struct FailingRecognizer;

impl NamedEntityRecognizer for FailingRecognizer {
    fn recognize(&self, _text: &str) -> Result<Vec<PiiEntity>, NerError> {
        Err(NerError::Unavailable("model not loaded".to_string()))
    }
}
