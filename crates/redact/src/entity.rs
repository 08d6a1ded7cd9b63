//! Detected PII entity types

use serde::{Deserialize, Serialize};

/// Kinds of PII the detector recognizes.
///
/// The structured kinds are Swiss-oriented: phone numbers, IBANs and
/// social insurance numbers follow the Swiss formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiType {
    /// Email address
    Email,
    /// Swiss phone number (+41 / 0041 / 0xx)
    Phone,
    /// Swiss IBAN (CH prefix, mod-97 checked)
    Iban,
    /// Credit-card-shaped 13–16 digit sequence (Luhn checked)
    CardNumber,
    /// Swiss social insurance number (756.xxxx.xxxx.xx)
    SocialInsurance,
    /// Person name (NER)
    Person,
    /// Organization (NER)
    Org,
    /// Geopolitical entity (NER)
    Gpe,
    /// Date (NER)
    Date,
}

impl PiiType {
    /// Tag used inside redaction placeholders.
    pub fn tag(&self) -> &'static str {
        match self {
            PiiType::Email => "EMAIL",
            PiiType::Phone => "PHONE",
            PiiType::Iban => "IBAN",
            PiiType::CardNumber => "CARD",
            PiiType::SocialInsurance => "AHV",
            PiiType::Person => "PERSON",
            PiiType::Org => "ORG",
            PiiType::Gpe => "GPE",
            PiiType::Date => "DATE",
        }
    }

    pub fn severity(&self) -> PiiSeverity {
        match self {
            PiiType::Iban | PiiType::CardNumber | PiiType::SocialInsurance => PiiSeverity::Critical,
            PiiType::Email | PiiType::Phone => PiiSeverity::High,
            PiiType::Person | PiiType::Org => PiiSeverity::Medium,
            PiiType::Gpe | PiiType::Date => PiiSeverity::Low,
        }
    }
}

/// How badly a leak of this entity would hurt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Which layer found the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    #[default]
    Regex,
    Ner,
    Llm,
}

/// One detected span. Offsets are byte positions into the original text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PiiEntity {
    pub pii_type: PiiType,
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub confidence: f32,
    #[serde(default)]
    pub method: DetectionMethod,
}

impl PiiEntity {
    pub fn new(pii_type: PiiType, text: impl Into<String>, start: usize, end: usize) -> Self {
        Self {
            pii_type,
            text: text.into(),
            start,
            end,
            confidence: 1.0,
            method: DetectionMethod::Regex,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_method(mut self, method: DetectionMethod) -> Self {
        self.method = method;
        self
    }

    /// Whether this span overlaps another.
    pub fn overlaps(&self, other: &PiiEntity) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(PiiType::Iban.severity() > PiiType::Email.severity());
        assert!(PiiType::Email.severity() > PiiType::Person.severity());
        assert_eq!(PiiType::SocialInsurance.severity(), PiiSeverity::Critical);
    }

    #[test]
    fn test_overlap() {
        let a = PiiEntity::new(PiiType::Email, "a@b.ch", 0, 6);
        let b = PiiEntity::new(PiiType::Person, "b.ch", 4, 8);
        let c = PiiEntity::new(PiiType::Phone, "x", 6, 7);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn test_entity_builder() {
        let entity = PiiEntity::new(PiiType::Phone, "+41 79 123 45 67", 0, 16)
            .with_confidence(1.4)
            .with_method(DetectionMethod::Ner);
        assert_eq!(entity.confidence, 1.0);
        assert_eq!(entity.method, DetectionMethod::Ner);
    }
}
