//! Structured-PII regex layer
//!
//! Compiled once at startup. Checksum-bearing formats (IBAN, card
//! numbers) are verified before a match becomes an entity, so arbitrary
//! digit runs don't get redacted.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::entity::{PiiEntity, PiiType};

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());

// +41 79 123 45 67 / 0041791234567 / 079 123 45 67
static PHONE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\+41|0041)[\s.-]?\d{2}[\s.-]?\d{3}[\s.-]?\d{2}[\s.-]?\d{2}|\b0\d{2}[\s.-]\d{3}[\s.-]\d{2}[\s.-]\d{2}\b")
        .unwrap()
});

// CH + 2 check digits + 17 alphanumerics, optionally space-grouped.
static IBAN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bCH\d{2}(?:\s?[0-9A-Za-z]{4}){4}\s?[0-9A-Za-z]\b").unwrap());

// 13–16 digits, optionally space/hyphen grouped.
static CARD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d(?:[ -]?\d){12,15}\b").unwrap());

static SOCIAL_INSURANCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b756\.\d{4}\.\d{4}\.\d{2}\b").unwrap());

/// Run every structured detector over `text`.
pub fn detect_structured(text: &str) -> Vec<PiiEntity> {
    let mut entities = Vec::new();

    for m in EMAIL.find_iter(text) {
        entities.push(PiiEntity::new(
            PiiType::Email,
            m.as_str(),
            m.start(),
            m.end(),
        ));
    }
    for m in SOCIAL_INSURANCE.find_iter(text) {
        entities.push(PiiEntity::new(
            PiiType::SocialInsurance,
            m.as_str(),
            m.start(),
            m.end(),
        ));
    }
    for m in PHONE.find_iter(text) {
        entities.push(PiiEntity::new(
            PiiType::Phone,
            m.as_str(),
            m.start(),
            m.end(),
        ));
    }
    for m in IBAN.find_iter(text) {
        if iban_checksum_valid(m.as_str()) {
            entities.push(PiiEntity::new(
                PiiType::Iban,
                m.as_str(),
                m.start(),
                m.end(),
            ));
        }
    }
    for m in CARD.find_iter(text) {
        if luhn_valid(m.as_str()) {
            entities.push(PiiEntity::new(
                PiiType::CardNumber,
                m.as_str(),
                m.start(),
                m.end(),
            ));
        }
    }

    entities
}

/// ISO 13616 mod-97 check for a Swiss IBAN.
fn iban_checksum_valid(raw: &str) -> bool {
    let compact: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_uppercase();
    if compact.len() != 21 || !compact.starts_with("CH") {
        return false;
    }

    // Move the country code and check digits to the end, then map letters
    // to 10..35 and take the whole number mod 97.
    let rearranged = format!("{}{}", &compact[4..], &compact[..4]);
    let mut remainder: u32 = 0;
    for c in rearranged.chars() {
        let value = match c.to_digit(36) {
            Some(v) => v,
            None => return false,
        };
        remainder = if value < 10 {
            (remainder * 10 + value) % 97
        } else {
            (remainder * 100 + value) % 97
        };
    }
    remainder == 1
}

/// Luhn check over a card-shaped digit run.
fn luhn_valid(raw: &str) -> bool {
    let digits: Vec<u32> = raw.chars().filter_map(|c| c.to_digit(10)).collect();
    if !(13..=16).contains(&digits.len()) {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_detection() {
        let entities = detect_structured("reach me at anna.keller@example.ch please");
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].pii_type, PiiType::Email);
        assert_eq!(entities[0].text, "anna.keller@example.ch");
    }

    #[test]
    fn test_swiss_phone_detection() {
        for sample in ["+41 79 123 45 67", "0041 79 123 45 67", "079 123 45 67"] {
            let text = format!("call {} tomorrow", sample);
            let entities = detect_structured(&text);
            assert!(
                entities.iter().any(|e| e.pii_type == PiiType::Phone),
                "missed {}",
                sample
            );
        }
    }

    #[test]
    fn test_iban_checksum_gate() {
        // Valid Swiss IBAN (public example value).
        let valid = "CH93 0076 2011 6238 5295 7";
        let entities = detect_structured(&format!("pay to {}", valid));
        assert!(entities.iter().any(|e| e.pii_type == PiiType::Iban));

        // One digit off fails the mod-97 check and must not match.
        let invalid = "CH94 0076 2011 6238 5295 7";
        let entities = detect_structured(&format!("pay to {}", invalid));
        assert!(!entities.iter().any(|e| e.pii_type == PiiType::Iban));
    }

    #[test]
    fn test_card_luhn_gate() {
        let entities = detect_structured("card 4111 1111 1111 1111 on file");
        assert!(entities.iter().any(|e| e.pii_type == PiiType::CardNumber));

        let entities = detect_structured("tracking 4111 1111 1111 1112");
        assert!(!entities.iter().any(|e| e.pii_type == PiiType::CardNumber));
    }

    #[test]
    fn test_social_insurance_detection() {
        let entities = detect_structured("AHV 756.1234.5678.97");
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].pii_type, PiiType::SocialInsurance);
    }

    #[test]
    fn test_plain_text_clean() {
        assert!(detect_structured("I want to buy a graphics card").is_empty());
    }
}
