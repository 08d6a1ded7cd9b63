//! Hard-constraint predicates
//!
//! Constraints arrive as user-facing strings like `"price < 900 CHF"` or
//! `"brand = NVIDIA"`. Evaluation is three-valued: pass, fail, or unknown
//! when the item lacks the spec. Unknown never excludes an item
//! ("do not exclude for missing data").

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::product::Product;

/// Comparison operators supported in predicate strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    Contains,
}

/// One parsed predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub attribute: String,
    pub op: ConstraintOp,
    pub value: String,
}

static PREDICATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Za-z][A-Za-z0-9 _.-]*?)\s*(<=|>=|!=|<|>|=|~)\s*(.+?)\s*$").unwrap()
});

static LEADING_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"-?\d+(?:[.,]\d+)?").unwrap());

impl Constraint {
    /// Parse a predicate string. `~` means "contains".
    pub fn parse(raw: &str) -> Option<Self> {
        let captures = PREDICATE.captures(raw)?;
        let op = match &captures[2] {
            "<" => ConstraintOp::Lt,
            "<=" => ConstraintOp::Le,
            ">" => ConstraintOp::Gt,
            ">=" => ConstraintOp::Ge,
            "=" => ConstraintOp::Eq,
            "!=" => ConstraintOp::Ne,
            "~" => ConstraintOp::Contains,
            _ => return None,
        };
        Some(Self {
            attribute: captures[1].trim().to_lowercase(),
            op,
            value: captures[3].trim().to_string(),
        })
    }

    /// Evaluate against a product.
    ///
    /// `None` means the item lacks the spec; the caller must treat that
    /// as a pass.
    pub fn evaluate(&self, product: &Product) -> Option<bool> {
        let actual = product.spec(&self.attribute)?;

        // Numeric comparison whenever both sides carry a number.
        if let (Some(actual_num), Some(expected_num)) =
            (first_number(&actual), first_number(&self.value))
        {
            return Some(match self.op {
                ConstraintOp::Lt => actual_num < expected_num,
                ConstraintOp::Le => actual_num <= expected_num,
                ConstraintOp::Gt => actual_num > expected_num,
                ConstraintOp::Ge => actual_num >= expected_num,
                ConstraintOp::Eq => (actual_num - expected_num).abs() < 1e-9,
                ConstraintOp::Ne => (actual_num - expected_num).abs() >= 1e-9,
                ConstraintOp::Contains => {
                    actual.to_lowercase().contains(&self.value.to_lowercase())
                }
            });
        }

        let actual_lower = actual.to_lowercase();
        let expected_lower = self.value.to_lowercase();
        Some(match self.op {
            ConstraintOp::Eq => actual_lower == expected_lower,
            ConstraintOp::Ne => actual_lower != expected_lower,
            ConstraintOp::Contains => actual_lower.contains(&expected_lower),
            // Ordering on non-numeric values is undecidable; don't
            // exclude for it.
            ConstraintOp::Lt | ConstraintOp::Le | ConstraintOp::Gt | ConstraintOp::Ge => {
                return None
            }
        })
    }
}

/// Parse the usable constraints out of raw predicate strings, logging and
/// skipping what doesn't parse.
pub fn parse_all(raw: &[String]) -> Vec<Constraint> {
    raw.iter()
        .filter_map(|r| {
            let parsed = Constraint::parse(r);
            if parsed.is_none() {
                tracing::warn!(predicate = %r, "unparseable hard constraint skipped");
            }
            parsed
        })
        .collect()
}

fn first_number(text: &str) -> Option<f64> {
    let m = LEADING_NUMBER.find(text)?;
    m.as_str().replace(',', ".").parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card() -> Product {
        Product::new("p1", "RTX 4070")
            .with_price(899.0, "CHF")
            .with_spec("brand", "NVIDIA")
            .with_spec("memory", "12GB GDDR6X")
    }

    #[test]
    fn test_parse_forms() {
        let c = Constraint::parse("price < 900 CHF").unwrap();
        assert_eq!(c.attribute, "price");
        assert_eq!(c.op, ConstraintOp::Lt);
        assert_eq!(c.value, "900 CHF");

        let c = Constraint::parse("brand = NVIDIA").unwrap();
        assert_eq!(c.op, ConstraintOp::Eq);

        assert!(Constraint::parse("this is not a predicate at all ???").is_none());
    }

    #[test]
    fn test_numeric_comparison_ignores_units() {
        let c = Constraint::parse("price < 900 CHF").unwrap();
        assert_eq!(c.evaluate(&card()), Some(true));

        let c = Constraint::parse("price < 800 CHF").unwrap();
        assert_eq!(c.evaluate(&card()), Some(false));

        let c = Constraint::parse("memory >= 12GB").unwrap();
        assert_eq!(c.evaluate(&card()), Some(true));
    }

    #[test]
    fn test_string_equality_case_insensitive() {
        let c = Constraint::parse("brand = nvidia").unwrap();
        assert_eq!(c.evaluate(&card()), Some(true));

        let c = Constraint::parse("brand != AMD").unwrap();
        assert_eq!(c.evaluate(&card()), Some(true));
    }

    #[test]
    fn test_missing_spec_is_unknown() {
        let c = Constraint::parse("tdp < 200W").unwrap();
        assert_eq!(c.evaluate(&card()), None);
    }

    #[test]
    fn test_parse_all_skips_garbage() {
        let constraints = parse_all(&[
            "price < 900 CHF".to_string(),
            "gibberish".to_string(),
            "brand = NVIDIA".to_string(),
        ]);
        assert_eq!(constraints.len(), 2);
    }
}
