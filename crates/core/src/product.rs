//! Product catalog types

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A product candidate flowing through the search and matching pipelines.
///
/// Equality and hashing are by `id` only: two records describing the same
/// catalog item compare equal even when one carries enriched specs or a
/// ranking score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub title: String,
    pub price_amount: f64,
    pub price_currency: String,
    pub url: String,
    /// Structured specs, enriched by the spec scrape stage. Missing keys
    /// are allowed; the hard filter treats them conservatively.
    #[serde(default)]
    pub specs: BTreeMap<String, String>,
    /// Soft-preference ranking score in [0, 1], set by the soft rank stage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

impl Product {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            price_amount: 0.0,
            price_currency: "CHF".to_string(),
            url: String::new(),
            specs: BTreeMap::new(),
            score: None,
        }
    }

    pub fn with_price(mut self, amount: f64, currency: impl Into<String>) -> Self {
        self.price_amount = amount;
        self.price_currency = currency.into();
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_spec(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.specs.insert(key.into(), value.into());
        self
    }

    /// Spec lookup, falling back to well-known intrinsic fields.
    pub fn spec(&self, key: &str) -> Option<String> {
        match key {
            "price" => Some(format!("{:.2}", self.price_amount)),
            "currency" => Some(self.price_currency.clone()),
            "title" => Some(self.title.clone()),
            _ => self.specs.get(key).cloned(),
        }
    }
}

impl PartialEq for Product {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Product {}

impl std::hash::Hash for Product {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Summary of one candidate attribute across a result set, produced by the
/// attribute analysis stage and used to phrase refinement prompts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AttributeSummary {
    /// Numeric attribute with an observed range.
    Range {
        min: f64,
        max: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        unit: Option<String>,
    },
    /// Categorical attribute with the observed value set.
    Set { values: Vec<String> },
}

impl AttributeSummary {
    /// Human-readable rendering for refinement prompts.
    pub fn describe(&self) -> String {
        match self {
            AttributeSummary::Range { min, max, unit } => match unit {
                Some(u) => format!("{:.0}–{:.0} {}", min, max, u),
                None => format!("{:.0}–{:.0}", min, max),
            },
            AttributeSummary::Set { values } => values.join(", "),
        }
    }
}
