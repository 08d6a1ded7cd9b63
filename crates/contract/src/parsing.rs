//! User-utterance parsing for the purchase flow
//!
//! Deterministic extraction of the few things the handlers need from
//! free text: the product query, constraint and preference fragments,
//! option selections, and yes/no confirmations. Anything fancier is the
//! router's job.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

use concierge_core::Product;

/// Lead-ins stripped from a purchase query.
const QUERY_LEAD_INS: &[&str] = &[
    "i want to buy",
    "i'd like to buy",
    "i would like to buy",
    "i want to order",
    "i need to buy",
    "help me buy",
    "i want",
    "i need",
    "buy me",
    "buy",
    "purchase",
    "order",
];

/// Normalize the opening message into a product query.
pub fn normalize_query(message: &str) -> String {
    let mut query = message.trim().trim_end_matches(['.', '!', '?']).to_string();
    let lowered = query.to_lowercase();
    for lead_in in QUERY_LEAD_INS {
        if lowered.starts_with(lead_in) {
            query = query[lead_in.len()..].trim_start().to_string();
            break;
        }
    }
    // Drop a leading article.
    for article in ["a ", "an ", "the ", "some "] {
        if query.to_lowercase().starts_with(article) {
            query = query[article.len()..].to_string();
            break;
        }
    }
    query.trim().to_string()
}

static PRICE_CAP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:under|below|less than|at most|max\.?|up to)\s*(\d+(?:'|\s)?\d*)\s*(chf|eur|usd|francs?)?")
        .unwrap()
});

static PRICE_FLOOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:over|above|more than|at least|min\.?)\s*(\d+(?:'|\s)?\d*)\s*(chf|eur|usd|francs?)?")
        .unwrap()
});

static MEMORY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(\d+)\s*(gb|tb)\b").unwrap());

const BRANDS: &[&str] = &[
    "nvidia", "amd", "intel", "asus", "msi", "gigabyte", "evga", "sapphire", "zotac", "palit",
    "apple", "samsung", "logitech", "corsair", "lenovo", "dell", "hp",
];

/// Fragments parsed out of a refinement or preference utterance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFragments {
    /// New hard-constraint predicate strings.
    pub hard_constraints: Vec<String>,
    /// New soft preferences.
    pub soft_preferences: BTreeMap<String, String>,
}

impl ParsedFragments {
    pub fn is_empty(&self) -> bool {
        self.hard_constraints.is_empty() && self.soft_preferences.is_empty()
    }
}

/// Pull constraint and preference fragments out of a message like
/// "NVIDIA, 12GB, under 900 CHF".
pub fn parse_fragments(message: &str) -> ParsedFragments {
    let mut fragments = ParsedFragments::default();
    let lowered = message.to_lowercase();

    if let Some(captures) = PRICE_CAP.captures(&lowered) {
        let amount = captures[1].replace(['\'', ' '], "");
        let currency = captures
            .get(2)
            .map(|c| c.as_str().to_uppercase())
            .unwrap_or_else(|| "CHF".to_string());
        fragments
            .hard_constraints
            .push(format!("price < {} {}", amount, currency));
    }
    if let Some(captures) = PRICE_FLOOR.captures(&lowered) {
        let amount = captures[1].replace(['\'', ' '], "");
        let currency = captures
            .get(2)
            .map(|c| c.as_str().to_uppercase())
            .unwrap_or_else(|| "CHF".to_string());
        fragments
            .hard_constraints
            .push(format!("price > {} {}", amount, currency));
    }

    if let Some(captures) = MEMORY.captures(&lowered) {
        fragments.soft_preferences.insert(
            "memory".to_string(),
            format!("{}{}", &captures[1], captures[2].to_uppercase()),
        );
    }

    for brand in BRANDS {
        if lowered
            .split(|c: char| !c.is_alphanumeric())
            .any(|w| w == *brand)
        {
            fragments
                .soft_preferences
                .insert("brand".to_string(), brand.to_uppercase());
            break;
        }
    }

    fragments
}

static ORDINAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(first|second|third|1st|2nd|3rd|[123])\b").unwrap());

/// Resolve a selection utterance against the presented options.
pub fn parse_selection<'a>(message: &str, options: &'a [Product]) -> Option<&'a Product> {
    if options.is_empty() {
        return None;
    }

    if let Some(captures) = ORDINAL.captures(message) {
        let index = match captures[1].to_lowercase().as_str() {
            "first" | "1st" | "1" => 0,
            "second" | "2nd" | "2" => 1,
            "third" | "3rd" | "3" => 2,
            _ => return None,
        };
        return options.get(index);
    }

    // Title match: the option whose title shares the most words with the
    // message wins, provided it shares any.
    let lowered = message.to_lowercase();
    options
        .iter()
        .map(|option| {
            let overlap = option
                .title
                .to_lowercase()
                .split_whitespace()
                .filter(|w| w.len() > 2 && lowered.contains(*w))
                .count();
            (option, overlap)
        })
        .filter(|(_, overlap)| *overlap > 0)
        .max_by_key(|(_, overlap)| *overlap)
        .map(|(option, _)| option)
}

/// Three-valued confirmation parse.
pub fn parse_confirmation(message: &str) -> Option<bool> {
    let lowered = message.trim().to_lowercase();
    const YES: &[&str] = &["yes", "yep", "yeah", "sure", "ok", "okay", "confirm", "go ahead", "ja"];
    const NO: &[&str] = &["no", "nope", "cancel", "abort", "stop", "don't", "nein"];

    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .collect();

    if NO.iter().any(|n| words.contains(n)) {
        return Some(false);
    }
    if YES.iter().any(|y| words.contains(y)) {
        return Some(true);
    }
    None
}
