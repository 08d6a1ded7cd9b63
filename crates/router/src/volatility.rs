//! Volatility pre-pass
//!
//! A pure function over the user text and the current keyword snapshot.
//! No model involved: this is the deterministic half of routing, and the
//! half the websearch override trusts.

use std::collections::HashSet;

use chrono::{Datelike, Utc};
use unicode_segmentation::UnicodeSegmentation;

use concierge_config::VolatilityKeywords;
use concierge_core::Volatility;

/// Phrases that signal the user wants the answer as of now.
const TEMPORAL_CUES: &[&str] = &["today", "now", "latest", "current", "as of"];

/// Output of the pre-pass.
#[derive(Debug, Clone, PartialEq)]
pub struct VolatilityAssessment {
    pub volatility: Volatility,
    pub temporal_cue: bool,
    pub matched_terms: Vec<String>,
}

/// Classify `text` against the keyword snapshot.
///
/// Each set scores by matched terms; the best-scoring set wins, with
/// volatile winning ties (the safe direction for the websearch override).
/// No match at all yields `Unknown`.
pub fn classify_volatility(text: &str, keywords: &VolatilityKeywords) -> VolatilityAssessment {
    let lowered = text.to_lowercase();
    let words: HashSet<&str> = lowered.unicode_words().collect();

    let volatile = matches_in(&lowered, &words, &keywords.volatile);
    let semi_static = matches_in(&lowered, &words, &keywords.semi_static);
    let static_terms = matches_in(&lowered, &words, &keywords.static_terms);

    let (volatility, matched_terms) = if !volatile.is_empty()
        && volatile.len() >= semi_static.len()
        && volatile.len() >= static_terms.len()
    {
        (Volatility::Volatile, volatile)
    } else if !semi_static.is_empty() && semi_static.len() >= static_terms.len() {
        (Volatility::SemiStatic, semi_static)
    } else if !static_terms.is_empty() {
        (Volatility::Static, static_terms)
    } else {
        (Volatility::Unknown, Vec::new())
    };

    VolatilityAssessment {
        volatility,
        temporal_cue: has_temporal_cue(&lowered, &words),
        matched_terms,
    }
}

/// Terms from `set` present in the text. Single words match on word
/// boundaries; multi-word terms match as substrings.
fn matches_in(lowered: &str, words: &HashSet<&str>, set: &[String]) -> Vec<String> {
    set.iter()
        .filter(|term| {
            if term.contains(' ') {
                lowered.contains(term.as_str())
            } else {
                words.contains(term.as_str())
            }
        })
        .cloned()
        .collect()
}

fn has_temporal_cue(lowered: &str, words: &HashSet<&str>) -> bool {
    for cue in TEMPORAL_CUES {
        let hit = if cue.contains(' ') {
            lowered.contains(cue)
        } else {
            words.contains(cue)
        };
        if hit {
            return true;
        }
    }

    // A 4-digit year equal to the current or following year also counts.
    let this_year = Utc::now().year();
    words.iter().any(|w| {
        w.len() == 4
            && w.chars().all(|c| c.is_ascii_digit())
            && w.parse::<i32>()
                .map(|y| y == this_year || y == this_year + 1)
                .unwrap_or(false)
    })
}
