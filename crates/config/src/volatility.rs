//! Runtime-updatable volatility keyword sets
//!
//! The router's pre-pass categorizes queries by keyword. Operators tune
//! these sets at runtime through the settings surface; readers always see
//! an immutable snapshot, so a concurrent update never tears a
//! classification.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// One immutable set of keyword lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolatilityKeywords {
    pub volatile: Vec<String>,
    pub semi_static: Vec<String>,
    #[serde(rename = "static")]
    pub static_terms: Vec<String>,
}

impl Default for VolatilityKeywords {
    fn default() -> Self {
        Self {
            volatile: vec_of(&[
                "current", "today", "now", "latest", "breaking", "price", "stock", "weather",
                "score", "minister", "president", "chancellor", "ceo", "exchange rate",
            ]),
            semi_static: vec_of(&[
                "lineup", "model year", "policy", "version", "release", "schedule", "roadmap",
                "opening hours",
            ]),
            static_terms: vec_of(&[
                "history", "was", "were", "founded", "born", "died", "capital", "definition",
                "meaning", "invented", "origin",
            ]),
        }
    }
}

fn vec_of(terms: &[&str]) -> Vec<String> {
    terms.iter().map(|t| t.to_string()).collect()
}

impl VolatilityKeywords {
    /// Normalize every term to lowercase, trimming empties.
    fn normalized(mut self) -> Self {
        for list in [
            &mut self.volatile,
            &mut self.semi_static,
            &mut self.static_terms,
        ] {
            list.iter_mut().for_each(|t| *t = t.trim().to_lowercase());
            list.retain(|t| !t.is_empty());
        }
        self
    }
}

/// Holder handing out snapshots of the current keyword sets.
pub struct VolatilityStore {
    current: RwLock<Arc<VolatilityKeywords>>,
}

impl VolatilityStore {
    pub fn new(keywords: VolatilityKeywords) -> Self {
        Self {
            current: RwLock::new(Arc::new(keywords.normalized())),
        }
    }

    /// The current sets. The snapshot stays valid across later updates.
    pub fn snapshot(&self) -> Arc<VolatilityKeywords> {
        self.current.read().clone()
    }

    /// Swap in new sets. In-flight readers keep their old snapshot.
    pub fn replace(&self, keywords: VolatilityKeywords) {
        let keywords = keywords.normalized();
        tracing::info!(
            volatile = keywords.volatile.len(),
            semi_static = keywords.semi_static.len(),
            static_terms = keywords.static_terms.len(),
            "volatility keyword sets replaced"
        );
        *self.current.write() = Arc::new(keywords);
    }
}

impl Default for VolatilityStore {
    fn default() -> Self {
        Self::new(VolatilityKeywords::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_survives_replace() {
        let store = VolatilityStore::default();
        let before = store.snapshot();

        store.replace(VolatilityKeywords {
            volatile: vec!["fresh".into()],
            semi_static: vec![],
            static_terms: vec![],
        });

        // Old snapshot unchanged, new snapshot reflects the update.
        assert!(before.volatile.contains(&"current".to_string()));
        let after = store.snapshot();
        assert_eq!(after.volatile, vec!["fresh".to_string()]);
    }

    #[test]
    fn test_terms_normalized() {
        let store = VolatilityStore::new(VolatilityKeywords {
            volatile: vec!["  Current ".into(), "".into()],
            semi_static: vec![],
            static_terms: vec!["WAS".into()],
        });
        let snap = store.snapshot();
        assert_eq!(snap.volatile, vec!["current".to_string()]);
        assert_eq!(snap.static_terms, vec!["was".to_string()]);
    }

    #[test]
    fn test_static_serde_name() {
        let json = serde_json::to_value(VolatilityKeywords {
            volatile: vec![],
            semi_static: vec![],
            static_terms: vec!["history".into()],
        })
        .unwrap();
        assert!(json.get("static").is_some());
    }
}
