//! Contract registry
//!
//! Read-mostly: contracts register at startup (or on deployment events)
//! and the router assembles its manifest from the live entries on every
//! classification.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::machine::Contract;

/// What the router needs to know about a contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractInfo {
    pub id: String,
    pub description: String,
    pub trigger_keywords: Vec<String>,
}

/// Registry of runnable contracts.
#[derive(Default)]
pub struct ContractRegistry {
    entries: RwLock<HashMap<String, Arc<dyn Contract>>>,
}

impl ContractRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, contract: Arc<dyn Contract>) {
        let info = contract.info();
        tracing::info!(contract = %info.id, "contract registered");
        self.entries.write().insert(info.id, contract);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Contract>> {
        self.entries.read().get(id).cloned()
    }

    pub fn has(&self, id: &str) -> bool {
        self.entries.read().contains_key(id)
    }

    /// Manifest entries for the router.
    pub fn infos(&self) -> Vec<ContractInfo> {
        let mut infos: Vec<ContractInfo> =
            self.entries.read().values().map(|c| c.info()).collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }
}
