//! Session context
//!
//! The single mutable record a contract session owns. It is loaded,
//! patched, and persisted by the orchestrator once per turn; nothing else
//! writes it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::execution::PipelineExecution;
use crate::product::{AttributeSummary, Product};
use crate::state::ContractState;

/// Current schema version for serialized contexts. Loads with an older
/// version go through the store's upgrader; newer versions are rejected.
pub const CONTEXT_SCHEMA_VERSION: u32 = 2;

/// Everything the purchase contract knows about one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: String,
    /// Absent for anonymous sessions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub state: ContractState,
    /// Which registered contract drives this session. Set when the
    /// router first dispatches into a contract.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_id: Option<String>,
    #[serde(default)]
    pub product_query: String,
    /// Ordered predicate strings, e.g. `"price < 900 CHF"`.
    #[serde(default)]
    pub hard_constraints: Vec<String>,
    /// Weighted desires; insertion order is irrelevant so a sorted map
    /// keeps serialization deterministic.
    #[serde(default)]
    pub soft_preferences: BTreeMap<String, String>,
    #[serde(default)]
    pub search_results: Vec<Product>,
    #[serde(default)]
    pub attribute_analysis: BTreeMap<String, AttributeSummary>,
    #[serde(default)]
    pub ranked_products: Vec<Product>,
    /// Selection made in `present_options`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_product: Option<Product>,
    /// Set by `complete_order` on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(default)]
    pub refinement_attempts: u8,
    #[serde(default)]
    pub pipeline_executions: Vec<PipelineExecution>,
    pub schema_version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>, user_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            user_id,
            state: ContractState::default(),
            contract_id: None,
            product_query: String::new(),
            hard_constraints: Vec::new(),
            soft_preferences: BTreeMap::new(),
            search_results: Vec::new(),
            attribute_analysis: BTreeMap::new(),
            ranked_products: Vec::new(),
            selected_product: None,
            order_id: None,
            refinement_attempts: 0,
            pipeline_executions: Vec::new(),
            schema_version: CONTEXT_SCHEMA_VERSION,
            created_at: now,
            updated_at: now,
        }
    }

    /// Bump the modification timestamp. Called by the store on save.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// View with user-authored free text removed, for the
    /// `get_current_contract` surface.
    pub fn redacted_view(&self) -> serde_json::Value {
        serde_json::json!({
            "session_id": self.session_id,
            "state": self.state,
            "contract_id": self.contract_id,
            "hard_constraints": self.hard_constraints,
            "soft_preferences": self.soft_preferences,
            "result_count": self.search_results.len(),
            "ranked_count": self.ranked_products.len(),
            "refinement_attempts": self.refinement_attempts,
            "order_id": self.order_id,
            "updated_at": self.updated_at,
        })
    }
}
