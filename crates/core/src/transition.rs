//! State transitions and context patches
//!
//! Contract handlers never mutate the session context directly. They
//! return a [`StateTransition`] carrying a [`ContextPatch`]; the
//! orchestrator applies the patch only after the store has accepted the
//! save. This is what keeps the store's read-back check sufficient.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::execution::PipelineExecution;
use crate::product::{AttributeSummary, Product};
use crate::session::SessionContext;
use crate::state::ContractState;

/// The set of changes a handler wants applied to the session context.
///
/// Absent fields leave the context untouched; `push_*` fields append,
/// `merge_*` fields union.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hard_constraints: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub push_hard_constraints: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub merge_soft_preferences: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_results: Option<Vec<Product>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute_analysis: Option<BTreeMap<String, AttributeSummary>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ranked_products: Option<Vec<Product>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_product: Option<Product>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refinement_attempts: Option<u8>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub push_pipeline_executions: Vec<PipelineExecution>,
    /// Free-form diagnostic annotations (loop diagnostics, degradation
    /// notes). Not merged into the context, recorded on the transition only.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, serde_json::Value>,
}

impl ContextPatch {
    pub fn is_empty(&self) -> bool {
        *self == ContextPatch::default()
    }

    /// Fold `later` over this patch: scalar fields take the later value,
    /// `push_*` fields concatenate, maps union. Applying the merged patch
    /// equals applying both patches in order.
    pub fn merge(mut self, later: ContextPatch) -> ContextPatch {
        if later.product_query.is_some() {
            self.product_query = later.product_query;
        }
        if later.hard_constraints.is_some() {
            self.hard_constraints = later.hard_constraints;
            self.push_hard_constraints.clear();
        }
        self.push_hard_constraints.extend(later.push_hard_constraints);
        self.merge_soft_preferences.extend(later.merge_soft_preferences);
        if later.search_results.is_some() {
            self.search_results = later.search_results;
        }
        if later.attribute_analysis.is_some() {
            self.attribute_analysis = later.attribute_analysis;
        }
        if later.ranked_products.is_some() {
            self.ranked_products = later.ranked_products;
        }
        if later.selected_product.is_some() {
            self.selected_product = later.selected_product;
        }
        if later.order_id.is_some() {
            self.order_id = later.order_id;
        }
        if later.refinement_attempts.is_some() {
            self.refinement_attempts = later.refinement_attempts;
        }
        self.push_pipeline_executions
            .extend(later.push_pipeline_executions);
        self.annotations.extend(later.annotations);
        self
    }

    /// Apply this patch to a context. Only the orchestrator calls this,
    /// after persistence has succeeded.
    pub fn apply(&self, ctx: &mut SessionContext) {
        if let Some(q) = &self.product_query {
            ctx.product_query = q.clone();
        }
        if let Some(hc) = &self.hard_constraints {
            ctx.hard_constraints = hc.clone();
        }
        ctx.hard_constraints
            .extend(self.push_hard_constraints.iter().cloned());
        for (k, v) in &self.merge_soft_preferences {
            ctx.soft_preferences.insert(k.clone(), v.clone());
        }
        if let Some(results) = &self.search_results {
            ctx.search_results = results.clone();
        }
        if let Some(analysis) = &self.attribute_analysis {
            ctx.attribute_analysis = analysis.clone();
        }
        if let Some(ranked) = &self.ranked_products {
            ctx.ranked_products = ranked.clone();
        }
        if let Some(selected) = &self.selected_product {
            ctx.selected_product = Some(selected.clone());
        }
        if let Some(order_id) = &self.order_id {
            ctx.order_id = Some(order_id.clone());
        }
        if let Some(attempts) = self.refinement_attempts {
            ctx.refinement_attempts = attempts;
        }
        ctx.pipeline_executions
            .extend(self.push_pipeline_executions.iter().cloned());
    }
}

/// Value object describing the outcome of one contract turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from_state: ContractState,
    pub to_state: ContractState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant_message: Option<String>,
    #[serde(default)]
    pub context_patch: ContextPatch,
    /// What caused the transition, for the audit trail.
    pub trigger: String,
    pub emitted_at: DateTime<Utc>,
}

impl StateTransition {
    pub fn new(from: ContractState, to: ContractState, trigger: impl Into<String>) -> Self {
        Self {
            from_state: from,
            to_state: to,
            assistant_message: None,
            context_patch: ContextPatch::default(),
            trigger: trigger.into(),
            emitted_at: Utc::now(),
        }
    }

    /// A transition that stays in place, used by handlers on recoverable
    /// errors.
    pub fn stay(state: ContractState, trigger: impl Into<String>) -> Self {
        Self::new(state, state, trigger)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.assistant_message = Some(message.into());
        self
    }

    pub fn with_patch(mut self, patch: ContextPatch) -> Self {
        self.context_patch = patch;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_apply_merges() {
        let mut ctx = SessionContext::new("s-1", None);
        ctx.hard_constraints.push("price < 900 CHF".into());

        let mut patch = ContextPatch::default();
        patch.push_hard_constraints.push("brand = NVIDIA".into());
        patch
            .merge_soft_preferences
            .insert("quiet".into(), "preferred".into());
        patch.refinement_attempts = Some(1);
        patch.apply(&mut ctx);

        assert_eq!(ctx.hard_constraints.len(), 2);
        assert_eq!(ctx.soft_preferences.get("quiet").unwrap(), "preferred");
        assert_eq!(ctx.refinement_attempts, 1);
    }

    #[test]
    fn test_empty_patch_is_noop() {
        let mut ctx = SessionContext::new("s-1", None);
        ctx.product_query = "graphics card".into();
        let before = ctx.clone();

        let patch = ContextPatch::default();
        assert!(patch.is_empty());
        patch.apply(&mut ctx);
        assert_eq!(ctx, before);
    }

    #[test]
    fn test_stay_transition() {
        let t = StateTransition::stay(ContractState::Search, "io_error");
        assert_eq!(t.from_state, t.to_state);
        assert!(t.context_patch.is_empty());
    }
}
