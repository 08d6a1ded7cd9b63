//! The purchase contract machine

use std::sync::Arc;

use async_trait::async_trait;

use concierge_core::{ContextPatch, Deadline, SessionContext, StateTransition};

use crate::error::ContractError;
use crate::handlers::{
    CollectPreferencesHandler, CompleteOrderHandler, ConfirmPurchaseHandler,
    MatchPreferencesHandler, PresentOptionsHandler, PurchaseDeps, RefineConstraintsHandler,
    SearchHandler, StartHandler, StateHandler,
};
use crate::registry::ContractInfo;

/// A runnable multi-turn contract.
#[async_trait]
pub trait Contract: Send + Sync {
    fn info(&self) -> ContractInfo;

    /// Drive one user turn. The returned transition aggregates every
    /// state the machine moved through this turn; its patch is applied
    /// by the orchestrator only after the save commits.
    async fn handle_turn(
        &self,
        ctx: &SessionContext,
        user_message: &str,
        deadline: Deadline,
    ) -> Result<StateTransition, ContractError>;
}

/// States the machine may chain through in one turn. Generous: a real
/// turn needs at most four (refine -> search -> match -> present).
const MAX_CHAIN: usize = 5;

/// The guided purchase contract.
pub struct PurchaseContract {
    start: StartHandler,
    search: SearchHandler,
    refine: RefineConstraintsHandler,
    collect: CollectPreferencesHandler,
    match_preferences: MatchPreferencesHandler,
    present: PresentOptionsHandler,
    confirm: ConfirmPurchaseHandler,
    complete: CompleteOrderHandler,
}

impl PurchaseContract {
    pub fn new(deps: Arc<PurchaseDeps>) -> Self {
        Self {
            start: StartHandler,
            search: SearchHandler { deps: deps.clone() },
            refine: RefineConstraintsHandler,
            collect: CollectPreferencesHandler,
            match_preferences: MatchPreferencesHandler { deps: deps.clone() },
            present: PresentOptionsHandler,
            confirm: ConfirmPurchaseHandler,
            complete: CompleteOrderHandler { deps },
        }
    }

    fn handler_for(&self, state: concierge_core::ContractState) -> Option<&dyn StateHandler> {
        use concierge_core::ContractState::*;
        match state {
            Start => Some(&self.start),
            Search => Some(&self.search),
            RefineConstraints => Some(&self.refine),
            CollectPreferences => Some(&self.collect),
            MatchPreferences => Some(&self.match_preferences),
            PresentOptions => Some(&self.present),
            ConfirmPurchase => Some(&self.confirm),
            CompleteOrder => Some(&self.complete),
            Completed | Cancelled | NoResults => None,
        }
    }
}

#[async_trait]
impl Contract for PurchaseContract {
    fn info(&self) -> ContractInfo {
        ContractInfo {
            id: "purchase".to_string(),
            description: "Guided product purchase: search, narrow down, rank by preference, \
                          confirm and order"
                .to_string(),
            trigger_keywords: vec![
                "buy".to_string(),
                "purchase".to_string(),
                "order".to_string(),
                "shopping".to_string(),
            ],
        }
    }

    async fn handle_turn(
        &self,
        ctx: &SessionContext,
        user_message: &str,
        deadline: Deadline,
    ) -> Result<StateTransition, ContractError> {
        if ctx.state.is_terminal() {
            return Err(ContractError::Terminal(ctx.state));
        }

        let origin = ctx.state;
        let mut working = ctx.clone();
        let mut merged = ContextPatch::default();
        let mut trail: Vec<serde_json::Value> = Vec::new();
        let mut message = None;
        let mut trigger = String::new();

        for _ in 0..MAX_CHAIN {
            let Some(handler) = self.handler_for(working.state) else {
                break;
            };

            let transition = handler.handle(&working, user_message, deadline).await;
            if !working.state.can_transition_to(transition.to_state) {
                return Err(ContractError::IllegalTransition {
                    from: working.state,
                    to: transition.to_state,
                });
            }

            tracing::debug!(
                session_id = %ctx.session_id,
                from = %transition.from_state,
                to = %transition.to_state,
                trigger = %transition.trigger,
                "contract transition"
            );
            trail.push(serde_json::json!({
                "from": transition.from_state,
                "to": transition.to_state,
                "trigger": transition.trigger,
            }));

            let stalled = transition.to_state == transition.from_state;
            transition.context_patch.apply(&mut working);
            working.state = transition.to_state;
            merged = merged.merge(transition.context_patch);
            trigger = transition.trigger;
            if transition.assistant_message.is_some() {
                message = transition.assistant_message;
            }

            if message.is_some() || stalled || working.state.is_terminal() {
                break;
            }
        }

        let mut aggregate = StateTransition::new(origin, working.state, trigger);
        aggregate.assistant_message = message;
        aggregate.context_patch = merged;
        aggregate
            .context_patch
            .annotations
            .insert("transition_trail".to_string(), serde_json::json!(trail));
        Ok(aggregate)
    }
}
