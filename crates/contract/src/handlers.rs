//! State handlers for the purchase flow
//!
//! One handler per state. Handlers read the context and the user message
//! and return a [`StateTransition`]; they never mutate anything
//! themselves. A transition without an assistant message tells the
//! machine to keep driving within the same turn (start flows straight
//! into search, a confirmed purchase straight into checkout).

use std::sync::Arc;

use async_trait::async_trait;

use concierge_core::{
    CheckoutProvider, ContextPatch, ContractState, Deadline, PipelineStatus, SessionContext,
    StateTransition,
};
use concierge_pipeline::{PreferenceMatchPipeline, ProductSearchPipeline};

use crate::parsing;

/// Shared collaborators for every purchase handler.
pub struct PurchaseDeps {
    pub search_pipeline: Arc<ProductSearchPipeline>,
    pub match_pipeline: Arc<PreferenceMatchPipeline>,
    pub checkout: Arc<dyn CheckoutProvider>,
    /// Refinement rounds before matching is forced on the current items.
    pub max_refinements: u8,
}

/// A handler for one contract state.
#[async_trait]
pub trait StateHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: &SessionContext,
        message: &str,
        deadline: Deadline,
    ) -> StateTransition;
}

// ---------------------------------------------------------------------------
// start
// ---------------------------------------------------------------------------

pub struct StartHandler;

#[async_trait]
impl StateHandler for StartHandler {
    async fn handle(
        &self,
        ctx: &SessionContext,
        message: &str,
        _deadline: Deadline,
    ) -> StateTransition {
        let query = if ctx.product_query.is_empty() {
            parsing::normalize_query(message)
        } else {
            ctx.product_query.clone()
        };

        if query.is_empty() {
            return StateTransition::stay(ContractState::Start, "empty_query")
                .with_message("What would you like to buy?");
        }

        let fragments = parsing::parse_fragments(message);
        let mut patch = ContextPatch {
            product_query: Some(query),
            ..ContextPatch::default()
        };
        patch.push_hard_constraints = fragments.hard_constraints;
        patch.merge_soft_preferences = fragments.soft_preferences;

        // No message: the machine drives straight into the search.
        StateTransition::new(ContractState::Start, ContractState::Search, "query_normalized")
            .with_patch(patch)
    }
}

// ---------------------------------------------------------------------------
// search
// ---------------------------------------------------------------------------

pub struct SearchHandler {
    pub deps: Arc<PurchaseDeps>,
}

#[async_trait]
impl StateHandler for SearchHandler {
    async fn handle(
        &self,
        ctx: &SessionContext,
        _message: &str,
        deadline: Deadline,
    ) -> StateTransition {
        let outcome = self
            .deps
            .search_pipeline
            .run(&ctx.product_query, &ctx.hard_constraints, deadline)
            .await;

        let mut patch = ContextPatch::default();
        patch.push_pipeline_executions.push(outcome.execution.clone());

        match outcome.status {
            PipelineStatus::Ok | PipelineStatus::TooMany if outcome.items.is_empty() => {
                StateTransition::new(ContractState::Search, ContractState::NoResults, "zero_results")
                    .with_patch(patch)
                    .with_message(format!(
                        "I couldn't find anything matching \"{}\". You could start over \
                         with a different product.",
                        ctx.product_query
                    ))
            }
            PipelineStatus::Ok => {
                patch.search_results = Some(outcome.items.clone());
                patch.attribute_analysis = Some(outcome.attribute_analysis.clone());
                StateTransition::new(
                    ContractState::Search,
                    ContractState::MatchPreferences,
                    "results_within_gate",
                )
                .with_patch(patch)
                .with_message(format!(
                    "I found {} options for \"{}\". Any preferences, like brand, specs or budget?",
                    outcome.items.len(),
                    ctx.product_query
                ))
            }
            PipelineStatus::TooMany => {
                patch.search_results = Some(outcome.items.clone());
                patch.attribute_analysis = Some(outcome.attribute_analysis.clone());

                if ctx.refinement_attempts >= self.deps.max_refinements {
                    // Refinement is exhausted: match on what we have
                    // instead of asking again.
                    tracing::info!(
                        session_id = %ctx.session_id,
                        attempts = ctx.refinement_attempts,
                        "refinement cap reached, forcing preference match"
                    );
                    StateTransition::new(
                        ContractState::Search,
                        ContractState::MatchPreferences,
                        "refinement_cap_forced",
                    )
                    .with_patch(patch)
                } else {
                    patch.refinement_attempts = Some(ctx.refinement_attempts + 1);
                    let hints = render_attribute_hints(&outcome.attribute_analysis);
                    StateTransition::new(
                        ContractState::Search,
                        ContractState::RefineConstraints,
                        "too_many_results",
                    )
                    .with_patch(patch)
                    .with_message(format!(
                        "That search returns {} items, too many to compare. \
                         Could you narrow it down?{}",
                        outcome.items.len(),
                        hints
                    ))
                }
            }
            PipelineStatus::Degraded | PipelineStatus::Cancelled | PipelineStatus::Failed => {
                patch
                    .annotations
                    .insert("degraded".into(), serde_json::json!(true));
                StateTransition::stay(ContractState::Search, "search_degraded")
                    .with_patch(patch)
                    .with_message(
                        "Product search is unavailable right now. Please try again in a moment.",
                    )
            }
        }
    }
}

fn render_attribute_hints(
    analysis: &std::collections::BTreeMap<String, concierge_core::AttributeSummary>,
) -> String {
    if analysis.is_empty() {
        return String::new();
    }
    let hints: Vec<String> = analysis
        .iter()
        .take(4)
        .map(|(name, summary)| format!("{}: {}", name, summary.describe()))
        .collect();
    format!(" For example: {}.", hints.join("; "))
}

// ---------------------------------------------------------------------------
// refine_constraints
// ---------------------------------------------------------------------------

pub struct RefineConstraintsHandler;

#[async_trait]
impl StateHandler for RefineConstraintsHandler {
    async fn handle(
        &self,
        _ctx: &SessionContext,
        message: &str,
        _deadline: Deadline,
    ) -> StateTransition {
        let fragments = parsing::parse_fragments(message);
        if fragments.is_empty() {
            return StateTransition::stay(ContractState::RefineConstraints, "no_constraint_parsed")
                .with_message(
                    "I couldn't read a constraint from that. Try something like \
                     \"under 900 CHF\" or a brand name.",
                );
        }

        let mut patch = ContextPatch::default();
        patch.push_hard_constraints = fragments.hard_constraints;
        patch.merge_soft_preferences = fragments.soft_preferences;

        // Straight back into the search with the narrowed constraints.
        StateTransition::new(
            ContractState::RefineConstraints,
            ContractState::Search,
            "constraints_added",
        )
        .with_patch(patch)
    }
}

// ---------------------------------------------------------------------------
// collect_preferences
// ---------------------------------------------------------------------------

pub struct CollectPreferencesHandler;

#[async_trait]
impl StateHandler for CollectPreferencesHandler {
    async fn handle(
        &self,
        _ctx: &SessionContext,
        message: &str,
        _deadline: Deadline,
    ) -> StateTransition {
        let fragments = parsing::parse_fragments(message);
        if fragments.soft_preferences.is_empty() && fragments.hard_constraints.is_empty() {
            return StateTransition::stay(
                ContractState::CollectPreferences,
                "no_preferences_parsed",
            )
            .with_message(
                "What matters most to you? A brand, a spec like memory, or a budget?",
            );
        }

        let mut patch = ContextPatch::default();
        patch.push_hard_constraints = fragments.hard_constraints;
        patch.merge_soft_preferences = fragments.soft_preferences;

        StateTransition::new(
            ContractState::CollectPreferences,
            ContractState::MatchPreferences,
            "preferences_collected",
        )
        .with_patch(patch)
    }
}

// ---------------------------------------------------------------------------
// match_preferences
// ---------------------------------------------------------------------------

pub struct MatchPreferencesHandler {
    pub deps: Arc<PurchaseDeps>,
}

#[async_trait]
impl StateHandler for MatchPreferencesHandler {
    async fn handle(
        &self,
        ctx: &SessionContext,
        message: &str,
        deadline: Deadline,
    ) -> StateTransition {
        let fragments = parsing::parse_fragments(message);

        let mut preferences = ctx.soft_preferences.clone();
        preferences.extend(fragments.soft_preferences.clone());
        let mut constraints = ctx.hard_constraints.clone();
        constraints.extend(fragments.hard_constraints.clone());

        if preferences.is_empty() {
            let mut patch = ContextPatch::default();
            patch.push_hard_constraints = fragments.hard_constraints;
            return StateTransition::new(
                ContractState::MatchPreferences,
                ContractState::CollectPreferences,
                "preferences_missing",
            )
            .with_patch(patch)
            .with_message(
                "To pick the best options I need your preferences: \
                 a brand, a spec like memory, or a budget?",
            );
        }

        let outcome = self
            .deps
            .match_pipeline
            .run(&ctx.search_results, &constraints, &preferences, deadline)
            .await;

        let mut patch = ContextPatch::default();
        patch.push_hard_constraints = fragments.hard_constraints;
        patch.merge_soft_preferences = fragments.soft_preferences;
        patch.push_pipeline_executions.push(outcome.execution.clone());

        if outcome.ranked.is_empty() {
            return StateTransition::stay(ContractState::MatchPreferences, "nothing_compatible")
                .with_patch(patch)
                .with_message(
                    "None of the results satisfy all your constraints. \
                     Could you relax one of them?",
                );
        }

        patch.ranked_products = Some(outcome.ranked.clone());
        patch.search_results = Some(outcome.compatible.clone());

        let degraded_note = if outcome.status == PipelineStatus::Degraded {
            patch
                .annotations
                .insert("degraded".into(), serde_json::json!(true));
            " (based on partial data)"
        } else {
            ""
        };

        StateTransition::new(
            ContractState::MatchPreferences,
            ContractState::PresentOptions,
            "ranked",
        )
        .with_patch(patch)
        .with_message(format!(
            "Here are my top picks{}:\n{}\nWhich one would you like?",
            degraded_note,
            render_options(&outcome.ranked)
        ))
    }
}

fn render_options(options: &[concierge_core::Product]) -> String {
    options
        .iter()
        .enumerate()
        .map(|(i, p)| {
            format!(
                "{}. {} ({:.2} {})",
                i + 1,
                p.title,
                p.price_amount,
                p.price_currency
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// present_options
// ---------------------------------------------------------------------------

pub struct PresentOptionsHandler;

#[async_trait]
impl StateHandler for PresentOptionsHandler {
    async fn handle(
        &self,
        ctx: &SessionContext,
        message: &str,
        _deadline: Deadline,
    ) -> StateTransition {
        match parsing::parse_selection(message, &ctx.ranked_products) {
            Some(product) => {
                let mut patch = ContextPatch::default();
                patch.selected_product = Some(product.clone());
                StateTransition::new(
                    ContractState::PresentOptions,
                    ContractState::ConfirmPurchase,
                    "option_selected",
                )
                .with_patch(patch)
                .with_message(format!(
                    "{} at {:.2} {}. Shall I order it? (yes/no)",
                    product.title, product.price_amount, product.price_currency
                ))
            }
            None => StateTransition::stay(ContractState::PresentOptions, "selection_unclear")
                .with_message(format!(
                    "Which of these would you like?\n{}",
                    render_options(&ctx.ranked_products)
                )),
        }
    }
}

// ---------------------------------------------------------------------------
// confirm_purchase
// ---------------------------------------------------------------------------

pub struct ConfirmPurchaseHandler;

#[async_trait]
impl StateHandler for ConfirmPurchaseHandler {
    async fn handle(
        &self,
        ctx: &SessionContext,
        message: &str,
        _deadline: Deadline,
    ) -> StateTransition {
        match parsing::parse_confirmation(message) {
            Some(true) => {
                // No message: the machine drives straight into checkout.
                StateTransition::new(
                    ContractState::ConfirmPurchase,
                    ContractState::CompleteOrder,
                    "confirmed",
                )
            }
            Some(false) => StateTransition::new(
                ContractState::ConfirmPurchase,
                ContractState::Cancelled,
                "declined",
            )
            .with_message("Okay, I've cancelled the purchase. Nothing was ordered."),
            None => StateTransition::stay(ContractState::ConfirmPurchase, "confirmation_unclear")
                .with_message(
                    "Just to be sure: should I place the order? Please answer yes or no.",
                ),
        }
    }
}

// ---------------------------------------------------------------------------
// complete_order
// ---------------------------------------------------------------------------

pub struct CompleteOrderHandler {
    pub deps: Arc<PurchaseDeps>,
}

#[async_trait]
impl StateHandler for CompleteOrderHandler {
    async fn handle(
        &self,
        ctx: &SessionContext,
        _message: &str,
        deadline: Deadline,
    ) -> StateTransition {
        let Some(product) = &ctx.selected_product else {
            return StateTransition::stay(ContractState::CompleteOrder, "no_selection")
                .with_message("I've lost track of your selection. Please pick an option again.");
        };

        match self
            .deps
            .checkout
            .place_order(&ctx.session_id, product, deadline)
            .await
        {
            Ok(receipt) => {
                let mut patch = ContextPatch::default();
                patch.order_id = Some(receipt.order_id.clone());
                StateTransition::new(
                    ContractState::CompleteOrder,
                    ContractState::Completed,
                    "order_placed",
                )
                .with_patch(patch)
                .with_message(format!(
                    "Done! I've ordered {}. Your order id is {}.",
                    product.title, receipt.order_id
                ))
            }
            Err(err) if err.is_deadline() => {
                // The order may or may not have been placed; never retry
                // a mutating call. The orchestrator records a
                // compensating audit entry off this annotation.
                tracing::error!(
                    session_id = %ctx.session_id,
                    error = %err,
                    "checkout deadline expired with unknown outcome"
                );
                let mut patch = ContextPatch::default();
                patch
                    .annotations
                    .insert("compensation_required".into(), serde_json::json!(true));
                StateTransition::stay(ContractState::CompleteOrder, "checkout_unknown")
                    .with_patch(patch)
                    .with_message(
                        "Checkout took too long and I can't confirm the order yet. \
                         I've flagged it for review; please don't order again.",
                    )
            }
            Err(err) => {
                tracing::warn!(session_id = %ctx.session_id, error = %err, "checkout failed");
                StateTransition::stay(ContractState::CompleteOrder, "checkout_failed")
                    .with_message(
                        "Checkout is unavailable right now. Your selection is saved; \
                         say \"yes\" in a moment to try again.",
                    )
            }
        }
    }
}
