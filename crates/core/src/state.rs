//! Contract state enum for the purchase workflow

use serde::{Deserialize, Serialize};

/// State of the purchase contract.
///
/// The enum is closed: serialized contexts carrying anything else fail
/// validation at load time rather than flowing through as free strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContractState {
    /// Validate and normalize the product query.
    #[default]
    Start,
    /// Run the product search pipeline.
    Search,
    /// Ask the user to narrow an over-broad result set.
    RefineConstraints,
    /// Ask for soft preferences when none were given.
    CollectPreferences,
    /// Run the preference match pipeline.
    MatchPreferences,
    /// Present the ranked top three and await a selection.
    PresentOptions,
    /// Final yes/no before ordering.
    ConfirmPurchase,
    /// Call the checkout collaborator.
    CompleteOrder,
    /// Terminal: order placed.
    Completed,
    /// Terminal: user declined or a loop was detected.
    Cancelled,
    /// Terminal: the search produced nothing.
    NoResults,
}

impl ContractState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractState::Start => "start",
            ContractState::Search => "search",
            ContractState::RefineConstraints => "refine_constraints",
            ContractState::CollectPreferences => "collect_preferences",
            ContractState::MatchPreferences => "match_preferences",
            ContractState::PresentOptions => "present_options",
            ContractState::ConfirmPurchase => "confirm_purchase",
            ContractState::CompleteOrder => "complete_order",
            ContractState::Completed => "completed",
            ContractState::Cancelled => "cancelled",
            ContractState::NoResults => "no_results",
        }
    }

    /// Terminal states accept no further turns.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ContractState::Completed | ContractState::Cancelled | ContractState::NoResults
        )
    }

    /// States reachable from this one.
    ///
    /// `Cancelled` is additionally reachable from every non-terminal state
    /// through the loop detector, which bypasses this table.
    pub fn valid_transitions(&self) -> &'static [ContractState] {
        match self {
            ContractState::Start => &[ContractState::Search],
            ContractState::Search => &[
                ContractState::MatchPreferences,
                ContractState::RefineConstraints,
                ContractState::NoResults,
            ],
            ContractState::RefineConstraints => &[
                ContractState::Search,
                ContractState::MatchPreferences,
                ContractState::RefineConstraints,
            ],
            ContractState::CollectPreferences => &[
                ContractState::MatchPreferences,
                ContractState::CollectPreferences,
            ],
            ContractState::MatchPreferences => &[
                ContractState::PresentOptions,
                ContractState::CollectPreferences,
                ContractState::MatchPreferences,
            ],
            ContractState::PresentOptions => &[
                ContractState::ConfirmPurchase,
                ContractState::PresentOptions,
            ],
            ContractState::ConfirmPurchase => &[
                ContractState::CompleteOrder,
                ContractState::Cancelled,
                ContractState::ConfirmPurchase,
            ],
            ContractState::CompleteOrder => &[ContractState::Completed, ContractState::CompleteOrder],
            ContractState::Completed | ContractState::Cancelled | ContractState::NoResults => &[],
        }
    }

    /// Whether `to` is a legal next state, counting self-loops (a handler
    /// that stays put on error) and the forced cancellation path.
    pub fn can_transition_to(&self, to: ContractState) -> bool {
        if to == *self && !self.is_terminal() {
            return true;
        }
        if to == ContractState::Cancelled && !self.is_terminal() {
            return true;
        }
        self.valid_transitions().contains(&to)
    }
}

impl std::fmt::Display for ContractState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
