//! Contract errors
//!
//! Most failures never surface here: handlers absorb pipeline and
//! collaborator errors into stay-in-place transitions with a
//! user-visible message. What remains are structural problems the
//! orchestrator must handle.

use concierge_core::ContractState;

#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    /// A turn arrived for a session already in a terminal state.
    #[error("contract is finished (state {0})")]
    Terminal(ContractState),

    /// A handler emitted a transition the state table forbids.
    #[error("illegal transition {from} -> {to}")]
    IllegalTransition {
        from: ContractState,
        to: ContractState,
    },

    /// No contract is registered under this id.
    #[error("unknown contract: {0}")]
    Unknown(String),
}
