//! Orchestrator errors

use concierge_contract::ContractError;
use concierge_core::CollaboratorError;
use concierge_memory::MemoryError;
use concierge_session::SessionError;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The per-session queue or the global turn cap is full. The caller
    /// should retry after a short delay; nothing was enqueued.
    #[error("session is busy, retry later")]
    Busy,

    /// Session persistence failed after the reply was computed; the turn
    /// is aborted so no reply can claim persistent progress.
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Contract(#[from] ContractError),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}
