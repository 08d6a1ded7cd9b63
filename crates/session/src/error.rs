//! Session store errors

use concierge_core::CollaboratorError;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// An invariant failed in S1; nothing was written.
    #[error("session context failed validation: {0}")]
    Validation(String),

    /// The read-back check (S4) saw different data than was written,
    /// twice in a row: something else is writing this session.
    #[error("conflicting writer detected for session {session_id}")]
    Conflict { session_id: String },

    /// The serialized context carries a schema version this build cannot
    /// load.
    #[error("unsupported context schema version {found} (supported ≤ {supported})")]
    SchemaVersion { found: u32, supported: u32 },

    /// The stored blob does not decode.
    #[error("corrupt session record: {0}")]
    Corrupt(String),

    /// The durable backend failed.
    #[error(transparent)]
    Io(#[from] CollaboratorError),
}
