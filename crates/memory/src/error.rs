//! Memory subsystem errors

use concierge_core::CollaboratorError;

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// The redactor refused the content for durable storage. The caller
    /// must re-redact or drop it.
    #[error("content is not safe for the vector store; redact it first")]
    UnsafeContent,

    /// A backing collaborator failed.
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    /// A stored record could not be decoded.
    #[error("corrupt record in {store}: {message}")]
    Corrupt {
        store: &'static str,
        message: String,
    },
}

impl MemoryError {
    pub fn corrupt(store: &'static str, message: impl Into<String>) -> Self {
        Self::Corrupt {
            store,
            message: message.into(),
        }
    }
}
