//! Shared error type for collaborator calls
//!
//! Every external system (LLM, product search, vector database, durable
//! stores) is reached through a trait in [`crate::traits`]; those traits
//! all surface failures as [`CollaboratorError`] so callers can apply one
//! degradation policy regardless of which dependency failed.

use std::time::Duration;

/// Failure of a call to an external collaborator.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CollaboratorError {
    /// The collaborator failed or was unreachable.
    #[error("i/o failure in {collaborator}: {message}")]
    Io {
        collaborator: &'static str,
        message: String,
    },

    /// The per-turn deadline expired before the call completed.
    #[error("deadline expired calling {collaborator} (budget {budget:?})")]
    Timeout {
        collaborator: &'static str,
        budget: Duration,
    },

    /// The call was cancelled before it was issued.
    #[error("call to {collaborator} cancelled before dispatch")]
    Cancelled { collaborator: &'static str },

    /// The caller is not allowed to perform this operation.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The collaborator replied with something the core cannot parse.
    #[error("malformed reply from {collaborator}: {message}")]
    Malformed {
        collaborator: &'static str,
        message: String,
    },
}

impl CollaboratorError {
    pub fn io(collaborator: &'static str, message: impl Into<String>) -> Self {
        Self::Io {
            collaborator,
            message: message.into(),
        }
    }

    pub fn malformed(collaborator: &'static str, message: impl Into<String>) -> Self {
        Self::Malformed {
            collaborator,
            message: message.into(),
        }
    }

    /// Whether the failure was a deadline expiry or cancellation.
    pub fn is_deadline(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Cancelled { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_classification() {
        let err = CollaboratorError::Timeout {
            collaborator: "llm",
            budget: Duration::from_secs(3),
        };
        assert!(err.is_deadline());

        let err = CollaboratorError::io("search", "connection refused");
        assert!(!err.is_deadline());
    }
}
