//! Turn deadlines
//!
//! A [`Deadline`] is attached to every turn and handed down to every
//! external call. Collaborator adapters wrap their I/O in
//! [`Deadline::bound`], which enforces the remaining budget with
//! `tokio::time::timeout` and maps expiry to
//! [`CollaboratorError::Timeout`]. A call whose deadline has already
//! passed fails fast with `Cancelled` and never reaches the collaborator,
//! so a cancelled call cannot have committed durable effects.

use std::future::Future;
use std::time::{Duration, Instant};

use crate::error::CollaboratorError;

/// A point in time after which no external call may be issued.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires_at: Instant,
}

impl Deadline {
    /// Deadline `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self {
            expires_at: Instant::now() + budget,
        }
    }

    /// Remaining budget; zero once expired.
    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining() == Duration::ZERO
    }

    /// A deadline no later than this one, capped at `budget` from now.
    ///
    /// Used to give a sub-call a tighter budget (e.g. the 3 s router LLM
    /// deadline inside a 30 s turn).
    pub fn capped(&self, budget: Duration) -> Self {
        let capped = Instant::now() + budget;
        Self {
            expires_at: self.expires_at.min(capped),
        }
    }

    /// Run `fut` within the remaining budget.
    ///
    /// Expiry before dispatch yields `Cancelled`; expiry mid-flight yields
    /// `Timeout`. Otherwise the future's own result is returned.
    pub async fn bound<F, T>(
        &self,
        collaborator: &'static str,
        fut: F,
    ) -> Result<T, CollaboratorError>
    where
        F: Future<Output = Result<T, CollaboratorError>> + Send,
    {
        let budget = self.remaining();
        if budget == Duration::ZERO {
            return Err(CollaboratorError::Cancelled { collaborator });
        }
        match tokio::time::timeout(budget, fut).await {
            Ok(result) => result,
            Err(_elapsed) => Err(CollaboratorError::Timeout {
                collaborator,
                budget,
            }),
        }
    }
}
