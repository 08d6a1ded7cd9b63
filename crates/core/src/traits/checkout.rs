//! Checkout collaborator trait

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deadline::Deadline;
use crate::error::CollaboratorError;
use crate::product::Product;

/// Receipt returned by a successful order placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub order_id: String,
    pub placed_at: DateTime<Utc>,
}

/// The external checkout system.
///
/// `place_order` is a mutating call and is never retried by the core:
/// a timeout after dispatch is surfaced as-is so the orchestrator can
/// record a compensating audit entry instead of double-ordering.
#[async_trait]
pub trait CheckoutProvider: Send + Sync {
    async fn place_order(
        &self,
        session_id: &str,
        product: &Product,
        deadline: Deadline,
    ) -> Result<OrderReceipt, CollaboratorError>;
}
