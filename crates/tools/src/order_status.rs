//! Order status lookup tool

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use concierge_core::Deadline;

use crate::tool::{Tool, ToolError};

/// Looks up the status of a placed order.
///
/// The reference implementation answers from a fixed table; a production
/// deployment wires the order-management adapter in behind the same
/// surface.
pub struct OrderStatusTool {
    statuses: HashMap<String, String>,
}

impl OrderStatusTool {
    pub fn new() -> Self {
        Self {
            statuses: HashMap::new(),
        }
    }

    pub fn with_status(mut self, order_id: impl Into<String>, status: impl Into<String>) -> Self {
        self.statuses.insert(order_id.into(), status.into());
        self
    }
}

impl Default for OrderStatusTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for OrderStatusTool {
    fn id(&self) -> &str {
        "order_status"
    }

    fn description(&self) -> &str {
        "Look up the current status of an order by its order id"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "order_id": {
                    "type": "string",
                    "description": "The order id from the purchase confirmation",
                }
            },
            "required": ["order_id"],
            "additionalProperties": false,
        })
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(5)
    }

    async fn invoke(
        &self,
        arguments: serde_json::Value,
        _deadline: Deadline,
    ) -> Result<serde_json::Value, ToolError> {
        let order_id = arguments["order_id"]
            .as_str()
            .unwrap_or_default()
            .to_string();

        let status = self
            .statuses
            .get(&order_id)
            .cloned()
            .unwrap_or_else(|| "unknown".to_string());

        Ok(serde_json::json!({
            "order_id": order_id,
            "status": status,
            "checked_at": Utc::now(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ToolRegistry;

    #[tokio::test]
    async fn test_known_order() {
        let mut registry = ToolRegistry::new();
        registry
            .register(OrderStatusTool::new().with_status("ord-42", "shipped"))
            .unwrap();

        let result = registry
            .invoke(
                "order_status",
                serde_json::json!({"order_id": "ord-42"}),
                Deadline::after(Duration::from_secs(5)),
            )
            .await
            .unwrap();
        assert_eq!(result["status"], "shipped");
    }

    #[tokio::test]
    async fn test_unknown_order() {
        let mut registry = ToolRegistry::new();
        registry.register(OrderStatusTool::new()).unwrap();

        let result = registry
            .invoke(
                "order_status",
                serde_json::json!({"order_id": "ord-404"}),
                Deadline::after(Duration::from_secs(5)),
            )
            .await
            .unwrap();
        assert_eq!(result["status"], "unknown");
    }
}
