//! Tool registry

use std::collections::HashMap;
use std::sync::Arc;

use jsonschema::JSONSchema;

use concierge_core::Deadline;

use crate::tool::{Tool, ToolError};

struct Entry {
    tool: Arc<dyn Tool>,
    schema: JSONSchema,
}

/// Registry of invocable tools with schema validation and timeouts.
#[derive(Default)]
pub struct ToolRegistry {
    entries: HashMap<String, Entry>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A schema that does not compile rejects the tool
    /// at registration, not at first use.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> Result<(), ToolError> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let id = tool.id().to_string();
        let schema_doc = tool.parameters_schema();
        let schema = JSONSchema::compile(&schema_doc).map_err(|e| ToolError::Failed {
            tool: id.clone(),
            message: format!("invalid parameter schema: {}", e),
        })?;
        tracing::info!(tool = %id, "tool registered");
        self.entries.insert(id, Entry { tool, schema });
        Ok(())
    }

    pub fn has(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Manifest entries: (id, description, parameter schema).
    pub fn descriptors(&self) -> Vec<(String, String, serde_json::Value)> {
        let mut descriptors: Vec<_> = self
            .entries
            .values()
            .map(|e| {
                (
                    e.tool.id().to_string(),
                    e.tool.description().to_string(),
                    e.tool.parameters_schema(),
                )
            })
            .collect();
        descriptors.sort_by(|a, b| a.0.cmp(&b.0));
        descriptors
    }

    /// Validate arguments and invoke the tool within its timeout.
    pub async fn invoke(
        &self,
        tool_id: &str,
        arguments: serde_json::Value,
        deadline: Deadline,
    ) -> Result<serde_json::Value, ToolError> {
        let entry = self
            .entries
            .get(tool_id)
            .ok_or_else(|| ToolError::NotFound(tool_id.to_string()))?;

        if let Err(errors) = entry.schema.validate(&arguments) {
            let message = errors
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ToolError::InvalidArguments {
                tool: tool_id.to_string(),
                message,
            });
        }

        let timeout = entry.tool.timeout().min(deadline.remaining());
        tracing::debug!(tool = %tool_id, timeout_ms = timeout.as_millis() as u64, "invoking tool");
        match tokio::time::timeout(timeout, entry.tool.invoke(arguments, deadline)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(ToolError::Timeout {
                tool: tool_id.to_string(),
                timeout,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn id(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "echo the text back"
        }

        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"],
            })
        }

        async fn invoke(
            &self,
            arguments: serde_json::Value,
            _deadline: Deadline,
        ) -> Result<serde_json::Value, ToolError> {
            Ok(serde_json::json!({ "echoed": arguments["text"] }))
        }
    }

    struct Sleeper;

    #[async_trait]
    impl Tool for Sleeper {
        fn id(&self) -> &str {
            "sleeper"
        }

        fn description(&self) -> &str {
            "sleeps"
        }

        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({ "type": "object" })
        }

        fn timeout(&self) -> Duration {
            Duration::from_millis(20)
        }

        async fn invoke(
            &self,
            _arguments: serde_json::Value,
            _deadline: Deadline,
        ) -> Result<serde_json::Value, ToolError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(serde_json::json!({}))
        }
    }

    fn far() -> Deadline {
        Deadline::after(Duration::from_secs(10))
    }

    #[tokio::test]
    async fn test_invoke_valid_arguments() {
        let mut registry = ToolRegistry::new();
        registry.register(Echo).unwrap();

        let result = registry
            .invoke("echo", serde_json::json!({"text": "hi"}), far())
            .await
            .unwrap();
        assert_eq!(result["echoed"], "hi");
    }

    #[tokio::test]
    async fn test_invalid_arguments_rejected_before_invoke() {
        let mut registry = ToolRegistry::new();
        registry.register(Echo).unwrap();

        let err = registry
            .invoke("echo", serde_json::json!({"text": 7}), far())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry
            .invoke("nope", serde_json::json!({}), far())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_timeout_enforced() {
        let mut registry = ToolRegistry::new();
        registry.register(Sleeper).unwrap();

        let err = registry
            .invoke("sleeper", serde_json::json!({}), far())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_descriptors_sorted() {
        let mut registry = ToolRegistry::new();
        registry.register(Sleeper).unwrap();
        registry.register(Echo).unwrap();

        let descriptors = registry.descriptors();
        assert_eq!(descriptors[0].0, "echo");
        assert_eq!(descriptors[1].0, "sleeper");
    }
}
