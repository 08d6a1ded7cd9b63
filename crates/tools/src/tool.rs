//! The tool trait

use std::time::Duration;

use async_trait::async_trait;

use concierge_core::Deadline;

/// Tool failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),

    #[error("invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },

    #[error("tool {tool} timed out after {timeout:?}")]
    Timeout { tool: String, timeout: Duration },

    #[error("tool {tool} failed: {message}")]
    Failed { tool: String, message: String },
}

impl ToolError {
    pub fn failed(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

/// A tool invocable by the orchestrator.
///
/// `parameters_schema` is a JSON Schema document; the registry validates
/// arguments against it before `invoke` ever runs, so implementations
/// may assume schema-valid input.
#[async_trait]
pub trait Tool: Send + Sync {
    fn id(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters_schema(&self) -> serde_json::Value;

    /// Per-invocation budget. The registry enforces it.
    fn timeout(&self) -> Duration {
        Duration::from_secs(10)
    }

    async fn invoke(
        &self,
        arguments: serde_json::Value,
        deadline: Deadline,
    ) -> Result<serde_json::Value, ToolError>;
}
