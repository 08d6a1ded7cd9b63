//! LLM collaborator trait

use async_trait::async_trait;

use crate::deadline::Deadline;
use crate::error::CollaboratorError;

/// The language model endpoint.
///
/// Two calls only: free-text completion and schema-constrained
/// classification. Implementations must honor the deadline; the router
/// and pipelines rely on a timely `Timeout` rather than a hung call.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Complete a prompt into free text.
    async fn complete(&self, prompt: &str, deadline: Deadline) -> Result<String, CollaboratorError>;

    /// Ask for a reply conforming to `schema` (a JSON Schema document)
    /// and return the parsed JSON.
    ///
    /// Implementations parse strictly: a reply that is not valid JSON is
    /// a `Malformed` error, not a silent retry.
    async fn classify(
        &self,
        prompt: &str,
        schema: &serde_json::Value,
        deadline: Deadline,
    ) -> Result<serde_json::Value, CollaboratorError>;
}
