//! Scripted LLM for tests
//!
//! Deterministic replies with optional per-call latency, so router and
//! orchestrator tests can script classifications, completions, timeouts
//! and outages without a network.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use concierge_core::{CollaboratorError, Deadline, LlmClient};

enum Script {
    Text(String),
    Json(serde_json::Value),
    Failure(String),
}

/// Scripted [`LlmClient`].
///
/// Replies are served FIFO; once the queue is empty the fixed default
/// reply (if any) is served forever. An optional artificial latency makes
/// deadline expiry testable.
pub struct ScriptedLlm {
    queue: Mutex<VecDeque<Script>>,
    default_reply: Option<String>,
    latency: Duration,
    calls: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            default_reply: None,
            latency: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Always reply with `text` once the queue is drained.
    pub fn with_default_reply(mut self, text: impl Into<String>) -> Self {
        self.default_reply = Some(text.into());
        self
    }

    /// Delay every call, to exercise deadline handling.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Queue a plain-text completion.
    pub fn push_text(&self, text: impl Into<String>) {
        self.queue.lock().push_back(Script::Text(text.into()));
    }

    /// Queue a JSON classification reply.
    pub fn push_json(&self, value: serde_json::Value) {
        self.queue.lock().push_back(Script::Json(value));
    }

    /// Queue a failure.
    pub fn push_failure(&self, message: impl Into<String>) {
        self.queue.lock().push_back(Script::Failure(message.into()));
    }

    /// Prompts seen so far, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn next(&self, prompt: &str) -> Option<Script> {
        self.calls.lock().push(prompt.to_string());
        self.queue.lock().pop_front()
    }
}

impl Default for ScriptedLlm {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, prompt: &str, deadline: Deadline) -> Result<String, CollaboratorError> {
        let script = self.next(prompt);
        deadline
            .bound("llm", async {
                if self.latency > Duration::ZERO {
                    tokio::time::sleep(self.latency).await;
                }
                match script {
                    Some(Script::Text(text)) => Ok(text),
                    Some(Script::Json(value)) => Ok(value.to_string()),
                    Some(Script::Failure(message)) => Err(CollaboratorError::io("llm", message)),
                    None => self
                        .default_reply
                        .clone()
                        .ok_or_else(|| CollaboratorError::io("llm", "script exhausted")),
                }
            })
            .await
    }

    async fn classify(
        &self,
        prompt: &str,
        _schema: &serde_json::Value,
        deadline: Deadline,
    ) -> Result<serde_json::Value, CollaboratorError> {
        let reply = self.complete(prompt, deadline).await?;
        crate::http::parse_strict_json(&reply)
    }
}
