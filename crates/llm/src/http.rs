//! OpenAI-compatible HTTP backend

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use concierge_core::{CollaboratorError, Deadline, LlmClient};

/// Configuration for an OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone)]
pub struct HttpLlmConfig {
    /// API base, e.g. `https://api.openai.com/v1`.
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: usize,
    pub temperature: f32,
}

impl Default for HttpLlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 512,
            temperature: 0.3,
        }
    }
}

impl HttpLlmConfig {
    /// Config for a local OpenAI-compatible server (vLLM, Ollama).
    pub fn local(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: "not-needed".to_string(),
            model: model.into(),
            ..Default::default()
        }
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: usize,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// OpenAI-compatible backend with per-call deadline enforcement.
pub struct HttpLlmBackend {
    config: HttpLlmConfig,
    client: Client,
}

impl HttpLlmBackend {
    pub fn new(config: HttpLlmConfig) -> Result<Self, CollaboratorError> {
        let client = Client::builder()
            .build()
            .map_err(|e| CollaboratorError::io("llm", e.to_string()))?;
        Ok(Self { config, client })
    }

    fn chat_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.endpoint.trim_end_matches('/')
        )
    }

    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        json_mode: bool,
        deadline: Deadline,
    ) -> Result<String, CollaboratorError> {
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            response_format: json_mode.then_some(ResponseFormat {
                format_type: "json_object",
            }),
        };

        tracing::debug!(
            model = %self.config.model,
            json_mode,
            budget_ms = deadline.remaining().as_millis() as u64,
            "llm chat request"
        );

        let call = async {
            let response = self
                .client
                .post(self.chat_url())
                .bearer_auth(&self.config.api_key)
                .json(&request)
                .send()
                .await
                .map_err(|e| CollaboratorError::io("llm", e.to_string()))?;

            let status = response.status();
            if status == reqwest::StatusCode::UNAUTHORIZED {
                return Err(CollaboratorError::Unauthorized(
                    "llm endpoint rejected credentials".to_string(),
                ));
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(CollaboratorError::io(
                    "llm",
                    format!("HTTP {}: {}", status, body),
                ));
            }

            let parsed: ChatResponse = response
                .json()
                .await
                .map_err(|e| CollaboratorError::malformed("llm", e.to_string()))?;
            parsed
                .choices
                .into_iter()
                .next()
                .map(|c| c.message.content)
                .ok_or_else(|| CollaboratorError::malformed("llm", "no choices in reply"))
        };

        deadline.bound("llm", call).await
    }
}

#[async_trait]
impl LlmClient for HttpLlmBackend {
    async fn complete(&self, prompt: &str, deadline: Deadline) -> Result<String, CollaboratorError> {
        self.chat(
            vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            false,
            deadline,
        )
        .await
    }

    async fn classify(
        &self,
        prompt: &str,
        schema: &serde_json::Value,
        deadline: Deadline,
    ) -> Result<serde_json::Value, CollaboratorError> {
        let system = format!(
            "Reply with a single JSON object conforming to this JSON Schema. \
             No prose, no code fences.\n\n{}",
            schema
        );
        let reply = self
            .chat(
                vec![
                    ChatMessage {
                        role: "system".to_string(),
                        content: system,
                    },
                    ChatMessage {
                        role: "user".to_string(),
                        content: prompt.to_string(),
                    },
                ],
                true,
                deadline,
            )
            .await?;

        parse_strict_json(&reply)
    }
}

/// Parse a reply that must be a single JSON object. Code fences are
/// tolerated, anything else is a malformed reply.
pub(crate) fn parse_strict_json(reply: &str) -> Result<serde_json::Value, CollaboratorError> {
    let trimmed = reply.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|s| s.trim_end_matches("```").trim())
        .unwrap_or(trimmed);

    serde_json::from_str(trimmed)
        .map_err(|e| CollaboratorError::malformed("llm", format!("invalid JSON reply: {}", e)))
}
