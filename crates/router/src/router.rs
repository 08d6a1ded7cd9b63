//! LLM intent classification

use std::sync::Arc;

use concierge_config::{RouterSettings, VolatilityStore};
use concierge_core::{Deadline, Intent, IntentKind, LlmClient, Volatility};

use crate::manifest::RoutingManifest;
use crate::volatility::{classify_volatility, VolatilityAssessment};

/// Two-stage intent router.
pub struct IntentRouter {
    llm: Arc<dyn LlmClient>,
    volatility: Arc<VolatilityStore>,
    settings: RouterSettings,
}

impl IntentRouter {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        volatility: Arc<VolatilityStore>,
        settings: RouterSettings,
    ) -> Self {
        Self {
            llm,
            volatility,
            settings,
        }
    }

    /// Produce the routing decision for one user turn.
    ///
    /// Never fails: an unusable classification (invalid reply, low
    /// confidence, deadline expiry) becomes the chat fallback, tagged
    /// with the reason.
    pub async fn route(
        &self,
        text: &str,
        manifest: &RoutingManifest,
        deadline: Deadline,
    ) -> Intent {
        let assessment = classify_volatility(text, &self.volatility.snapshot());

        let llm_deadline = deadline.capped(self.settings.llm_deadline());
        let prompt = self.build_prompt(text, manifest, &assessment);
        let reply = self
            .llm
            .classify(&prompt, &manifest.reply_schema(), llm_deadline)
            .await;

        let intent = match reply {
            Ok(value) => self.validate(value, manifest, &assessment),
            Err(err) if err.is_deadline() => {
                tracing::warn!(error = %err, "router classification timed out");
                Err("timeout")
            }
            Err(err) => {
                tracing::warn!(error = %err, "router classification failed");
                Err("fallback")
            }
        };

        match intent {
            Ok(intent) => intent,
            Err(reason) => {
                let mut fallback = Intent::chat_fallback(reason);
                fallback.volatility = assessment.volatility;
                fallback.temporal_cue = assessment.temporal_cue;
                fallback
            }
        }
    }

    fn build_prompt(
        &self,
        text: &str,
        manifest: &RoutingManifest,
        assessment: &VolatilityAssessment,
    ) -> String {
        format!(
            "Classify the user's message into exactly one intent kind.\n\n\
             {}\n\
             Pre-pass signals: volatility={:?}, temporal_cue={}, matched_terms={:?}\n\n\
             User message: {}\n\n\
             Reply with JSON only: kind, confidence, reasoning, plus selected_contract \
             or selected_tool (when kind is contract or tool) copied exactly \
             from the lists above.",
            manifest.render(),
            assessment.volatility,
            assessment.temporal_cue,
            assessment.matched_terms,
            text
        )
    }

    /// Validate the raw reply into an [`Intent`], or name the fallback
    /// reason.
    fn validate(
        &self,
        value: serde_json::Value,
        manifest: &RoutingManifest,
        assessment: &VolatilityAssessment,
    ) -> Result<Intent, &'static str> {
        let kind = match value.get("kind").and_then(|k| k.as_str()) {
            Some("chat") => IntentKind::Chat,
            Some("rag") => IntentKind::Rag,
            Some("websearch") => IntentKind::Websearch,
            Some("tool") => IntentKind::Tool,
            Some("contract") => IntentKind::Contract,
            _ => return Err("fallback"),
        };

        let confidence = match value.get("confidence").and_then(|c| c.as_f64()) {
            Some(c) if (0.0..=1.0).contains(&c) => c as f32,
            _ => return Err("fallback"),
        };

        let reasoning = value
            .get("reasoning")
            .and_then(|r| r.as_str())
            .unwrap_or("")
            .to_string();

        let selected_contract = value
            .get("selected_contract")
            .and_then(|s| s.as_str())
            .map(str::to_string);
        let selected_tool = value
            .get("selected_tool")
            .and_then(|s| s.as_str())
            .map(str::to_string);

        // A contract/tool selection must match the manifest exactly.
        if kind == IntentKind::Contract {
            match &selected_contract {
                Some(id) if manifest.has_contract(id) => {}
                _ => return Err("fallback"),
            }
        }
        if kind == IntentKind::Tool {
            match &selected_tool {
                Some(id) if manifest.has_tool(id) => {}
                _ => return Err("fallback"),
            }
        }

        if confidence < self.settings.confidence_floor {
            return Err("fallback");
        }

        let mut intent = Intent {
            kind,
            confidence,
            reasoning,
            selected_contract,
            selected_tool,
            volatility: assessment.volatility,
            temporal_cue: assessment.temporal_cue,
        };

        // Deterministic upgrade: a volatile query with a temporal cue is
        // answered from the web even when the model said chat/rag. The
        // model's confidence is carried over unchanged.
        if matches!(intent.kind, IntentKind::Chat | IntentKind::Rag)
            && assessment.volatility == Volatility::Volatile
            && assessment.temporal_cue
        {
            tracing::debug!(
                from = intent.kind.as_str(),
                "volatility override upgraded intent to websearch"
            );
            intent.kind = IntentKind::Websearch;
            intent.reasoning = format!(
                "{} [volatility override: volatile topic with temporal cue]",
                intent.reasoning
            );
        }

        Ok(intent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{ContractDescriptor, ManifestSource, ToolDescriptor};
    use concierge_llm::ScriptedLlm;
    use std::time::Duration;

    struct FixedSource;

    impl ManifestSource for FixedSource {
        fn contracts(&self) -> Vec<ContractDescriptor> {
            vec![ContractDescriptor {
                id: "purchase".into(),
                description: "guided product purchase".into(),
                trigger_keywords: vec!["buy".into()],
            }]
        }

        fn tools(&self) -> Vec<ToolDescriptor> {
            vec![ToolDescriptor {
                id: "order_status".into(),
                description: "look up an order".into(),
                parameters: serde_json::json!({"type": "object"}),
            }]
        }
    }

    fn router(llm: ScriptedLlm) -> IntentRouter {
        IntentRouter::new(
            Arc::new(llm),
            Arc::new(VolatilityStore::default()),
            RouterSettings::default(),
        )
    }

    fn manifest() -> RoutingManifest {
        RoutingManifest::assemble(&FixedSource)
    }

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(10))
    }

    #[tokio::test]
    async fn test_volatility_override_to_websearch() {
        let llm = ScriptedLlm::new();
        llm.push_json(serde_json::json!({
            "kind": "chat",
            "confidence": 0.92,
            "reasoning": "general knowledge question",
        }));

        let intent = router(llm)
            .route("who is the current german finance minister", &manifest(), deadline())
            .await;

        assert_eq!(intent.kind, IntentKind::Websearch);
        assert!((intent.confidence - 0.92).abs() < 1e-6);
        assert!(intent.reasoning.contains("volatility override"));
        assert_eq!(intent.volatility, Volatility::Volatile);
        assert!(intent.temporal_cue);
    }

    #[tokio::test]
    async fn test_static_query_stays_chat() {
        let llm = ScriptedLlm::new();
        llm.push_json(serde_json::json!({
            "kind": "chat",
            "confidence": 0.94,
            "reasoning": "historical question",
        }));

        let intent = router(llm)
            .route("Who was Angela Merkel", &manifest(), deadline())
            .await;

        assert_eq!(intent.kind, IntentKind::Chat);
        assert!((intent.confidence - 0.94).abs() < 1e-6);
        assert_eq!(intent.volatility, Volatility::Static);
    }

    #[tokio::test]
    async fn test_contract_selection_must_match_manifest() {
        let llm = ScriptedLlm::new();
        llm.push_json(serde_json::json!({
            "kind": "contract",
            "confidence": 0.95,
            "reasoning": "wants to buy",
            "selected_contract": "travel_booking",
        }));

        let intent = router(llm)
            .route("book me a flight", &manifest(), deadline())
            .await;

        assert_eq!(intent.kind, IntentKind::Chat);
        assert_eq!(intent.reasoning, "fallback");
    }

    #[tokio::test]
    async fn test_valid_contract_selection() {
        let llm = ScriptedLlm::new();
        llm.push_json(serde_json::json!({
            "kind": "contract",
            "confidence": 0.9,
            "reasoning": "purchase request",
            "selected_contract": "purchase",
        }));

        let intent = router(llm)
            .route("I want to buy a graphics card", &manifest(), deadline())
            .await;

        assert_eq!(intent.kind, IntentKind::Contract);
        assert_eq!(intent.selected_contract.as_deref(), Some("purchase"));
    }

    #[tokio::test]
    async fn test_low_confidence_falls_back() {
        let llm = ScriptedLlm::new();
        llm.push_json(serde_json::json!({
            "kind": "websearch",
            "confidence": 0.4,
            "reasoning": "unsure",
        }));

        let intent = router(llm).route("hmm", &manifest(), deadline()).await;

        assert_eq!(intent.kind, IntentKind::Chat);
        assert_eq!(intent.reasoning, "fallback");
    }

    #[tokio::test]
    async fn test_llm_timeout_falls_back() {
        let llm = ScriptedLlm::new()
            .with_default_reply(r#"{"kind": "chat", "confidence": 0.9, "reasoning": "late"}"#)
            .with_latency(Duration::from_millis(300));

        let mut settings = RouterSettings::default();
        settings.llm_deadline_ms = 30;
        let router = IntentRouter::new(
            Arc::new(llm),
            Arc::new(VolatilityStore::default()),
            settings,
        );

        let intent = router.route("anything", &manifest(), deadline()).await;
        assert_eq!(intent.kind, IntentKind::Chat);
        assert_eq!(intent.reasoning, "timeout");
    }

    #[tokio::test]
    async fn test_garbage_reply_falls_back() {
        let llm = ScriptedLlm::new();
        llm.push_text("I think this is probably a chat message?");

        let intent = router(llm).route("hello", &manifest(), deadline()).await;
        assert_eq!(intent.kind, IntentKind::Chat);
        assert_eq!(intent.reasoning, "fallback");
    }

    #[tokio::test]
    async fn test_unknown_kind_falls_back() {
        let llm = ScriptedLlm::new();
        llm.push_json(serde_json::json!({
            "kind": "smalltalk",
            "confidence": 0.99,
            "reasoning": "?",
        }));

        let intent = router(llm).route("hello", &manifest(), deadline()).await;
        assert_eq!(intent.kind, IntentKind::Chat);
    }
}
