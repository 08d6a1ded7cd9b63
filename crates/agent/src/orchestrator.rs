//! Per-turn orchestration

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Semaphore;

use concierge_config::{Settings, VolatilityKeywords, VolatilityStore};
use concierge_contract::{ContractError, ContractRegistry};
use concierge_core::{
    ContextPatch, ContractState, Deadline, Intent, IntentKind, LlmClient, Message, SessionContext,
    StateTransition, WebSearchProvider,
};
use concierge_memory::{
    AuditArtifact, AuditKind, AuditStore, BufferStore, RollingSummarizer, SemanticMemory,
    SemanticStore, SummaryStore,
};
use concierge_router::{IntentRouter, RoutingManifest};
use concierge_session::{SessionError, SessionStore};
use concierge_tools::ToolRegistry;

use crate::error::AgentError;
use crate::loop_detector::LoopDetector;
use crate::manifest::RegistryManifestSource;

/// Diagnostic code attached to forced cancellations.
const LOOP_DIAGNOSTIC: &str = "LOOP-001";

/// The reply for one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnReply {
    pub assistant_message: String,
    pub kind: IntentKind,
    /// True when the turn degraded (deadline or collaborator outage) and
    /// the reply is based on partial work.
    pub partial: bool,
}

impl TurnReply {
    fn new(message: impl Into<String>, kind: IntentKind) -> Self {
        Self {
            assistant_message: message.into(),
            kind,
            partial: false,
        }
    }

    fn partial(message: impl Into<String>, kind: IntentKind) -> Self {
        Self {
            assistant_message: message.into(),
            kind,
            partial: true,
        }
    }
}

/// Everything the orchestrator talks to.
pub struct OrchestratorDeps {
    pub llm: Arc<dyn LlmClient>,
    pub websearch: Arc<dyn WebSearchProvider>,
    pub sessions: Arc<SessionStore>,
    pub buffer: Arc<BufferStore>,
    pub summaries: Arc<SummaryStore>,
    pub semantic: Arc<SemanticStore>,
    pub audit: Arc<AuditStore>,
    pub summarizer: Arc<RollingSummarizer>,
    pub contracts: Arc<ContractRegistry>,
    pub tools: Arc<ToolRegistry>,
    pub volatility: Arc<VolatilityStore>,
}

/// Top-level per-turn driver.
pub struct Orchestrator {
    deps: OrchestratorDeps,
    settings: Settings,
    router: IntentRouter,
    manifest_source: RegistryManifestSource,
    loop_detector: LoopDetector,
    global_permits: Arc<Semaphore>,
    session_queues: DashMap<String, Arc<Semaphore>>,
}

impl Orchestrator {
    pub fn new(deps: OrchestratorDeps, settings: Settings) -> Self {
        let router = IntentRouter::new(
            deps.llm.clone(),
            deps.volatility.clone(),
            settings.router.clone(),
        );
        let manifest_source =
            RegistryManifestSource::new(deps.contracts.clone(), deps.tools.clone());
        let global_permits = Arc::new(Semaphore::new(settings.concurrency.global_turn_cap));
        Self {
            deps,
            settings,
            router,
            manifest_source,
            loop_detector: LoopDetector::new(),
            global_permits,
            session_queues: DashMap::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Inbound surface
    // -----------------------------------------------------------------------

    /// Serve one user turn.
    pub async fn turn(
        &self,
        session_id: &str,
        user_id: Option<&str>,
        user_message: &str,
    ) -> Result<TurnReply, AgentError> {
        // Backpressure: full queues answer immediately, nothing waits
        // unboundedly.
        let _global = self
            .global_permits
            .clone()
            .try_acquire_owned()
            .map_err(|_| AgentError::Busy)?;
        let queue = self
            .session_queues
            .entry(session_id.to_string())
            .or_insert_with(|| {
                Arc::new(Semaphore::new(self.settings.concurrency.session_queue_depth))
            })
            .clone();
        let _slot = queue.try_acquire_owned().map_err(|_| AgentError::Busy)?;

        let deadline = Deadline::after(self.settings.concurrency.turn_deadline());

        let overflow = match self
            .deps
            .buffer
            .append(session_id, Message::user(user_message))
            .await
        {
            Ok(outcome) => outcome.overflow,
            Err(err) => {
                tracing::warn!(session_id = %session_id, error = %err, "buffer append failed");
                false
            }
        };

        // A live contract preempts routing: mid-flow turns belong to the
        // state machine, whatever they look like to a classifier.
        let reply = if let Some(contract_id) = self.active_contract(session_id).await {
            self.contract_turn(session_id, user_id, user_message, &contract_id, deadline)
                .await?
        } else {
            let manifest = RoutingManifest::assemble(&self.manifest_source);
            let intent = self.router.route(user_message, &manifest, deadline).await;
            tracing::info!(
                session_id = %session_id,
                kind = intent.kind.as_str(),
                confidence = intent.confidence,
                "turn routed"
            );
            self.dispatch(session_id, user_id, user_message, intent, deadline)
                .await?
        };

        if let Err(err) = self
            .deps
            .buffer
            .append(session_id, Message::assistant(&reply.assistant_message))
            .await
        {
            tracing::warn!(session_id = %session_id, error = %err, "buffer append failed");
        }

        self.maybe_summarize(session_id, overflow).await;
        self.deps.audit.record(
            AuditArtifact::new(
                session_id,
                AuditKind::Chat,
                serde_json::json!({
                    "user": user_message,
                    "assistant": reply.assistant_message,
                    "kind": reply.kind.as_str(),
                    "partial": reply.partial,
                }),
            )
            .with_user(user_id.unwrap_or("anonymous")),
        );

        Ok(reply)
    }

    /// Catalog of stored semantic memories.
    pub async fn list_memories(&self, user_id: &str) -> Result<Vec<SemanticMemory>, AgentError> {
        Ok(self.deps.semantic.list(user_id).await?)
    }

    /// Delete every semantic memory for the user and schedule audit
    /// retention for what the compliance store holds.
    pub async fn delete_memories(&self, user_id: &str) -> Result<bool, AgentError> {
        let removed = self.deps.semantic.delete_all(user_id).await?;
        self.deps.audit.record(AuditArtifact::new(
            "retention",
            AuditKind::Chat,
            serde_json::json!({
                "event": "memory_deletion_requested",
                "user_id": user_id,
                "removed": removed,
            }),
        ));
        Ok(true)
    }

    /// Portability bundle of the user's stored data.
    pub async fn export_data(&self, user_id: &str) -> Result<serde_json::Value, AgentError> {
        let memories = self.deps.semantic.list(user_id).await?;
        Ok(serde_json::json!({
            "user_id": user_id,
            "exported_at": chrono::Utc::now(),
            "semantic_memories": memories,
        }))
    }

    /// Redacted view of the session's contract state.
    pub async fn get_current_contract(
        &self,
        session_id: &str,
    ) -> Result<Option<serde_json::Value>, AgentError> {
        Ok(self
            .deps
            .sessions
            .load(session_id)
            .await?
            .map(|ctx| ctx.redacted_view()))
    }

    pub fn volatility_settings_get(&self) -> Arc<VolatilityKeywords> {
        self.deps.volatility.snapshot()
    }

    pub fn volatility_settings_set(&self, keywords: VolatilityKeywords) {
        self.deps.volatility.replace(keywords);
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    async fn dispatch(
        &self,
        session_id: &str,
        user_id: Option<&str>,
        user_message: &str,
        intent: Intent,
        deadline: Deadline,
    ) -> Result<TurnReply, AgentError> {
        match intent.kind {
            IntentKind::Chat => Ok(self.chat_turn(session_id, user_message, deadline).await),
            IntentKind::Rag => Ok(self
                .rag_turn(session_id, user_id, user_message, deadline)
                .await),
            IntentKind::Websearch => Ok(self.websearch_turn(user_message, deadline).await),
            IntentKind::Tool => {
                let tool_id = intent.selected_tool.as_deref().unwrap_or_default();
                Ok(self.tool_turn(tool_id, user_message, deadline).await)
            }
            IntentKind::Contract => {
                let contract_id = intent.selected_contract.as_deref().unwrap_or_default();
                self.contract_turn(session_id, user_id, user_message, contract_id, deadline)
                    .await
            }
        }
    }

    async fn chat_turn(&self, session_id: &str, user_message: &str, deadline: Deadline) -> TurnReply {
        let summary = self
            .deps
            .summaries
            .current(session_id)
            .await
            .ok()
            .flatten();
        let tail = self
            .deps
            .buffer
            .tail(session_id, 10)
            .await
            .unwrap_or_default();

        let mut prompt = String::from(
            "You are a helpful shopping concierge. Answer the user's message \
             directly and concisely.\n",
        );
        if let Some(summary) = summary {
            prompt.push_str(&format!("\nConversation so far: {}\n", summary.text));
        }
        if !tail.is_empty() {
            prompt.push_str("\nRecent messages:\n");
            for message in &tail {
                prompt.push_str(&message.format_for_prompt());
                prompt.push('\n');
            }
        }
        prompt.push_str(&format!("\nUser: {}", user_message));

        match self.deps.llm.complete(&prompt, deadline).await {
            Ok(text) => TurnReply::new(text, IntentKind::Chat),
            Err(err) => {
                tracing::warn!(error = %err, "chat completion failed");
                TurnReply::partial(
                    "I'm having trouble answering right now. Please try again in a moment.",
                    IntentKind::Chat,
                )
            }
        }
    }

    async fn rag_turn(
        &self,
        session_id: &str,
        user_id: Option<&str>,
        user_message: &str,
        deadline: Deadline,
    ) -> TurnReply {
        let memories = match user_id {
            Some(user_id) => self
                .deps
                .semantic
                .search(user_id, user_message, 5)
                .await
                .unwrap_or_default(),
            None => Vec::new(),
        };

        if memories.is_empty() {
            // Nothing grounded to answer from; plain chat is the honest
            // fallback.
            return self.chat_turn(session_id, user_message, deadline).await;
        }

        let context: Vec<String> = memories
            .iter()
            .map(|hit| format!("- {}", hit.memory.content))
            .collect();
        let prompt = format!(
            "Answer using the user's stored notes where relevant.\n\n\
             Stored notes:\n{}\n\nUser: {}",
            context.join("\n"),
            user_message
        );

        match self.deps.llm.complete(&prompt, deadline).await {
            Ok(text) => TurnReply::new(text, IntentKind::Rag),
            Err(err) => {
                tracing::warn!(error = %err, "rag completion failed");
                TurnReply::partial(
                    "I couldn't consult your stored notes just now. Please try again shortly.",
                    IntentKind::Rag,
                )
            }
        }
    }

    async fn websearch_turn(&self, user_message: &str, deadline: Deadline) -> TurnReply {
        let snippets = match self.deps.websearch.search(user_message, deadline).await {
            Ok(snippets) => snippets,
            Err(err) => {
                tracing::warn!(error = %err, "web search failed");
                return TurnReply::partial(
                    "Web search is unavailable right now. Please try again in a moment.",
                    IntentKind::Websearch,
                );
            }
        };

        let sources: Vec<String> = snippets
            .iter()
            .take(5)
            .map(|s| format!("- {} ({}): {}", s.title, s.url, s.snippet))
            .collect();
        let prompt = format!(
            "Answer the user's question from these search results. Mention the \
             source when you rely on one.\n\nResults:\n{}\n\nQuestion: {}",
            sources.join("\n"),
            user_message
        );

        match self.deps.llm.complete(&prompt, deadline).await {
            Ok(text) => TurnReply::new(text, IntentKind::Websearch),
            Err(err) => {
                tracing::warn!(error = %err, "websearch synthesis failed");
                let fallback = snippets
                    .first()
                    .map(|s| format!("{}: {}", s.title, s.snippet))
                    .unwrap_or_else(|| "I found no usable results.".to_string());
                TurnReply::partial(fallback, IntentKind::Websearch)
            }
        }
    }

    async fn tool_turn(&self, tool_id: &str, user_message: &str, deadline: Deadline) -> TurnReply {
        let Some((_, description, schema)) = self
            .deps
            .tools
            .descriptors()
            .into_iter()
            .find(|(id, _, _)| id == tool_id)
        else {
            return TurnReply::partial(
                format!("I don't have a tool called \"{}\".", tool_id),
                IntentKind::Tool,
            );
        };

        // Extract the arguments from the utterance against the tool's
        // declared schema.
        let prompt = format!(
            "Extract the arguments for the tool \"{}\" ({}) from this message: {}",
            tool_id, description, user_message
        );
        let arguments = self
            .deps
            .llm
            .classify(&prompt, &schema, deadline)
            .await
            .unwrap_or_else(|_| serde_json::json!({}));

        match self.deps.tools.invoke(tool_id, arguments, deadline).await {
            Ok(result) => {
                let rendered = serde_json::to_string_pretty(&result)
                    .unwrap_or_else(|_| result.to_string());
                let prompt = format!(
                    "Relay this tool result to the user in one or two sentences.\n\n{}",
                    rendered
                );
                match self.deps.llm.complete(&prompt, deadline).await {
                    Ok(text) => TurnReply::new(text, IntentKind::Tool),
                    Err(_) => TurnReply::new(rendered, IntentKind::Tool),
                }
            }
            Err(err) => {
                tracing::warn!(tool = %tool_id, error = %err, "tool invocation failed");
                TurnReply::partial(
                    format!("The {} tool didn't work: {}.", tool_id, err),
                    IntentKind::Tool,
                )
            }
        }
    }

    // -----------------------------------------------------------------------
    // The CSM loop
    // -----------------------------------------------------------------------

    async fn contract_turn(
        &self,
        session_id: &str,
        user_id: Option<&str>,
        user_message: &str,
        contract_id: &str,
        deadline: Deadline,
    ) -> Result<TurnReply, AgentError> {
        let contract = self
            .deps
            .contracts
            .get(contract_id)
            .ok_or_else(|| ContractError::Unknown(contract_id.to_string()))?;

        // Per-session serialization: one turn-worker in here at a time.
        // Under the lock the context is read fresh from storage, never
        // from a possibly stale cache.
        let _lock = self.deps.sessions.lock(session_id).await;

        let mut ctx = self
            .deps
            .sessions
            .load_fresh(session_id)
            .await?
            .unwrap_or_else(|| SessionContext::new(session_id, user_id.map(str::to_string)));
        if ctx.contract_id.is_none() {
            ctx.contract_id = Some(contract_id.to_string());
        }

        let mut transition = match contract.handle_turn(&ctx, user_message, deadline).await {
            Ok(transition) => transition,
            Err(ContractError::Terminal(state)) => {
                return Ok(TurnReply::new(
                    format!(
                        "This {} session is already finished ({}). Start a new request any time.",
                        contract_id, state
                    ),
                    IntentKind::Contract,
                ));
            }
            Err(err) => return Err(err.into()),
        };

        // Loop breaker: a repeating transition forces cancellation.
        if self
            .loop_detector
            .observe(session_id, transition.from_state, transition.to_state)
            && !transition.to_state.is_terminal()
        {
            transition = forced_cancellation(ctx.state);
        }

        transition.context_patch.apply(&mut ctx);
        ctx.state = transition.to_state;

        match self.deps.sessions.save(&ctx).await {
            Ok(()) => {}
            Err(err @ (SessionError::Validation(_) | SessionError::Conflict { .. })) => {
                // Nothing was persisted and the patched context is
                // discarded here, so the next turn restarts from the
                // pre-turn snapshot.
                tracing::error!(
                    session_id = %session_id,
                    error = %err,
                    "contract turn could not be persisted, rolling back"
                );
                return Ok(TurnReply::partial(
                    "Something went wrong saving your progress. Please send that again.",
                    IntentKind::Contract,
                ));
            }
            // Storage outage: abort the turn. No reply may claim
            // persistent progress that never happened.
            Err(err) => return Err(err.into()),
        }

        self.record_contract_audit(session_id, user_id, contract_id, &ctx, &transition);
        if ctx.state.is_terminal() {
            self.loop_detector.clear(session_id);
        }

        let message = transition.assistant_message.unwrap_or_else(|| {
            "Okay, let me know how you'd like to continue.".to_string()
        });
        Ok(TurnReply::new(message, IntentKind::Contract))
    }

    /// Resumable contract on this session, if any.
    async fn active_contract(&self, session_id: &str) -> Option<String> {
        match self.deps.sessions.load(session_id).await {
            Ok(Some(ctx)) if !ctx.state.is_terminal() => ctx.contract_id,
            Ok(_) => None,
            Err(err) => {
                tracing::warn!(session_id = %session_id, error = %err, "session load failed");
                None
            }
        }
    }

    fn record_contract_audit(
        &self,
        session_id: &str,
        user_id: Option<&str>,
        contract_id: &str,
        ctx: &SessionContext,
        transition: &StateTransition,
    ) {
        let mut artifact = AuditArtifact::new(
            session_id,
            AuditKind::Fsm,
            serde_json::json!({
                "from": transition.from_state,
                "to": transition.to_state,
                "trigger": transition.trigger,
                "trail": transition.context_patch.annotations.get("transition_trail"),
            }),
        );
        if let Some(user_id) = user_id {
            artifact = artifact.with_user(user_id);
        }
        self.deps.audit.record(artifact);

        // A mutating call with unknown outcome gets a compensating
        // entry so reconciliation can pick it up.
        if transition
            .context_patch
            .annotations
            .get("compensation_required")
            .is_some()
        {
            self.deps.audit.record(AuditArtifact::new(
                session_id,
                AuditKind::Fsm,
                serde_json::json!({
                    "event": "compensation_required",
                    "state": ctx.state,
                }),
            ));
        }

        if ctx.state.is_terminal() {
            self.deps.audit.record(
                AuditArtifact::new(session_id, AuditKind::Contract, ctx.redacted_view())
                    .with_contract(contract_id),
            );
        }
    }

    async fn maybe_summarize(&self, session_id: &str, overflow: bool) {
        let tokens = self
            .deps
            .buffer
            .token_count(session_id)
            .await
            .unwrap_or(0);
        if !overflow && tokens <= self.settings.summary.trigger_tokens {
            return;
        }

        // Off the reply path: the summarizer coalesces concurrent
        // triggers per session on its own.
        let summarizer = self.deps.summarizer.clone();
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            let deadline = Deadline::after(Duration::from_secs(20));
            if let Err(err) = summarizer.summarize_oldest(&session_id, deadline).await {
                tracing::warn!(session_id = %session_id, error = %err, "background summarization failed");
            }
        });
    }
}

/// The transition the loop breaker substitutes for a repeating one.
fn forced_cancellation(from: ContractState) -> StateTransition {
    let mut patch = ContextPatch::default();
    patch.annotations.insert(
        "loop_diagnostic".to_string(),
        serde_json::json!(LOOP_DIAGNOSTIC),
    );
    StateTransition::new(from, ContractState::Cancelled, "loop_detected")
        .with_patch(patch)
        .with_message(format!(
            "I've hit a processing loop and cancelled this purchase to be safe \
             (diagnostic code {}). Please start a new request.",
            LOOP_DIAGNOSTIC
        ))
}
