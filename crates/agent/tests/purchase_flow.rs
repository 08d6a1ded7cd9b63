//! End-to-end purchase flow scenarios
//!
//! Full orchestrator wiring with scripted collaborators: the happy-path
//! purchase, the refinement cap, and the loop breaker against a faulty
//! session backend resurrecting stale state.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use concierge_agent::{AgentError, Orchestrator, OrchestratorDeps};
use concierge_config::{Settings, VolatilityStore};
use concierge_contract::{ContractRegistry, PurchaseContract, PurchaseDeps};
use concierge_core::{
    CheckoutProvider, CollaboratorError, Deadline, IntentKind, OrderReceipt, Product,
    ProductSearchProvider, SessionBackend, SessionTxn, SpecProvider, StoredSession,
    WebSearchProvider, WebSnippet,
};
use concierge_llm::ScriptedLlm;
use concierge_memory::{
    AuditStore, BufferStore, HashingEmbedder, InMemoryKv, InMemoryObjectStore,
    InMemorySummaryBackend, InMemoryVectorIndex, RollingSummarizer, SemanticStore, SummaryStore,
};
use concierge_pipeline::{PreferenceMatchPipeline, ProductSearchPipeline, StageCache};
use concierge_redact::{GazetteerRecognizer, Redactor};
use concierge_session::{InMemorySessionBackend, SessionStore};
use concierge_tools::{OrderStatusTool, ToolRegistry};

// ---------------------------------------------------------------------------
// Scripted collaborators
// ---------------------------------------------------------------------------

struct SequencedProvider {
    counts: Vec<usize>,
    calls: AtomicUsize,
}

impl SequencedProvider {
    fn new(counts: Vec<usize>) -> Self {
        Self {
            counts,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ProductSearchProvider for SequencedProvider {
    async fn search(
        &self,
        _query: &str,
        _filters: &[String],
        limit: usize,
        _deadline: Deadline,
    ) -> Result<Vec<Product>, CollaboratorError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let count = *self
            .counts
            .get(call)
            .unwrap_or_else(|| self.counts.last().unwrap_or(&0));
        Ok((0..count.min(limit))
            .map(|i| {
                Product::new(format!("p{}", i), format!("NVIDIA RTX {}", 4000 + i))
                    .with_price(400.0 + i as f64, "CHF")
                    .with_spec("memory", "12GB")
            })
            .collect())
    }
}

struct NoSpecs;

#[async_trait]
impl SpecProvider for NoSpecs {
    async fn fetch_specs(
        &self,
        _product_id: &str,
        _deadline: Deadline,
    ) -> Result<BTreeMap<String, String>, CollaboratorError> {
        Ok(BTreeMap::new())
    }
}

struct FixedCheckout;

#[async_trait]
impl CheckoutProvider for FixedCheckout {
    async fn place_order(
        &self,
        _session_id: &str,
        _product: &Product,
        _deadline: Deadline,
    ) -> Result<OrderReceipt, CollaboratorError> {
        Ok(OrderReceipt {
            order_id: "ord-42".to_string(),
            placed_at: chrono::Utc::now(),
        })
    }
}

struct NoWeb;

#[async_trait]
impl WebSearchProvider for NoWeb {
    async fn search(
        &self,
        _query: &str,
        _deadline: Deadline,
    ) -> Result<Vec<WebSnippet>, CollaboratorError> {
        Ok(Vec::new())
    }
}

/// The historical defect: a sibling writer that resurrects a stale
/// context. On fetch of a session sitting in `refine_constraints` it
/// returns the context as it looked before the refinement round.
struct StaleReadBackend {
    inner: InMemorySessionBackend,
}

#[async_trait]
impl SessionBackend for StaleReadBackend {
    async fn fetch(&self, session_id: &str) -> Result<Option<StoredSession>, CollaboratorError> {
        let Some(mut row) = self.inner.fetch(session_id).await? else {
            return Ok(None);
        };
        if row.state == "refine_constraints" {
            let mut blob: serde_json::Value =
                serde_json::from_str(&row.context_blob).expect("valid blob");
            blob["state"] = serde_json::json!("search");
            blob["refinement_attempts"] = serde_json::json!(0);
            row.state = "search".to_string();
            row.context_blob = blob.to_string();
        }
        Ok(Some(row))
    }

    async fn begin(&self, session_id: &str) -> Result<Box<dyn SessionTxn>, CollaboratorError> {
        self.inner.begin(session_id).await
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

fn analysis_reply() -> serde_json::Value {
    serde_json::json!({
        "attributes": [
            {"name": "price", "type": "range", "min": 400.0, "max": 520.0, "unit": "CHF"},
            {"name": "brand", "type": "set", "values": ["NVIDIA", "AMD"]},
        ]
    })
}

fn purchase_intent() -> serde_json::Value {
    serde_json::json!({
        "kind": "contract",
        "confidence": 0.93,
        "reasoning": "explicit purchase request",
        "selected_contract": "purchase",
    })
}

fn build(counts: Vec<usize>, backend: Arc<dyn SessionBackend>) -> (Orchestrator, Arc<ScriptedLlm>) {
    build_with(counts, backend, Settings::baseline(), ScriptedLlm::new())
}

fn build_with(
    counts: Vec<usize>,
    backend: Arc<dyn SessionBackend>,
    settings: Settings,
    llm: ScriptedLlm,
) -> (Orchestrator, Arc<ScriptedLlm>) {
    let llm = Arc::new(llm.with_default_reply(analysis_reply().to_string()));
    let cache = Arc::new(StageCache::new());
    let redactor = Arc::new(Redactor::new().with_ner(Arc::new(GazetteerRecognizer::new())));

    let sessions = Arc::new(SessionStore::new(
        backend,
        settings.session.clone(),
        settings.search.clone(),
    ));
    let buffer = Arc::new(BufferStore::new(
        Arc::new(InMemoryKv::new()),
        settings.buffer.clone(),
    ));
    let summaries = Arc::new(SummaryStore::new(Arc::new(InMemorySummaryBackend::new())));
    let semantic = Arc::new(SemanticStore::new(
        Arc::new(InMemoryVectorIndex::new()),
        Arc::new(HashingEmbedder::new()),
        redactor.clone(),
    ));
    let audit = Arc::new(AuditStore::new(Arc::new(InMemoryObjectStore::new())));
    let summarizer = Arc::new(RollingSummarizer::new(
        buffer.clone(),
        summaries.clone(),
        redactor,
        llm.clone(),
        settings.summary.clone(),
    ));

    let purchase_deps = Arc::new(PurchaseDeps {
        search_pipeline: Arc::new(ProductSearchPipeline::new(
            Arc::new(SequencedProvider::new(counts)),
            llm.clone(),
            cache.clone(),
            settings.search.clone(),
        )),
        match_pipeline: Arc::new(PreferenceMatchPipeline::new(
            Arc::new(NoSpecs),
            cache,
            settings.preference.clone(),
        )),
        checkout: Arc::new(FixedCheckout),
        max_refinements: settings.search.max_refinements,
    });
    let contracts = Arc::new(ContractRegistry::new());
    contracts.register(Arc::new(PurchaseContract::new(purchase_deps)));

    let mut tools = ToolRegistry::new();
    tools.register(OrderStatusTool::new()).unwrap();

    let deps = OrchestratorDeps {
        llm: llm.clone(),
        websearch: Arc::new(NoWeb),
        sessions,
        buffer,
        summaries,
        semantic,
        audit,
        summarizer,
        contracts,
        tools: Arc::new(tools),
        volatility: Arc::new(VolatilityStore::default()),
    };

    (Orchestrator::new(deps, settings), llm)
}

async fn contract_state(orchestrator: &Orchestrator, session_id: &str) -> String {
    orchestrator
        .get_current_contract(session_id)
        .await
        .unwrap()
        .unwrap()["state"]
        .as_str()
        .unwrap()
        .to_string()
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_purchase_happy_path() {
    let (orchestrator, llm) = build(vec![12], Arc::new(InMemorySessionBackend::new()));
    llm.push_json(purchase_intent());

    // Turn 1: routed into the contract, search finds 12 items.
    let r1 = orchestrator
        .turn("s1", Some("u1"), "I want to buy a graphics card")
        .await
        .unwrap();
    assert_eq!(r1.kind, IntentKind::Contract);
    assert!(r1.assistant_message.contains("12"));
    assert_eq!(contract_state(&orchestrator, "s1").await, "match_preferences");

    // Turn 2: preferences; ranking produces exactly three options.
    let r2 = orchestrator
        .turn("s1", Some("u1"), "NVIDIA, 12GB, under 900 CHF")
        .await
        .unwrap();
    assert_eq!(r2.kind, IntentKind::Contract);
    assert_eq!(contract_state(&orchestrator, "s1").await, "present_options");
    let view = orchestrator
        .get_current_contract("s1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(view["ranked_count"], 3);

    // Turn 3: selection.
    orchestrator
        .turn("s1", Some("u1"), "I'll take the first")
        .await
        .unwrap();
    assert_eq!(contract_state(&orchestrator, "s1").await, "confirm_purchase");

    // Turn 4: confirmation drives checkout through to completion.
    let r4 = orchestrator.turn("s1", Some("u1"), "yes").await.unwrap();
    assert!(r4.assistant_message.contains("ord-42"));
    let view = orchestrator
        .get_current_contract("s1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(view["state"], "completed");
    assert_eq!(view["order_id"], "ord-42");
}

#[tokio::test]
async fn test_refinement_cap_forces_match() {
    let (orchestrator, llm) = build(
        vec![120, 80, 60, 60],
        Arc::new(InMemorySessionBackend::new()),
    );
    llm.push_json(purchase_intent());

    orchestrator
        .turn("s1", None, "I want to buy a graphics card")
        .await
        .unwrap();
    assert_eq!(contract_state(&orchestrator, "s1").await, "refine_constraints");

    orchestrator.turn("s1", None, "under 2000 CHF").await.unwrap();
    assert_eq!(contract_state(&orchestrator, "s1").await, "refine_constraints");

    orchestrator.turn("s1", None, "under 1500 CHF").await.unwrap();
    assert_eq!(contract_state(&orchestrator, "s1").await, "refine_constraints");

    // The cap forces matching on the current items instead of another
    // refinement round.
    orchestrator
        .turn("s1", None, "NVIDIA under 1200 CHF")
        .await
        .unwrap();
    assert_eq!(contract_state(&orchestrator, "s1").await, "present_options");
}

#[tokio::test]
async fn test_loop_detector_forces_cancellation() {
    // The provider never narrows and the backend resurrects stale
    // contexts, so the session spins search -> refine_constraints.
    let (orchestrator, llm) = build(
        vec![120],
        Arc::new(StaleReadBackend {
            inner: InMemorySessionBackend::new(),
        }),
    );
    llm.push_json(purchase_intent());

    orchestrator
        .turn("s1", None, "I want to buy a graphics card")
        .await
        .unwrap();

    // Each turn the resurrected context repeats search -> refine.
    orchestrator.turn("s1", None, "under 2000 CHF").await.unwrap();
    orchestrator.turn("s1", None, "under 1500 CHF").await.unwrap();

    // Third repeat of the pair within the window: forced cancellation
    // with a diagnostic code.
    let r = orchestrator.turn("s1", None, "under 1200 CHF").await.unwrap();
    assert!(
        r.assistant_message.contains("LOOP-001"),
        "expected diagnostic in: {}",
        r.assistant_message
    );
    assert_eq!(contract_state(&orchestrator, "s1").await, "cancelled");

    // No further contract progress is attempted.
    let r = orchestrator.turn("s1", None, "under 1100 CHF").await.unwrap();
    assert_ne!(r.kind, IntentKind::Contract);
    assert_eq!(contract_state(&orchestrator, "s1").await, "cancelled");
}

#[tokio::test]
async fn test_full_session_queue_returns_busy() {
    let mut settings = Settings::baseline();
    settings.concurrency.session_queue_depth = 1;

    // A slow router call keeps the only queue slot occupied.
    let slow_llm = ScriptedLlm::new().with_latency(std::time::Duration::from_millis(300));
    let (orchestrator, _llm) = build_with(
        vec![12],
        Arc::new(InMemorySessionBackend::new()),
        settings,
        slow_llm,
    );

    let orchestrator = Arc::new(orchestrator);
    let first = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.turn("s1", None, "hello there").await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    // The queue is full: the overlapping turn is refused immediately.
    let second = orchestrator.turn("s1", None, "are you still there?").await;
    assert!(matches!(second, Err(AgentError::Busy)));

    // Another session is unaffected.
    let other = orchestrator.turn("s2", None, "hi").await;
    assert!(!matches!(other, Err(AgentError::Busy)));

    first.await.unwrap().unwrap();
}
