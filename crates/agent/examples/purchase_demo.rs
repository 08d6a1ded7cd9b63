//! Scripted purchase conversation against the fully wired orchestrator.
//!
//! Every collaborator is an in-process reference implementation, so this
//! runs without any external service:
//!
//! ```sh
//! cargo run -p concierge-agent --example purchase_demo
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use concierge_agent::{Orchestrator, OrchestratorDeps};
use concierge_config::{Settings, VolatilityStore};
use concierge_contract::{ContractRegistry, PurchaseContract, PurchaseDeps};
use concierge_core::{
    CheckoutProvider, CollaboratorError, Deadline, OrderReceipt, Product, ProductSearchProvider,
    SpecProvider, WebSearchProvider, WebSnippet,
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

struct DemoCatalog;

#[async_trait]
impl ProductSearchProvider for DemoCatalog {
    async fn search(
        &self,
        _query: &str,
        _filters: &[String],
        limit: usize,
        _deadline: Deadline,
    ) -> Result<Vec<Product>, CollaboratorError> {
        let cards = [
            ("gpu-4070", "NVIDIA RTX 4070", 599.0),
            ("gpu-4070s", "NVIDIA RTX 4070 Super", 659.0),
            ("gpu-7800", "AMD RX 7800 XT", 549.0),
            ("gpu-4060", "NVIDIA RTX 4060 Ti", 449.0),
            ("gpu-7900", "AMD RX 7900 GRE", 619.0),
            ("gpu-4080", "NVIDIA RTX 4080 Super", 1099.0),
        ];
        Ok(cards
            .iter()
            .take(limit)
            .map(|(id, title, price)| {
                Product::new(*id, *title).with_price(*price, "CHF")
            })
            .collect())
    }
}

struct DemoSpecs;

#[async_trait]
impl SpecProvider for DemoSpecs {
    async fn fetch_specs(
        &self,
        product_id: &str,
        _deadline: Deadline,
    ) -> Result<BTreeMap<String, String>, CollaboratorError> {
        let mut specs = BTreeMap::new();
        let (brand, memory) = match product_id {
            "gpu-7800" | "gpu-7900" => ("AMD", "16GB"),
            "gpu-4060" => ("NVIDIA", "8GB"),
            "gpu-4080" => ("NVIDIA", "16GB"),
            _ => ("NVIDIA", "12GB"),
        };
        specs.insert("brand".to_string(), brand.to_string());
        specs.insert("memory".to_string(), memory.to_string());
        Ok(specs)
    }
}

struct DemoCheckout;

#[async_trait]
impl CheckoutProvider for DemoCheckout {
    async fn place_order(
        &self,
        _session_id: &str,
        product: &Product,
        _deadline: Deadline,
    ) -> Result<OrderReceipt, CollaboratorError> {
        println!("  [checkout] placing order for {}", product.title);
        Ok(OrderReceipt {
            order_id: "demo-order-1".to_string(),
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

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let settings = Settings::baseline();
    let llm = Arc::new(ScriptedLlm::new().with_default_reply(
        r#"{"attributes": [{"name": "price", "type": "range", "min": 449.0, "max": 1099.0, "unit": "CHF"}]}"#,
    ));
    // First turn: the router classifies the purchase request.
    llm.push_json(serde_json::json!({
        "kind": "contract",
        "confidence": 0.95,
        "reasoning": "explicit purchase request",
        "selected_contract": "purchase",
    }));

    let cache = Arc::new(StageCache::new());
    let redactor = Arc::new(Redactor::new().with_ner(Arc::new(GazetteerRecognizer::new())));
    let buffer = Arc::new(BufferStore::new(
        Arc::new(InMemoryKv::new()),
        settings.buffer.clone(),
    ));
    let summaries = Arc::new(SummaryStore::new(Arc::new(InMemorySummaryBackend::new())));

    let purchase_deps = Arc::new(PurchaseDeps {
        search_pipeline: Arc::new(ProductSearchPipeline::new(
            Arc::new(DemoCatalog),
            llm.clone(),
            cache.clone(),
            settings.search.clone(),
        )),
        match_pipeline: Arc::new(PreferenceMatchPipeline::new(
            Arc::new(DemoSpecs),
            cache,
            settings.preference.clone(),
        )),
        checkout: Arc::new(DemoCheckout),
        max_refinements: settings.search.max_refinements,
    });
    let contracts = Arc::new(ContractRegistry::new());
    contracts.register(Arc::new(PurchaseContract::new(purchase_deps)));

    let mut tools = ToolRegistry::new();
    tools
        .register(OrderStatusTool::new().with_status("demo-order-1", "processing"))
        .expect("valid tool schema");

    let orchestrator = Orchestrator::new(
        OrchestratorDeps {
            llm: llm.clone(),
            websearch: Arc::new(NoWeb),
            sessions: Arc::new(SessionStore::new(
                Arc::new(InMemorySessionBackend::new()),
                settings.session.clone(),
                settings.search.clone(),
            )),
            buffer: buffer.clone(),
            summaries: summaries.clone(),
            semantic: Arc::new(SemanticStore::new(
                Arc::new(InMemoryVectorIndex::new()),
                Arc::new(HashingEmbedder::new()),
                redactor.clone(),
            )),
            audit: Arc::new(AuditStore::new(Arc::new(InMemoryObjectStore::new()))),
            summarizer: Arc::new(RollingSummarizer::new(
                buffer,
                summaries,
                redactor,
                llm.clone(),
                settings.summary.clone(),
            )),
            contracts,
            tools: Arc::new(tools),
            volatility: Arc::new(VolatilityStore::default()),
        },
        settings,
    );

    let turns = [
        "I want to buy a graphics card",
        "NVIDIA, 12GB, under 900 CHF",
        "I'll take the first",
        "yes",
    ];

    for user_message in turns {
        println!("\nuser> {}", user_message);
        match orchestrator.turn("demo-session", Some("demo-user"), user_message).await {
            Ok(reply) => println!("assistant ({})> {}", reply.kind.as_str(), reply.assistant_message),
            Err(err) => {
                eprintln!("turn failed: {}", err);
                break;
            }
        }
    }
}
