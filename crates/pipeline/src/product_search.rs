//! Product search pipeline
//!
//! Search, then attribute analysis, then the result gate. The gate
//! decides whether the result set is small enough to rank or the user
//! must refine; the attribute analysis feeds the refinement prompt.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use concierge_config::SearchSettings;
use concierge_core::{
    AttributeSummary, Deadline, LlmClient, PipelineExecution, PipelineStatus, Product,
    ProductSearchProvider,
};

use crate::runtime::{PipelineError, PipelineRunner, Stage, StageCache};

/// Final output of the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductSearchOutcome {
    pub status: PipelineStatus,
    pub items: Vec<Product>,
    pub attribute_analysis: BTreeMap<String, AttributeSummary>,
    pub execution: PipelineExecution,
}

// ---------------------------------------------------------------------------
// Stage 1: provider search
// ---------------------------------------------------------------------------

struct SearchStage {
    provider: Arc<dyn ProductSearchProvider>,
    cap: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SearchInput {
    query: String,
    hard_constraints: Vec<String>,
}

#[async_trait]
impl Stage for SearchStage {
    type Input = SearchInput;
    type Output = Vec<Product>;

    fn name(&self) -> &'static str {
        "search"
    }

    async fn run(
        &self,
        input: &SearchInput,
        deadline: Deadline,
    ) -> Result<Vec<Product>, PipelineError> {
        let mut items = self
            .provider
            .search(&input.query, &input.hard_constraints, self.cap, deadline)
            .await?;
        items.truncate(self.cap);
        Ok(items)
    }

    /// Provider outage degrades to an empty result set; the pipeline
    /// reports `Degraded` rather than failing the turn.
    async fn fallback(
        &self,
        _input: &SearchInput,
        error: &PipelineError,
    ) -> Option<Vec<Product>> {
        tracing::warn!(error = %error, "product search provider failed");
        Some(Vec::new())
    }
}

// ---------------------------------------------------------------------------
// Stage 2: attribute analysis
// ---------------------------------------------------------------------------

struct AttributeAnalyzeStage {
    llm: Arc<dyn LlmClient>,
    cache_ttl: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AnalyzeInput {
    query: String,
    items: Vec<Product>,
}

/// Reply shape requested from the model.
#[derive(Debug, Deserialize)]
struct AnalysisReply {
    attributes: Vec<AnalysisAttribute>,
}

#[derive(Debug, Deserialize)]
struct AnalysisAttribute {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    min: Option<f64>,
    max: Option<f64>,
    unit: Option<String>,
    values: Option<Vec<String>>,
}

const ANALYSIS_SAMPLE: usize = 10;

#[async_trait]
impl Stage for AttributeAnalyzeStage {
    type Input = AnalyzeInput;
    type Output = BTreeMap<String, AttributeSummary>;

    fn name(&self) -> &'static str {
        "attribute_analyze"
    }

    async fn run(
        &self,
        input: &AnalyzeInput,
        deadline: Deadline,
    ) -> Result<Self::Output, PipelineError> {
        if input.items.is_empty() {
            return Ok(BTreeMap::new());
        }

        let sample: Vec<String> = input
            .items
            .iter()
            .take(ANALYSIS_SAMPLE)
            .map(|p| {
                format!(
                    "{} | {:.2} {} | {}",
                    p.title,
                    p.price_amount,
                    p.price_currency,
                    p.specs
                        .iter()
                        .map(|(k, v)| format!("{}={}", k, v))
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            })
            .collect();

        let prompt = format!(
            "A search for \"{}\" returned {} products. Sample:\n{}\n\n\
             Identify the attributes that best discriminate these results \
             (price range, brand set, key specs). Reply with JSON: \
             {{\"attributes\": [{{\"name\", \"type\": \"range\"|\"set\", \
             \"min\", \"max\", \"unit\", \"values\"}}]}}.",
            input.query,
            input.items.len(),
            sample.join("\n")
        );

        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "attributes": { "type": "array" }
            },
            "required": ["attributes"]
        });

        let reply = self.llm.classify(&prompt, &schema, deadline).await?;
        let parsed: AnalysisReply = serde_json::from_value(reply)
            .map_err(|e| PipelineError::stage("attribute_analyze", e.to_string()))?;

        let mut analysis = BTreeMap::new();
        for attr in parsed.attributes {
            let summary = match attr.kind.as_str() {
                "range" => match (attr.min, attr.max) {
                    (Some(min), Some(max)) => AttributeSummary::Range {
                        min,
                        max,
                        unit: attr.unit,
                    },
                    _ => continue,
                },
                "set" => AttributeSummary::Set {
                    values: attr.values.unwrap_or_default(),
                },
                _ => continue,
            };
            analysis.insert(attr.name.to_lowercase(), summary);
        }
        Ok(analysis)
    }

    /// Key on the query plus the identity of the leading items: the same
    /// search re-run within the TTL reuses the analysis.
    fn cache_key(&self, input: &AnalyzeInput) -> Option<String> {
        let mut hasher = Sha256::new();
        hasher.update(input.query.as_bytes());
        for item in input.items.iter().take(ANALYSIS_SAMPLE) {
            hasher.update(item.id.as_bytes());
        }
        let digest = hasher.finalize();
        Some(
            digest
                .iter()
                .take(8)
                .map(|b| format!("{:02x}", b))
                .collect(),
        )
    }

    fn cache_ttl(&self) -> Duration {
        self.cache_ttl
    }

    /// Analyzer outage passes the items through with no analysis.
    async fn fallback(
        &self,
        _input: &AnalyzeInput,
        error: &PipelineError,
    ) -> Option<Self::Output> {
        tracing::warn!(error = %error, "attribute analysis failed, passing empty analysis");
        Some(BTreeMap::new())
    }
}

// ---------------------------------------------------------------------------
// Stage 3: result gate (pure)
// ---------------------------------------------------------------------------

fn gate(items_len: usize, gate_limit: usize) -> PipelineStatus {
    if items_len <= gate_limit {
        PipelineStatus::Ok
    } else {
        PipelineStatus::TooMany
    }
}

// ---------------------------------------------------------------------------
// The pipeline
// ---------------------------------------------------------------------------

/// Runs search, then attribute analysis, then the result gate.
pub struct ProductSearchPipeline {
    runner: PipelineRunner,
    search: SearchStage,
    analyze: AttributeAnalyzeStage,
    settings: SearchSettings,
}

impl ProductSearchPipeline {
    pub fn new(
        provider: Arc<dyn ProductSearchProvider>,
        llm: Arc<dyn LlmClient>,
        cache: Arc<StageCache>,
        settings: SearchSettings,
    ) -> Self {
        Self {
            runner: PipelineRunner::new(cache),
            search: SearchStage {
                provider,
                cap: settings.provider_cap,
            },
            analyze: AttributeAnalyzeStage {
                llm,
                cache_ttl: Duration::from_secs(settings.analysis_cache_ttl_secs),
            },
            settings,
        }
    }

    pub async fn run(
        &self,
        query: &str,
        hard_constraints: &[String],
        deadline: Deadline,
    ) -> ProductSearchOutcome {
        let started = Instant::now();
        let mut execution = PipelineExecution::new("product_search");

        let search_input = SearchInput {
            query: query.to_string(),
            hard_constraints: hard_constraints.to_vec(),
        };
        // SearchStage always yields (its fallback is total), so this
        // cannot fail in practice; treat a failure as an empty degraded
        // result anyway.
        let items = match self
            .runner
            .execute(&self.search, &search_input, deadline, &mut execution)
            .await
        {
            Ok(items) => items,
            Err(_) => Vec::new(),
        };
        let search_degraded = execution.degraded;

        let analysis = if search_degraded || items.is_empty() {
            BTreeMap::new()
        } else {
            let analyze_input = AnalyzeInput {
                query: query.to_string(),
                items: items.clone(),
            };
            self.runner
                .execute(&self.analyze, &analyze_input, deadline, &mut execution)
                .await
                .unwrap_or_default()
        };

        let status = if search_degraded {
            PipelineStatus::Degraded
        } else {
            gate(items.len(), self.settings.gate_limit)
        };

        execution.status = status;
        execution.duration_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            query = %query,
            items = items.len(),
            status = ?status,
            degraded = execution.degraded,
            "product search pipeline finished"
        );

        ProductSearchOutcome {
            status,
            items,
            attribute_analysis: analysis,
            execution,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concierge_core::CollaboratorError;
    use concierge_llm::ScriptedLlm;

    struct FixedProvider {
        count: usize,
        fail: bool,
    }

    #[async_trait]
    impl ProductSearchProvider for FixedProvider {
        async fn search(
            &self,
            _query: &str,
            _filters: &[String],
            limit: usize,
            _deadline: Deadline,
        ) -> Result<Vec<Product>, CollaboratorError> {
            if self.fail {
                return Err(CollaboratorError::io("product_search", "provider down"));
            }
            Ok((0..self.count.min(limit))
                .map(|i| {
                    Product::new(format!("p{}", i), format!("Card {}", i))
                        .with_price(300.0 + i as f64, "CHF")
                })
                .collect())
        }
    }

    fn analysis_reply() -> serde_json::Value {
        serde_json::json!({
            "attributes": [
                {"name": "price", "type": "range", "min": 300.0, "max": 420.0, "unit": "CHF"},
                {"name": "brand", "type": "set", "values": ["NVIDIA", "AMD"]},
            ]
        })
    }

    fn pipeline(provider: FixedProvider, llm: ScriptedLlm) -> ProductSearchPipeline {
        ProductSearchPipeline::new(
            Arc::new(provider),
            Arc::new(llm),
            Arc::new(StageCache::new()),
            SearchSettings::default(),
        )
    }

    fn far() -> Deadline {
        Deadline::after(Duration::from_secs(10))
    }

    #[tokio::test]
    async fn test_small_result_set_is_ok() {
        let llm = ScriptedLlm::new();
        llm.push_json(analysis_reply());
        let outcome = pipeline(FixedProvider { count: 12, fail: false }, llm)
            .run("graphics card", &[], far())
            .await;

        assert_eq!(outcome.status, PipelineStatus::Ok);
        assert_eq!(outcome.items.len(), 12);
        assert!(outcome.attribute_analysis.contains_key("price"));
    }

    #[tokio::test]
    async fn test_large_result_set_gates_too_many() {
        let llm = ScriptedLlm::new();
        llm.push_json(analysis_reply());
        let outcome = pipeline(FixedProvider { count: 80, fail: false }, llm)
            .run("graphics card", &[], far())
            .await;

        assert_eq!(outcome.status, PipelineStatus::TooMany);
        assert_eq!(outcome.items.len(), 80);
        // Analysis available for the refinement prompt.
        assert!(!outcome.attribute_analysis.is_empty());
    }

    #[tokio::test]
    async fn test_gate_limit_boundary() {
        let llm = ScriptedLlm::new();
        llm.push_json(analysis_reply());
        let outcome = pipeline(FixedProvider { count: 50, fail: false }, llm)
            .run("graphics card", &[], far())
            .await;
        assert_eq!(outcome.status, PipelineStatus::Ok);
    }

    #[tokio::test]
    async fn test_provider_cap_enforced() {
        let llm = ScriptedLlm::new();
        llm.push_json(analysis_reply());
        let outcome = pipeline(FixedProvider { count: 500, fail: false }, llm)
            .run("graphics card", &[], far())
            .await;
        assert!(outcome.items.len() <= 100);
    }

    #[tokio::test]
    async fn test_provider_outage_degrades() {
        let llm = ScriptedLlm::new();
        let outcome = pipeline(FixedProvider { count: 0, fail: true }, llm)
            .run("graphics card", &[], far())
            .await;

        assert_eq!(outcome.status, PipelineStatus::Degraded);
        assert!(outcome.items.is_empty());
        assert!(outcome.execution.degraded);
    }

    #[tokio::test]
    async fn test_analyzer_outage_passes_items_through() {
        let llm = ScriptedLlm::new(); // no scripted reply: classify fails
        let outcome = pipeline(FixedProvider { count: 12, fail: false }, llm)
            .run("graphics card", &[], far())
            .await;

        assert_eq!(outcome.status, PipelineStatus::Ok);
        assert_eq!(outcome.items.len(), 12);
        assert!(outcome.attribute_analysis.is_empty());
        assert!(outcome.execution.degraded);
    }

    #[tokio::test]
    async fn test_analysis_cached_across_runs() {
        let llm = ScriptedLlm::new();
        llm.push_json(analysis_reply());
        // Only one scripted reply: a second run must hit the cache.
        let pipeline = pipeline(FixedProvider { count: 12, fail: false }, llm);

        let first = pipeline.run("graphics card", &[], far()).await;
        assert!(!first.execution.cache_hit);

        let second = pipeline.run("graphics card", &[], far()).await;
        assert!(second.execution.cache_hit);
        assert_eq!(second.attribute_analysis, first.attribute_analysis);
    }
}
