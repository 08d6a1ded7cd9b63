//! Preference match pipeline
//!
//! Spec enrichment, then hard filter, then soft rank, producing the top-k
//! presented to the user. The filter is conservative (missing data never
//! excludes), the ranking is stable with search order as the tie-break.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use concierge_config::PreferenceSettings;
use concierge_core::{
    constraint, Deadline, PipelineExecution, PipelineStatus, Product, SpecProvider,
};

use crate::runtime::{PipelineError, PipelineRunner, Stage, StageCache};

/// Final output of the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PreferenceMatchOutcome {
    pub status: PipelineStatus,
    /// Ranked items, best first, at most `preference.top_k`.
    pub ranked: Vec<Product>,
    /// Everything that survived the hard filter, for callers that keep
    /// the compatible set around (the contract persists it as the
    /// session's result set).
    pub compatible: Vec<Product>,
    pub execution: PipelineExecution,
}

// ---------------------------------------------------------------------------
// Stage 1: spec enrichment (best-effort, per-item timeout)
// ---------------------------------------------------------------------------

struct SpecScrapeStage {
    provider: Arc<dyn SpecProvider>,
    per_item_timeout: std::time::Duration,
}

#[async_trait]
impl Stage for SpecScrapeStage {
    type Input = Vec<Product>;
    type Output = Vec<Product>;

    fn name(&self) -> &'static str {
        "spec_scrape"
    }

    async fn run(
        &self,
        input: &Vec<Product>,
        deadline: Deadline,
    ) -> Result<Vec<Product>, PipelineError> {
        // Fetch all spec sheets concurrently, each under its own budget.
        let fetches = input.iter().map(|product| {
            let mut product = product.clone();
            let item_deadline = deadline.capped(self.per_item_timeout);
            async move {
                match self.provider.fetch_specs(&product.id, item_deadline).await {
                    Ok(specs) => {
                        for (k, v) in specs {
                            product.specs.entry(k).or_insert(v);
                        }
                    }
                    Err(err) => {
                        // Best-effort: a missing spec sheet is data, not
                        // an error.
                        tracing::debug!(
                            product_id = %product.id,
                            error = %err,
                            "spec fetch skipped"
                        );
                    }
                }
                product
            }
        });
        Ok(futures::future::join_all(fetches).await)
    }
}

// ---------------------------------------------------------------------------
// Stage 2: hard filter
// ---------------------------------------------------------------------------

struct HardFilterStage;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FilterInput {
    items: Vec<Product>,
    hard_constraints: Vec<String>,
}

#[async_trait]
impl Stage for HardFilterStage {
    type Input = FilterInput;
    type Output = Vec<Product>;

    fn name(&self) -> &'static str {
        "hard_filter"
    }

    async fn run(
        &self,
        input: &FilterInput,
        _deadline: Deadline,
    ) -> Result<Vec<Product>, PipelineError> {
        let constraints = constraint::parse_all(&input.hard_constraints);
        let compatible = input
            .items
            .iter()
            .filter(|item| {
                // An item fails only when a constraint definitively
                // fails; unknown specs pass.
                !constraints
                    .iter()
                    .any(|c| c.evaluate(item) == Some(false))
            })
            .cloned()
            .collect();
        Ok(compatible)
    }
}

// ---------------------------------------------------------------------------
// Stage 3: soft rank
// ---------------------------------------------------------------------------

struct SoftRankStage;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RankInput {
    items: Vec<Product>,
    soft_preferences: BTreeMap<String, String>,
}

#[async_trait]
impl Stage for SoftRankStage {
    type Input = RankInput;
    type Output = Vec<Product>;

    fn name(&self) -> &'static str {
        "soft_rank"
    }

    async fn run(
        &self,
        input: &RankInput,
        _deadline: Deadline,
    ) -> Result<Vec<Product>, PipelineError> {
        let mut scored: Vec<(usize, Product)> = input
            .items
            .iter()
            .cloned()
            .enumerate()
            .map(|(index, mut product)| {
                product.score = Some(score(&product, &input.soft_preferences));
                (index, product)
            })
            .collect();

        // Stable sort descending by score; the original search order
        // breaks ties through the enumerate index.
        scored.sort_by(|(ia, a), (ib, b)| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(ia.cmp(ib))
        });

        Ok(scored.into_iter().map(|(_, p)| p).collect())
    }
}

/// Fraction of satisfied preferences, in [0, 1].
///
/// A preference counts fully when the item's matching spec (or title)
/// contains the preferred value, half when only the attribute exists with
/// another value.
fn score(product: &Product, preferences: &BTreeMap<String, String>) -> f32 {
    if preferences.is_empty() {
        return 0.5;
    }

    let title = product.title.to_lowercase();
    let mut total = 0.0f32;
    for (attribute, preferred) in preferences {
        let preferred_lower = preferred.to_lowercase();
        match product.spec(attribute) {
            Some(actual) => {
                let actual_lower = actual.to_lowercase();
                if actual_lower.contains(&preferred_lower)
                    || preferred_lower.contains(&actual_lower)
                {
                    total += 1.0;
                } else {
                    total += 0.0;
                }
            }
            None if title.contains(&preferred_lower) => total += 1.0,
            None => total += 0.5,
        }
    }
    (total / preferences.len() as f32).clamp(0.0, 1.0)
}

// ---------------------------------------------------------------------------
// The pipeline
// ---------------------------------------------------------------------------

/// Runs spec enrichment, hard filter and soft rank, then takes the top-k.
pub struct PreferenceMatchPipeline {
    runner: PipelineRunner,
    scrape: SpecScrapeStage,
    settings: PreferenceSettings,
}

impl PreferenceMatchPipeline {
    pub fn new(
        provider: Arc<dyn SpecProvider>,
        cache: Arc<StageCache>,
        settings: PreferenceSettings,
    ) -> Self {
        Self {
            runner: PipelineRunner::new(cache),
            scrape: SpecScrapeStage {
                provider,
                per_item_timeout: settings.spec_timeout(),
            },
            settings,
        }
    }

    pub async fn run(
        &self,
        items: &[Product],
        hard_constraints: &[String],
        soft_preferences: &BTreeMap<String, String>,
        deadline: Deadline,
    ) -> PreferenceMatchOutcome {
        let started = Instant::now();
        let mut execution = PipelineExecution::new("preference_match");
        let top_k = self.settings.top_k;

        let enriched = match self
            .runner
            .execute(&self.scrape, &items.to_vec(), deadline, &mut execution)
            .await
        {
            Ok(enriched) => enriched,
            Err(err) => {
                // Enrichment is best-effort by construction; if it still
                // failed (deadline), rank the raw items.
                tracing::warn!(error = %err, "spec scrape failed, ranking raw items");
                execution.degraded = true;
                items.to_vec()
            }
        };

        let filter_input = FilterInput {
            items: enriched.clone(),
            hard_constraints: hard_constraints.to_vec(),
        };
        let compatible = match self
            .runner
            .execute(&HardFilterStage, &filter_input, deadline, &mut execution)
            .await
        {
            Ok(compatible) => compatible,
            Err(err) => {
                tracing::warn!(error = %err, "hard filter failed, passing enriched items");
                execution.degraded = true;
                let mut items = enriched.clone();
                items.truncate(top_k);
                return self.finish(execution, started, PipelineStatus::Degraded, items, enriched);
            }
        };

        let rank_input = RankInput {
            items: compatible.clone(),
            soft_preferences: soft_preferences.clone(),
        };
        let ranked = match self
            .runner
            .execute(&SoftRankStage, &rank_input, deadline, &mut execution)
            .await
        {
            Ok(ranked) => ranked,
            Err(err) => {
                tracing::warn!(error = %err, "soft rank failed, passing compatible items");
                execution.degraded = true;
                let mut items = compatible.clone();
                items.truncate(top_k);
                return self.finish(execution, started, PipelineStatus::Degraded, items, compatible);
            }
        };

        let mut top = ranked;
        top.truncate(top_k);
        let status = if execution.degraded {
            PipelineStatus::Degraded
        } else {
            PipelineStatus::Ok
        };
        self.finish(execution, started, status, top, compatible)
    }

    fn finish(
        &self,
        mut execution: PipelineExecution,
        started: Instant,
        status: PipelineStatus,
        ranked: Vec<Product>,
        compatible: Vec<Product>,
    ) -> PreferenceMatchOutcome {
        execution.status = status;
        execution.duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            ranked = ranked.len(),
            status = ?status,
            "preference match pipeline finished"
        );
        PreferenceMatchOutcome {
            status,
            ranked,
            compatible,
            execution,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concierge_core::CollaboratorError;
    use std::collections::BTreeMap;
    use std::time::Duration;

    struct FixedSpecs {
        specs: BTreeMap<String, BTreeMap<String, String>>,
    }

    impl FixedSpecs {
        fn new() -> Self {
            Self {
                specs: BTreeMap::new(),
            }
        }

        fn with(mut self, id: &str, pairs: &[(&str, &str)]) -> Self {
            self.specs.insert(
                id.to_string(),
                pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            );
            self
        }
    }

    #[async_trait]
    impl SpecProvider for FixedSpecs {
        async fn fetch_specs(
            &self,
            product_id: &str,
            _deadline: Deadline,
        ) -> Result<BTreeMap<String, String>, CollaboratorError> {
            self.specs
                .get(product_id)
                .cloned()
                .ok_or_else(|| CollaboratorError::io("spec_provider", "no sheet"))
        }
    }

    fn cards() -> Vec<Product> {
        vec![
            Product::new("p1", "NVIDIA RTX 4070").with_price(899.0, "CHF"),
            Product::new("p2", "AMD RX 7800 XT").with_price(549.0, "CHF"),
            Product::new("p3", "NVIDIA RTX 4060 Ti").with_price(449.0, "CHF"),
            Product::new("p4", "NVIDIA RTX 4090").with_price(1799.0, "CHF"),
        ]
    }

    fn provider() -> FixedSpecs {
        FixedSpecs::new()
            .with("p1", &[("brand", "NVIDIA"), ("memory", "12GB")])
            .with("p2", &[("brand", "AMD"), ("memory", "16GB")])
            .with("p3", &[("brand", "NVIDIA"), ("memory", "8GB")])
            .with("p4", &[("brand", "NVIDIA"), ("memory", "24GB")])
    }

    fn pipeline(provider: FixedSpecs) -> PreferenceMatchPipeline {
        PreferenceMatchPipeline::new(
            Arc::new(provider),
            Arc::new(StageCache::new()),
            PreferenceSettings::default(),
        )
    }

    fn far() -> Deadline {
        Deadline::after(Duration::from_secs(10))
    }

    #[tokio::test]
    async fn test_hard_filter_excludes_definite_failures() {
        let outcome = pipeline(provider())
            .run(
                &cards(),
                &["price < 900 CHF".to_string(), "brand = NVIDIA".to_string()],
                &BTreeMap::new(),
                far(),
            )
            .await;

        assert_eq!(outcome.status, PipelineStatus::Ok);
        // p2 fails brand, p4 fails price; p1 and p3 remain.
        let ids: Vec<&str> = outcome.ranked.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "p3"]);
    }

    #[tokio::test]
    async fn test_missing_spec_does_not_exclude() {
        // No spec sheet for p9 at all: every constraint is unknown.
        let items = vec![Product::new("p9", "Mystery Card").with_price(500.0, "CHF")];
        let outcome = pipeline(FixedSpecs::new())
            .run(
                &items,
                &["memory >= 12GB".to_string()],
                &BTreeMap::new(),
                far(),
            )
            .await;

        assert_eq!(outcome.ranked.len(), 1);
    }

    #[tokio::test]
    async fn test_soft_rank_orders_by_preference() {
        let mut preferences = BTreeMap::new();
        preferences.insert("memory".to_string(), "16GB".to_string());

        let outcome = pipeline(provider())
            .run(&cards(), &[], &preferences, far())
            .await;

        assert_eq!(outcome.ranked[0].id, "p2");
        let top_score = outcome.ranked[0].score.unwrap();
        assert!(top_score > outcome.ranked[1].score.unwrap());
        for p in &outcome.ranked {
            let s = p.score.unwrap();
            assert!((0.0..=1.0).contains(&s));
        }
    }

    #[tokio::test]
    async fn test_top_k_cap() {
        let outcome = pipeline(provider())
            .run(&cards(), &[], &BTreeMap::new(), far())
            .await;
        assert!(outcome.ranked.len() <= 3);
    }

    #[tokio::test]
    async fn test_tie_break_preserves_search_order() {
        // No preferences: every item scores 0.5, so search order holds.
        let outcome = pipeline(provider())
            .run(&cards(), &[], &BTreeMap::new(), far())
            .await;
        let ids: Vec<&str> = outcome.ranked.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "p2", "p3"]);
    }

    #[tokio::test]
    async fn test_missing_spec_sheets_are_best_effort() {
        // Provider has no sheets; enrichment silently skips, rank still
        // runs on intrinsics.
        let outcome = pipeline(FixedSpecs::new())
            .run(&cards(), &[], &BTreeMap::new(), far())
            .await;
        assert_eq!(outcome.status, PipelineStatus::Ok);
        assert_eq!(outcome.ranked.len(), 3);
    }
}
