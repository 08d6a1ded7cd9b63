//! Pipeline runtime and concrete pipelines
//!
//! A small runner for linear DAGs of typed stages, not a workflow
//! engine. Stages declare an input and output record, an optional cache
//! key, and an optional fallback; the runner owns timing, caching,
//! deadline short-circuiting and the per-run execution record.
//!
//! Two pipelines are built on it:
//! - [`ProductSearchPipeline`]: search, attribute analysis, result gate
//! - [`PreferenceMatchPipeline`]: spec enrichment, hard filter, soft rank

pub mod preference_match;
pub mod product_search;
pub mod runtime;

pub use preference_match::{PreferenceMatchOutcome, PreferenceMatchPipeline};
pub use product_search::{ProductSearchOutcome, ProductSearchPipeline};
pub use runtime::{PipelineError, PipelineRunner, Stage, StageCache};
