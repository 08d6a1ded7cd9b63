//! Search and enrichment collaborator traits

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::deadline::Deadline;
use crate::error::CollaboratorError;
use crate::product::Product;

/// The external product search provider.
#[async_trait]
pub trait ProductSearchProvider: Send + Sync {
    /// Search the catalog. `filters` are the session's hard-constraint
    /// predicate strings, passed through for providers that can narrow
    /// server-side; `limit` caps the returned items.
    async fn search(
        &self,
        query: &str,
        filters: &[String],
        limit: usize,
        deadline: Deadline,
    ) -> Result<Vec<Product>, CollaboratorError>;
}

/// The spec scraping provider, enriching one product at a time.
#[async_trait]
pub trait SpecProvider: Send + Sync {
    async fn fetch_specs(
        &self,
        product_id: &str,
        deadline: Deadline,
    ) -> Result<BTreeMap<String, String>, CollaboratorError>;
}

/// One result from the web search collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebSnippet {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// The web search collaborator used for volatile queries.
#[async_trait]
pub trait WebSearchProvider: Send + Sync {
    async fn search(
        &self,
        query: &str,
        deadline: Deadline,
    ) -> Result<Vec<WebSnippet>, CollaboratorError>;
}
