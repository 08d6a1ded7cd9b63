//! Manifest bridge
//!
//! Adapts the live contract and tool registries to the router's
//! [`ManifestSource`], so the routing manifest reflects registrations
//! made after startup.

use std::sync::Arc;

use concierge_contract::ContractRegistry;
use concierge_router::{ContractDescriptor, ManifestSource, ToolDescriptor};
use concierge_tools::ToolRegistry;

/// Routing manifest backed by the registries.
pub struct RegistryManifestSource {
    contracts: Arc<ContractRegistry>,
    tools: Arc<ToolRegistry>,
}

impl RegistryManifestSource {
    pub fn new(contracts: Arc<ContractRegistry>, tools: Arc<ToolRegistry>) -> Self {
        Self { contracts, tools }
    }
}

impl ManifestSource for RegistryManifestSource {
    fn contracts(&self) -> Vec<ContractDescriptor> {
        self.contracts
            .infos()
            .into_iter()
            .map(|info| ContractDescriptor {
                id: info.id,
                description: info.description,
                trigger_keywords: info.trigger_keywords,
            })
            .collect()
    }

    fn tools(&self) -> Vec<ToolDescriptor> {
        self.tools
            .descriptors()
            .into_iter()
            .map(|(id, description, parameters)| ToolDescriptor {
                id,
                description,
                parameters,
            })
            .collect()
    }
}
