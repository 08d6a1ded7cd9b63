//! Routing manifest
//!
//! Assembled fresh at each classification from the live contract and tool
//! registries, so a contract registered mid-session is routable on the
//! next turn without a restart.

use serde::{Deserialize, Serialize};

/// A contract as presented to the router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractDescriptor {
    pub id: String,
    pub description: String,
    pub trigger_keywords: Vec<String>,
}

/// A tool as presented to the router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub id: String,
    pub description: String,
    /// JSON Schema of the tool's parameters.
    pub parameters: serde_json::Value,
}

/// Live source of routable contracts and tools.
pub trait ManifestSource: Send + Sync {
    fn contracts(&self) -> Vec<ContractDescriptor>;
    fn tools(&self) -> Vec<ToolDescriptor>;
}

/// The assembled manifest for one classification call.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingManifest {
    pub contracts: Vec<ContractDescriptor>,
    pub tools: Vec<ToolDescriptor>,
}

/// The static intent kinds, always present.
pub const INTENT_KINDS: &[&str] = &["chat", "rag", "websearch", "tool", "contract"];

impl RoutingManifest {
    pub fn assemble(source: &dyn ManifestSource) -> Self {
        Self {
            contracts: source.contracts(),
            tools: source.tools(),
        }
    }

    pub fn has_contract(&self, id: &str) -> bool {
        self.contracts.iter().any(|c| c.id == id)
    }

    pub fn has_tool(&self, id: &str) -> bool {
        self.tools.iter().any(|t| t.id == id)
    }

    /// Render the manifest for the classification prompt.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("Intent kinds:\n");
        out.push_str("- chat: free conversation answered from model knowledge\n");
        out.push_str("- rag: answer grounded in the user's stored documents and memories\n");
        out.push_str("- websearch: answer requiring fresh information from the web\n");
        out.push_str("- tool: invoke one of the tools listed below\n");
        out.push_str("- contract: start or continue one of the workflows listed below\n");

        if self.contracts.is_empty() {
            out.push_str("\nNo contracts are available.\n");
        } else {
            out.push_str("\nAvailable contracts:\n");
            for c in &self.contracts {
                out.push_str(&format!(
                    "- {}: {} (triggers: {})\n",
                    c.id,
                    c.description,
                    c.trigger_keywords.join(", ")
                ));
            }
        }

        if self.tools.is_empty() {
            out.push_str("\nNo tools are available.\n");
        } else {
            out.push_str("\nAvailable tools:\n");
            for t in &self.tools {
                out.push_str(&format!("- {}: {}\n", t.id, t.description));
            }
        }

        out
    }

    /// JSON Schema the classification reply must conform to.
    pub fn reply_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "kind": { "type": "string", "enum": INTENT_KINDS },
                "confidence": { "type": "number", "minimum": 0.0, "maximum": 1.0 },
                "reasoning": { "type": "string" },
                "selected_contract": {
                    "type": "string",
                    "enum": self.contracts.iter().map(|c| c.id.clone()).collect::<Vec<_>>(),
                },
                "selected_tool": {
                    "type": "string",
                    "enum": self.tools.iter().map(|t| t.id.clone()).collect::<Vec<_>>(),
                },
            },
            "required": ["kind", "confidence", "reasoning"],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSource;

    impl ManifestSource for FixedSource {
        fn contracts(&self) -> Vec<ContractDescriptor> {
            vec![ContractDescriptor {
                id: "purchase".into(),
                description: "guided product purchase".into(),
                trigger_keywords: vec!["buy".into(), "order".into()],
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

    #[test]
    fn test_assemble_and_lookup() {
        let manifest = RoutingManifest::assemble(&FixedSource);
        assert!(manifest.has_contract("purchase"));
        assert!(!manifest.has_contract("travel"));
        assert!(manifest.has_tool("order_status"));
    }

    #[test]
    fn test_render_mentions_everything() {
        let manifest = RoutingManifest::assemble(&FixedSource);
        let rendered = manifest.render();
        assert!(rendered.contains("purchase"));
        assert!(rendered.contains("order_status"));
        for kind in INTENT_KINDS {
            assert!(rendered.contains(kind), "missing {}", kind);
        }
    }

    #[test]
    fn test_reply_schema_enums() {
        let manifest = RoutingManifest::assemble(&FixedSource);
        let schema = manifest.reply_schema();
        assert_eq!(schema["properties"]["selected_contract"]["enum"][0], "purchase");
    }
}
