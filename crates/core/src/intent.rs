//! Routing intents

use serde::{Deserialize, Serialize};

/// Where a turn is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    Chat,
    Rag,
    Websearch,
    Tool,
    Contract,
}

impl IntentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentKind::Chat => "chat",
            IntentKind::Rag => "rag",
            IntentKind::Websearch => "websearch",
            IntentKind::Tool => "tool",
            IntentKind::Contract => "contract",
        }
    }
}

/// How quickly the answer to a query goes stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Volatility {
    /// Changes daily or faster (prices, office holders, scores).
    Volatile,
    /// Changes over months (product lineups, policies).
    SemiStatic,
    /// Settled facts and history.
    Static,
    /// No keyword matched.
    #[default]
    Unknown,
}

/// The typed routing decision for one turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub kind: IntentKind,
    /// Classifier confidence in [0, 1]. Below the configured floor the
    /// router already downgraded `kind` to `Chat`.
    pub confidence: f32,
    pub reasoning: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_contract: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_tool: Option<String>,
    pub volatility: Volatility,
    pub temporal_cue: bool,
}

impl Intent {
    /// The safe default used whenever classification cannot be trusted.
    pub fn chat_fallback(reason: impl Into<String>) -> Self {
        Self {
            kind: IntentKind::Chat,
            confidence: 0.0,
            reasoning: reason.into(),
            selected_contract: None,
            selected_tool: None,
            volatility: Volatility::Unknown,
            temporal_cue: false,
        }
    }
}
