//! Core types and collaborator traits for the concierge assistant
//!
//! This crate provides foundational types used across all other crates:
//! - Session context and contract state model
//! - Messages, products, routing intents
//! - State transitions and context patches
//! - Pipeline execution records
//! - Deadline propagation for cancellable external calls
//! - Collaborator traits for every external system the core talks to

pub mod constraint;
pub mod deadline;
pub mod error;
pub mod execution;
pub mod intent;
pub mod message;
pub mod product;
pub mod session;
pub mod state;
pub mod traits;
pub mod transition;

pub use constraint::{Constraint, ConstraintOp};
pub use deadline::Deadline;
pub use error::CollaboratorError;
pub use execution::{PipelineExecution, PipelineStatus, StageRecord};
pub use intent::{Intent, IntentKind, Volatility};
pub use message::{Message, Role};
pub use product::{AttributeSummary, Product};
pub use session::{SessionContext, CONTEXT_SCHEMA_VERSION};
pub use state::ContractState;
pub use transition::{ContextPatch, StateTransition};

pub use traits::{
    CheckoutProvider, Embedder, EphemeralKv, LlmClient, ObjectStore, OrderReceipt,
    ProductSearchProvider, SessionBackend, SessionTxn, SpecProvider, StoredSession, VectorHit,
    VectorIndex, VectorRecord, WebSearchProvider, WebSnippet,
};
