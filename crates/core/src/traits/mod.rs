//! Collaborator traits
//!
//! Narrow interfaces to every external system the core talks to. The core
//! never reaches past these traits; reference in-process implementations
//! live next to their consumers and real adapters are injected at
//! construction time.

pub mod blob;
pub mod checkout;
pub mod kv;
pub mod llm;
pub mod relational;
pub mod search;
pub mod vector;

pub use blob::ObjectStore;
pub use checkout::{CheckoutProvider, OrderReceipt};
pub use kv::EphemeralKv;
pub use llm::LlmClient;
pub use relational::{SessionBackend, SessionTxn, StoredSession};
pub use search::{ProductSearchProvider, SpecProvider, WebSearchProvider, WebSnippet};
pub use vector::{Embedder, VectorHit, VectorIndex, VectorRecord};
