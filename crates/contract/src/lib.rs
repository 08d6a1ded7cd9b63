//! Contract state machines
//!
//! A contract is a named multi-turn workflow: a closed state enum and a
//! handler per state. Handlers are pure with respect to external
//! mutation: every change they want is expressed in the returned
//! [`concierge_core::ContextPatch`] and applied by the orchestrator only
//! after persistence succeeds.
//!
//! The canonical contract is the guided purchase flow; the registry
//! feeds whatever is registered into the routing manifest.

pub mod error;
pub mod handlers;
pub mod machine;
pub mod parsing;
pub mod registry;

pub use error::ContractError;
pub use handlers::{PurchaseDeps, StateHandler};
pub use machine::{Contract, PurchaseContract};
pub use registry::{ContractInfo, ContractRegistry};
