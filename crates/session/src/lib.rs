//! Session persistence
//!
//! [`SessionStore`] is the sole writer of session contexts to durable
//! storage. Saves run a write / read-back / commit protocol inside one
//! transaction so a second writer (the class of defect behind the
//! historical infinite-loop bug) is caught before anything commits.

pub mod backend;
pub mod error;
pub mod store;

pub use backend::InMemorySessionBackend;
pub use error::SessionError;
pub use store::{SchemaUpgrader, SessionStore};
