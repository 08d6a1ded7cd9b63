//! Tool adapters
//!
//! Tools are declared by a JSON Schema for their parameters and invoked
//! by id. The registry validates arguments against the schema before the
//! tool runs and wraps every invocation in the tool's timeout.

pub mod order_status;
pub mod registry;
pub mod tool;

pub use order_status::OrderStatusTool;
pub use registry::ToolRegistry;
pub use tool::{Tool, ToolError};
