//! LLM client implementations
//!
//! The core talks to the model through [`concierge_core::LlmClient`]; this
//! crate provides the two implementations the system ships with:
//! - [`HttpLlmBackend`]: OpenAI-compatible chat-completions endpoint
//!   (OpenAI, Azure, vLLM, local servers)
//! - [`ScriptedLlm`]: deterministic scripted replies for tests

pub mod http;
pub mod scripted;

pub use http::{HttpLlmBackend, HttpLlmConfig};
pub use scripted::ScriptedLlm;
