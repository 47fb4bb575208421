//! LLM Integration
//!
//! Provider trait, the Anthropic implementation, error classification, and
//! the process-wide serialized gateway.

pub mod anthropic;
pub mod gateway;
pub mod provider;
pub mod types;

pub use anthropic::AnthropicProvider;
pub use gateway::{CallMeta, LlmGateway};
pub use provider::LlmProvider;
pub use types::{LlmError, LlmResult};
