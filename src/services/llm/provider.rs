//! LLM Provider Trait
//!
//! Defines the common interface the gateway drives. The production
//! implementation targets the Anthropic Messages API; tests inject mocks.

use async_trait::async_trait;

use super::types::{LlmError, LlmResult};

/// Trait implemented by remote model adapters.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for identification in logs.
    fn name(&self) -> &'static str;

    /// The model this provider is configured for.
    fn model(&self) -> &str;

    /// Send one prompt and return the model's complete text response.
    async fn complete(&self, prompt: &str) -> LlmResult<String>;
}

/// Error for a provider whose API key was never configured.
pub fn missing_api_key_error(provider: &str) -> LlmError {
    LlmError::AuthenticationFailed {
        message: format!("API key not configured for {}", provider),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_api_key_error() {
        let err = missing_api_key_error("anthropic");
        match err {
            LlmError::AuthenticationFailed { message } => {
                assert!(message.contains("anthropic"));
            }
            _ => panic!("Expected AuthenticationFailed"),
        }
    }
}
