//! Anthropic Claude Provider
//!
//! Implementation of the LlmProvider trait for Anthropic's Messages API.

use async_trait::async_trait;
use serde::Deserialize;

use super::provider::{missing_api_key_error, LlmProvider};
use super::types::{parse_http_error, LlmError, LlmResult};
use crate::config::LlmSettings;

/// Default Anthropic API endpoint
const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";

/// Current API version
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Claude provider
pub struct AnthropicProvider {
    settings: LlmSettings,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new provider with the given settings.
    ///
    /// The per-call timeout is enforced by the HTTP client itself.
    pub fn new(settings: LlmSettings) -> Self {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .unwrap_or_default();
        Self { settings, client }
    }

    fn base_url(&self) -> &str {
        self.settings
            .base_url
            .as_deref()
            .unwrap_or(ANTHROPIC_API_URL)
    }

    fn build_request_body(&self, prompt: &str) -> serde_json::Value {
        serde_json::json!({
            "model": self.settings.model,
            "max_tokens": self.settings.max_tokens,
            "messages": [
                { "role": "user", "content": prompt }
            ],
        })
    }

    fn classify_transport_error(&self, err: reqwest::Error) -> LlmError {
        if err.is_timeout() {
            LlmError::Timeout {
                seconds: self.settings.timeout.as_secs(),
            }
        } else {
            LlmError::NetworkError {
                message: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.settings.model
    }

    async fn complete(&self, prompt: &str) -> LlmResult<String> {
        let api_key = self
            .settings
            .api_key
            .as_ref()
            .ok_or_else(|| missing_api_key_error("anthropic"))?;

        let body = self.build_request_body(prompt);

        let response = self
            .client
            .post(self.base_url())
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| self.classify_transport_error(e))?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());

        let body_text = response.text().await.map_err(|e| LlmError::NetworkError {
            message: e.to_string(),
        })?;

        if status != 200 {
            return Err(parse_http_error(status, &body_text, retry_after));
        }

        let parsed: MessagesResponse =
            serde_json::from_str(&body_text).map_err(|e| LlmError::ParseError {
                message: format!("Failed to parse response: {}", e),
            })?;

        let mut text = String::new();
        for block in &parsed.content {
            if let ContentBlock::Text { text: t } = block {
                text.push_str(t);
            }
        }
        let text = text.trim().to_string();

        if text.is_empty() {
            return Err(LlmError::EmptyResponse);
        }

        Ok(text)
    }
}

/// Messages API response format
#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn test_settings() -> LlmSettings {
        let mut settings = Config::default().llm;
        settings.api_key = Some("test-key".to_string());
        settings
    }

    #[test]
    fn test_provider_creation() {
        let provider = AnthropicProvider::new(test_settings());
        assert_eq!(provider.name(), "anthropic");
        assert_eq!(provider.model(), "claude-3-5-sonnet-20241022");
    }

    #[test]
    fn test_request_body() {
        let provider = AnthropicProvider::new(test_settings());
        let body = provider.build_request_body("撰写专利草案");
        assert_eq!(body["model"], "claude-3-5-sonnet-20241022");
        assert_eq!(body["max_tokens"], 8192);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "撰写专利草案");
    }

    #[test]
    fn test_base_url_override() {
        let mut settings = test_settings();
        settings.base_url = Some("http://127.0.0.1:9999/v1/messages".to_string());
        let provider = AnthropicProvider::new(settings);
        assert_eq!(provider.base_url(), "http://127.0.0.1:9999/v1/messages");
    }

    #[tokio::test]
    async fn test_missing_api_key_fails_fast() {
        let mut settings = test_settings();
        settings.api_key = None;
        let provider = AnthropicProvider::new(settings);
        let err = provider.complete("hello").await.unwrap_err();
        assert!(matches!(err, LlmError::AuthenticationFailed { .. }));
    }

    #[test]
    fn test_response_parsing() {
        let raw = r##"{
            "content": [
                {"type": "text", "text": "# 专利标题"},
                {"type": "text", "text": "\n正文"}
            ],
            "model": "claude-3-5-sonnet-20241022"
        }"##;
        let parsed: MessagesResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.content.len(), 2);
    }
}
