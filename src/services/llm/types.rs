//! LLM Types
//!
//! Error classification and result types for remote model interactions.
//! The gateway's retry policy keys off `LlmError::is_retryable`.

use thiserror::Error;

/// Error types for LLM operations
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    /// Authentication failed (invalid API key)
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// API quota or credit exhausted
    #[error("Quota exhausted: {message}")]
    QuotaExhausted { message: String },

    /// Rate limit exceeded; `retry_after` carries the remote's advisory delay
    /// in seconds when it was parseable
    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<u64>,
    },

    /// The call exceeded the configured per-call timeout
    #[error("LLM call timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// Network/connection error
    #[error("Network error: {message}")]
    NetworkError { message: String },

    /// Server-side error from the provider
    #[error("Server error: {message}")]
    ServerError {
        message: String,
        status: Option<u16>,
    },

    /// Invalid request (bad parameters, unknown model)
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// Response body could not be parsed
    #[error("Parse error: {message}")]
    ParseError { message: String },

    /// The model returned no text
    #[error("模型返回空响应")]
    EmptyResponse,

    /// Anything else
    #[error("LLM error: {message}")]
    Other { message: String },
}

impl LlmError {
    /// Whether the gateway should retry this class of error.
    ///
    /// Authentication, quota and request-shape errors will not get better on
    /// a second attempt; everything else is treated as transient.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            LlmError::AuthenticationFailed { .. }
                | LlmError::QuotaExhausted { .. }
                | LlmError::InvalidRequest { .. }
        )
    }

    /// Short class name used in logs and job failure messages.
    pub fn kind(&self) -> &'static str {
        match self {
            LlmError::AuthenticationFailed { .. } => "LLMAuth",
            LlmError::QuotaExhausted { .. } => "LLMQuota",
            LlmError::RateLimited { .. } => "LLMRateLimit",
            LlmError::Timeout { .. } => "LLMTimeout",
            LlmError::NetworkError { .. } | LlmError::ServerError { .. } => "LLMTransient",
            LlmError::InvalidRequest { .. } => "LLMInvalidRequest",
            LlmError::ParseError { .. } => "LLMParseError",
            LlmError::EmptyResponse => "LLMEmptyResponse",
            LlmError::Other { .. } => "LLMError",
        }
    }

    /// Advisory retry delay from the remote, if the error carried one.
    pub fn advisory_delay_secs(&self) -> Option<u64> {
        match self {
            LlmError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Result type for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;

/// Map an HTTP error status from the provider into an error class.
pub fn parse_http_error(status: u16, body: &str, retry_after: Option<u64>) -> LlmError {
    let lowered = body.to_lowercase();
    match status {
        401 | 403 => LlmError::AuthenticationFailed {
            message: body.to_string(),
        },
        402 => LlmError::QuotaExhausted {
            message: body.to_string(),
        },
        429 if lowered.contains("quota") || lowered.contains("credit") => {
            LlmError::QuotaExhausted {
                message: body.to_string(),
            }
        }
        429 => LlmError::RateLimited {
            message: body.to_string(),
            retry_after,
        },
        400 | 404 | 422 => LlmError::InvalidRequest {
            message: body.to_string(),
        },
        500..=599 => LlmError::ServerError {
            message: body.to_string(),
            status: Some(status),
        },
        _ => LlmError::Other {
            message: format!("HTTP {}: {}", status, body),
        },
    }
}
