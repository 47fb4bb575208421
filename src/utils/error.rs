//! Error Handling
//!
//! Unified error types for the application.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

use crate::services::llm::LlmError;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Input validation failures (bad mode, iterations out of range, ...)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing job / round / template
    #[error("Not found: {0}")]
    NotFound(String),

    /// Job queue is at capacity
    #[error("Queue full: {0}")]
    QueueFull(String),

    /// Assembled prompt still over the input budget after compression
    #[error("Prompt too large: {0}")]
    PromptTooLarge(String),

    /// Remote model errors, classified by the gateway
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// Cooperative cancellation observed
    #[error("任务已取消")]
    Cancelled,

    /// Database errors
    #[error("Database error: {0}")]
    Database(String),

    /// SQLite errors (auto-converted from rusqlite::Error)
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors from prompt templates
    #[error("Template parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a database error
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the error marks a cancelled run rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Short machine-readable class name, used in job failure messages and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::QueueFull(_) => "queue_full",
            Self::PromptTooLarge(_) => "prompt_too_large",
            Self::Llm(e) => e.kind(),
            Self::Cancelled => "cancelled",
            Self::Database(_) | Self::Sqlite(_) => "database_error",
            Self::Config(_) => "config_error",
            Self::Io(_) => "io_error",
            Self::Serialization(_) | Self::Yaml(_) => "parse_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AppError::validation("迭代次数不能超过10");
        assert_eq!(err.to_string(), "Validation error: 迭代次数不能超过10");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let app_err: AppError = io_err.into();
        assert!(matches!(app_err, AppError::Io(_)));
        assert_eq!(app_err.kind(), "io_error");
    }

    #[test]
    fn test_cancelled_is_not_a_failure_kind() {
        assert!(AppError::Cancelled.is_cancelled());
        assert_eq!(AppError::Cancelled.kind(), "cancelled");
    }
}
