//! LLM Gateway
//!
//! The single, serialized entry point to the remote model. All callers share
//! one async mutex so at most one remote call is in flight per process, which
//! bounds upstream rate use and keeps retry accounting simple.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{info, warn};

use super::provider::LlmProvider;
use super::types::{LlmError, LlmResult};
use crate::config::LlmSettings;
use crate::utils::text::{char_len, mask_secrets, truncate_chars};

/// Marker appended to responses cut at the output cap
const TRUNCATION_TAG: &str = "\n\n[truncated]";

/// Identifies the call site for the structured log record.
#[derive(Debug, Clone, Copy)]
pub struct CallMeta<'a> {
    pub role: &'a str,
    pub round: u32,
}

/// Serialized, retrying, length-aware adapter over an [`LlmProvider`].
pub struct LlmGateway {
    provider: Arc<dyn LlmProvider>,
    gate: Mutex<()>,
    retry_attempts: u32,
    retry_delay: Duration,
    max_output_length: usize,
}

impl LlmGateway {
    pub fn new(provider: Arc<dyn LlmProvider>, settings: &LlmSettings) -> Self {
        Self {
            provider,
            gate: Mutex::new(()),
            retry_attempts: settings.retry_attempts.max(1),
            retry_delay: settings.retry_delay,
            max_output_length: settings.max_output_length,
        }
    }

    /// Send one prompt to the remote model.
    ///
    /// Retries classified-retryable errors with exponential backoff
    /// (`retry_delay * 2^attempt`); a rate-limit advisory delay from the
    /// remote takes precedence over the computed backoff when present.
    /// Responses over the output cap are truncated at a char boundary and
    /// tagged `[truncated]`.
    pub async fn call(&self, prompt: &str, meta: CallMeta<'_>) -> LlmResult<String> {
        let _guard = self.gate.lock().await;

        let prompt_len = char_len(prompt);
        let started = Instant::now();
        let mut last_error: Option<LlmError> = None;

        for attempt in 0..self.retry_attempts {
            match self.provider.complete(prompt).await {
                Ok(response) => {
                    let response = self.cap_output(response);
                    info!(
                        provider = self.provider.name(),
                        model = self.provider.model(),
                        role = meta.role,
                        round = meta.round,
                        prompt_chars = prompt_len,
                        response_chars = char_len(&response),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        retries = attempt,
                        "LLM 调用成功"
                    );
                    return Ok(response);
                }
                Err(err) => {
                    let retryable = err.is_retryable();
                    warn!(
                        provider = self.provider.name(),
                        role = meta.role,
                        round = meta.round,
                        attempt = attempt + 1,
                        max_attempts = self.retry_attempts,
                        error_class = err.kind(),
                        retryable,
                        error = %mask_secrets(&err.to_string()),
                        "LLM 调用失败"
                    );

                    if !retryable || attempt + 1 == self.retry_attempts {
                        self.log_exhausted(&err, meta, prompt_len, started, attempt);
                        return Err(err);
                    }

                    let delay = match err.advisory_delay_secs() {
                        Some(secs) => Duration::from_secs(secs),
                        None => self.retry_delay * 2u32.pow(attempt),
                    };
                    last_error = Some(err);
                    tokio::time::sleep(delay).await;
                }
            }
        }

        // Loop always returns from inside; keep the compiler and the unlikely
        // retry_attempts=0 path honest.
        Err(last_error.unwrap_or(LlmError::Other {
            message: "LLM 调用失败".to_string(),
        }))
    }

    fn cap_output(&self, response: String) -> String {
        if char_len(&response) <= self.max_output_length {
            return response;
        }
        warn!(
            limit = self.max_output_length,
            actual = char_len(&response),
            "模型输出超过长度限制，已截断"
        );
        let mut capped = truncate_chars(&response, self.max_output_length);
        capped.push_str(TRUNCATION_TAG);
        capped
    }

    fn log_exhausted(
        &self,
        err: &LlmError,
        meta: CallMeta<'_>,
        prompt_len: usize,
        started: Instant,
        retries: u32,
    ) {
        info!(
            provider = self.provider.name(),
            role = meta.role,
            round = meta.round,
            prompt_chars = prompt_len,
            response_chars = 0usize,
            elapsed_ms = started.elapsed().as_millis() as u64,
            retries,
            error_class = err.kind(),
            "LLM 调用终止"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Provider that fails a fixed number of times before succeeding.
    struct FlakyProvider {
        failures: u32,
        error: LlmError,
        calls: AtomicU32,
        response: String,
    }

    impl FlakyProvider {
        fn new(failures: u32, error: LlmError) -> Self {
            Self {
                failures,
                error,
                calls: AtomicU32::new(0),
                response: "评审意见：权利要求书结构完整。".to_string(),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for FlakyProvider {
        fn name(&self) -> &'static str {
            "mock"
        }

        fn model(&self) -> &str {
            "mock-model"
        }

        async fn complete(&self, _prompt: &str) -> LlmResult<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(self.error.clone())
            } else {
                Ok(self.response.clone())
            }
        }
    }

    fn fast_settings() -> crate::config::LlmSettings {
        let mut settings = Config::default().llm;
        settings.retry_attempts = 4;
        settings.retry_delay = Duration::from_millis(1);
        settings
    }

    fn meta() -> CallMeta<'static> {
        CallMeta {
            role: "writer",
            round: 1,
        }
    }

    #[tokio::test]
    async fn test_retries_rate_limit_until_success() {
        let provider = Arc::new(FlakyProvider::new(
            3,
            LlmError::RateLimited {
                message: "too many requests".to_string(),
                retry_after: None,
            },
        ));
        let gateway = LlmGateway::new(provider.clone(), &fast_settings());

        let response = gateway.call("prompt", meta()).await.unwrap();
        assert_eq!(response, "评审意见：权利要求书结构完整。");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_auth_error_is_not_retried() {
        let provider = Arc::new(FlakyProvider::new(
            10,
            LlmError::AuthenticationFailed {
                message: "invalid key".to_string(),
            },
        ));
        let gateway = LlmGateway::new(provider.clone(), &fast_settings());

        let err = gateway.call("prompt", meta()).await.unwrap_err();
        assert!(matches!(err, LlmError::AuthenticationFailed { .. }));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_return_last_error() {
        let provider = Arc::new(FlakyProvider::new(
            10,
            LlmError::NetworkError {
                message: "connection reset".to_string(),
            },
        ));
        let gateway = LlmGateway::new(provider.clone(), &fast_settings());

        let err = gateway.call("prompt", meta()).await.unwrap_err();
        assert!(matches!(err, LlmError::NetworkError { .. }));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_output_cap_truncates_and_tags() {
        struct Verbose;

        #[async_trait]
        impl LlmProvider for Verbose {
            fn name(&self) -> &'static str {
                "mock"
            }
            fn model(&self) -> &str {
                "mock-model"
            }
            async fn complete(&self, _prompt: &str) -> LlmResult<String> {
                Ok("专".repeat(100))
            }
        }

        let mut settings = fast_settings();
        settings.max_output_length = 10;
        let gateway = LlmGateway::new(Arc::new(Verbose), &settings);

        let response = gateway.call("prompt", meta()).await.unwrap();
        assert!(response.starts_with(&"专".repeat(10)));
        assert!(response.ends_with("[truncated]"));
        assert_eq!(response.matches('专').count(), 10);
    }

    #[tokio::test]
    async fn test_calls_are_serialized() {
        use std::sync::atomic::AtomicBool;

        struct SlowProvider {
            in_flight: AtomicBool,
            overlapped: AtomicBool,
        }

        #[async_trait]
        impl LlmProvider for SlowProvider {
            fn name(&self) -> &'static str {
                "mock"
            }
            fn model(&self) -> &str {
                "mock-model"
            }
            async fn complete(&self, _prompt: &str) -> LlmResult<String> {
                if self.in_flight.swap(true, Ordering::SeqCst) {
                    self.overlapped.store(true, Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
                self.in_flight.store(false, Ordering::SeqCst);
                Ok("ok".to_string())
            }
        }

        let provider = Arc::new(SlowProvider {
            in_flight: AtomicBool::new(false),
            overlapped: AtomicBool::new(false),
        });
        let gateway = Arc::new(LlmGateway::new(provider.clone(), &fast_settings()));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let gw = gateway.clone();
            handles.push(tokio::spawn(async move {
                gw.call("prompt", CallMeta { role: "writer", round: 1 })
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(
            !provider.overlapped.load(Ordering::SeqCst),
            "gateway must never run two remote calls concurrently"
        );
    }
}
