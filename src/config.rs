//! Configuration
//!
//! Environment-driven application configuration, loaded once at startup and
//! validated before the server binds. Sections mirror the subsystems they
//! configure.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::utils::error::{AppError, AppResult};

/// HTTP server settings
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Job manager settings
#[derive(Debug, Clone)]
pub struct TaskSettings {
    /// Worker slots consuming the job queue
    pub max_workers: usize,
    /// Queue bound; submissions past it are rejected with QueueFull
    pub max_pending_tasks: usize,
    /// Per-job wall-clock deadline from started_at
    pub task_timeout: Duration,
    /// Reaper tick interval
    pub cleanup_interval: Duration,
    /// How long terminal jobs are retained after finished_at
    pub retention: Duration,
}

/// Remote model settings
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub base_url: Option<String>,
    /// Per-call timeout
    pub timeout: Duration,
    /// Assembled prompt budget, in characters
    pub max_input_length: usize,
    /// Response cap, in characters; longer responses are truncated
    pub max_output_length: usize,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
}

/// Source summarizer settings
#[derive(Debug, Clone)]
pub struct AnalysisSettings {
    /// Accepted-file cap for one walk
    pub max_files: usize,
    /// Files larger than this are skipped entirely
    pub max_file_size: u64,
    /// Head lines read per file
    pub max_lines: usize,
    /// Per-file content cap in bytes
    pub max_content_length: usize,
    /// Aggregate content cap across the whole walk
    pub max_total_bytes: usize,
}

/// Request bounds
#[derive(Debug, Clone)]
pub struct SecuritySettings {
    pub max_idea_length: usize,
    pub max_output_name_length: usize,
    pub max_iterations: u32,
}

/// Filesystem layout
#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub output_dir: PathBuf,
    pub prompts_dir: PathBuf,
    pub templates_dir: PathBuf,
    pub conversations_db_path: PathBuf,
    pub user_prompts_path: PathBuf,
}

/// Top-level application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerSettings,
    pub tasks: TaskSettings,
    pub llm: LlmSettings,
    pub analysis: AnalysisSettings,
    pub security: SecuritySettings,
    pub storage: StorageSettings,
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> AppResult<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::config(format!("环境变量 {} 的值无效: {}", key, raw))),
        Err(_) => Ok(default),
    }
}

fn env_secs(key: &str, default_secs: u64) -> AppResult<Duration> {
    Ok(Duration::from_secs(env_parse(key, default_secs)?))
}

impl Config {
    /// Load configuration from the process environment, applying defaults.
    pub fn from_env() -> AppResult<Self> {
        let config = Self {
            server: ServerSettings {
                host: env_string("HOST", "0.0.0.0"),
                port: env_parse("PORT", 8081)?,
            },
            tasks: TaskSettings {
                max_workers: env_parse("MAX_WORKERS", 3)?,
                max_pending_tasks: env_parse("MAX_PENDING_TASKS", 100)?,
                task_timeout: env_secs("TASK_TIMEOUT", 1800)?,
                cleanup_interval: env_secs("CLEANUP_INTERVAL", 3600)?,
                retention: env_secs("TASK_RETENTION", 24 * 3600)?,
            },
            llm: LlmSettings {
                api_key: env_opt("ANTHROPIC_API_KEY"),
                model: env_string("ANTHROPIC_MODEL", "claude-3-5-sonnet-20241022"),
                max_tokens: env_parse("ANTHROPIC_MAX_TOKENS", 8192)?,
                base_url: env_opt("ANTHROPIC_BASE_URL"),
                timeout: env_secs("LLM_TIMEOUT", 300)?,
                max_input_length: env_parse("MAX_INPUT_LENGTH", 100_000)?,
                max_output_length: env_parse("MAX_OUTPUT_LENGTH", 2_000_000)?,
                retry_attempts: env_parse("RETRY_ATTEMPTS", 3)?,
                retry_delay: env_secs("RETRY_DELAY", 5)?,
            },
            analysis: AnalysisSettings {
                max_files: env_parse("MAX_FILES", 200)?,
                max_file_size: env_parse("MAX_FILE_SIZE", 1024 * 1024)?,
                max_lines: env_parse("MAX_LINES", 80)?,
                max_content_length: env_parse("MAX_CONTENT_LENGTH", 50 * 1024)?,
                max_total_bytes: env_parse("MAX_TOTAL_BYTES", 4 * 1024 * 1024)?,
            },
            security: SecuritySettings {
                max_idea_length: env_parse("MAX_IDEA_LENGTH", 50_000)?,
                max_output_name_length: env_parse("MAX_OUTPUT_NAME_LENGTH", 100)?,
                max_iterations: env_parse("MAX_ITERATIONS", 10)?,
            },
            storage: StorageSettings {
                output_dir: PathBuf::from(env_string("OUTPUT_DIR", "output")),
                prompts_dir: PathBuf::from(env_string("PROMPTS_DIR", "prompts")),
                templates_dir: PathBuf::from(env_string("TEMPLATES_DIR", "templates")),
                conversations_db_path: PathBuf::from(env_string(
                    "CONVERSATIONS_DB_PATH",
                    "data/conversations.db",
                )),
                user_prompts_path: PathBuf::from(env_string(
                    "USER_PROMPTS_PATH",
                    "data/user_prompts.json",
                )),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints before the server starts.
    pub fn validate(&self) -> AppResult<()> {
        if self.server.port == 0 {
            return Err(AppError::config("无效的端口号: 0"));
        }
        if self.tasks.max_workers == 0 {
            return Err(AppError::config("MAX_WORKERS 必须大于 0"));
        }
        if self.tasks.task_timeout.is_zero() {
            return Err(AppError::config("TASK_TIMEOUT 必须大于 0"));
        }
        if self.llm.timeout.is_zero() {
            return Err(AppError::config("LLM_TIMEOUT 必须大于 0"));
        }
        if self.llm.max_input_length == 0 {
            return Err(AppError::config("MAX_INPUT_LENGTH 必须大于 0"));
        }
        if self.llm.max_tokens == 0 {
            return Err(AppError::config("ANTHROPIC_MAX_TOKENS 必须大于 0"));
        }
        if self.analysis.max_files == 0 {
            return Err(AppError::config("MAX_FILES 必须大于 0"));
        }
        if self.security.max_iterations == 0 {
            return Err(AppError::config("MAX_ITERATIONS 必须大于 0"));
        }
        if self.llm.api_key.is_none() {
            tracing::warn!("ANTHROPIC_API_KEY 未设置，LLM 调用将会失败");
        }
        Ok(())
    }

    /// Ensure all configured directories exist.
    pub fn ensure_directories(&self) -> AppResult<()> {
        std::fs::create_dir_all(&self.storage.output_dir)?;
        if let Some(parent) = self.storage.conversations_db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if let Some(parent) = self.storage.user_prompts_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "0.0.0.0".to_string(),
                port: 8081,
            },
            tasks: TaskSettings {
                max_workers: 3,
                max_pending_tasks: 100,
                task_timeout: Duration::from_secs(1800),
                cleanup_interval: Duration::from_secs(3600),
                retention: Duration::from_secs(24 * 3600),
            },
            llm: LlmSettings {
                api_key: None,
                model: "claude-3-5-sonnet-20241022".to_string(),
                max_tokens: 8192,
                base_url: None,
                timeout: Duration::from_secs(300),
                max_input_length: 100_000,
                max_output_length: 2_000_000,
                retry_attempts: 3,
                retry_delay: Duration::from_secs(5),
            },
            analysis: AnalysisSettings {
                max_files: 200,
                max_file_size: 1024 * 1024,
                max_lines: 80,
                max_content_length: 50 * 1024,
                max_total_bytes: 4 * 1024 * 1024,
            },
            security: SecuritySettings {
                max_idea_length: 50_000,
                max_output_name_length: 100,
                max_iterations: 10,
            },
            storage: StorageSettings {
                output_dir: PathBuf::from("output"),
                prompts_dir: PathBuf::from("prompts"),
                templates_dir: PathBuf::from("templates"),
                conversations_db_path: PathBuf::from("data/conversations.db"),
                user_prompts_path: PathBuf::from("data/user_prompts.json"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 8081);
        assert_eq!(config.tasks.max_workers, 3);
        assert_eq!(config.llm.retry_attempts, 3);
        assert_eq!(config.analysis.max_files, 200);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = Config::default();
        config.tasks.max_workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_port_rejected() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }
}
