//! Job Models
//!
//! The asynchronous generation job: input, lifecycle states, progress,
//! and the result attached on completion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Input mode for a generation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    /// Context derived from a source-code tree summary
    Code,
    /// Context derived from free-form idea text
    Idea,
}

impl std::fmt::Display for InputMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputMode::Code => write!(f, "code"),
            InputMode::Idea => write!(f, "idea"),
        }
    }
}

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal states never mutate again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Validated input of a generation job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInput {
    pub mode: InputMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idea_text: Option<String>,
    pub iterations: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
}

/// Result payload attached to a completed job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResultData {
    pub output_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docx_path: Option<String>,
    pub iterations: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_review: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_used: Option<String>,
    pub task_id: String,
}

/// Internal job record owned by the job manager
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub input: JobInput,
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<JobResultData>,
    pub error: Option<String>,
}

impl Job {
    /// Create a freshly queued job.
    pub fn new(id: Uuid, input: JobInput) -> Self {
        Self {
            id,
            input,
            status: JobStatus::Queued,
            progress: 0,
            message: "任务等待中...".to_string(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
        }
    }

    /// Copy the observable fields into an API snapshot.
    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            task_id: self.id.to_string(),
            status: self.status,
            progress: self.progress,
            message: self.message.clone(),
            created_at: self.created_at.to_rfc3339(),
            started_at: self.started_at.map(|t| t.to_rfc3339()),
            completed_at: self.finished_at.map(|t| t.to_rfc3339()),
            result: if self.status == JobStatus::Completed {
                self.result.clone()
            } else {
                None
            },
            error: if self.status == JobStatus::Failed {
                self.error.clone()
            } else {
                None
            },
        }
    }
}

/// Consistent, atomic view of a job as returned by the polling endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub task_id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResultData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
