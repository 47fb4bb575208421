//! Conversation Models
//!
//! Per-round dialogue records persisted by the conversation store.

use serde::{Deserialize, Serialize};

use crate::utils::error::{AppError, AppResult};

/// Role that produced one side of a round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundRole {
    /// First-round generation from scratch
    Writer,
    /// Round-N>1 revision that receives the prior draft and prior review
    Modifier,
    /// Always-on critique
    Reviewer,
}

impl RoundRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoundRole::Writer => "writer",
            RoundRole::Modifier => "modifier",
            RoundRole::Reviewer => "reviewer",
        }
    }

    pub fn parse(s: &str) -> AppResult<Self> {
        match s {
            "writer" => Ok(RoundRole::Writer),
            "modifier" => Ok(RoundRole::Modifier),
            "reviewer" => Ok(RoundRole::Reviewer),
            other => Err(AppError::validation(format!("无效的角色: {}", other))),
        }
    }
}

impl std::fmt::Display for RoundRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One persisted prompt/response pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    pub task_id: String,
    pub round_number: u32,
    pub role: RoundRole,
    pub prompt: String,
    pub response: String,
    pub timestamp: String,
}

/// All records of a single round, keyed by role
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoundView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub writer: Option<RoundRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modifier: Option<RoundRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewer: Option<RoundRecord>,
}

impl RoundView {
    pub fn is_empty(&self) -> bool {
        self.writer.is_none() && self.modifier.is_none() && self.reviewer.is_none()
    }
}

/// A run registered in the conversation store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredTask {
    pub id: String,
    pub title: String,
    pub mode: String,
    pub iterations: u32,
    pub created_at: String,
    pub updated_at: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip() {
        for role in [RoundRole::Writer, RoundRole::Modifier, RoundRole::Reviewer] {
            assert_eq!(RoundRole::parse(role.as_str()).unwrap(), role);
        }
        assert!(RoundRole::parse("editor").is_err());
    }

    #[test]
    fn test_round_view_skips_absent_roles() {
        let view = RoundView {
            reviewer: Some(RoundRecord {
                task_id: "t".to_string(),
                round_number: 1,
                role: RoundRole::Reviewer,
                prompt: "p".to_string(),
                response: "r".to_string(),
                timestamp: "2026-01-01T00:00:00Z".to_string(),
            }),
            ..Default::default()
        };
        let json = serde_json::to_string(&view).unwrap();
        assert!(json.contains("reviewer"));
        assert!(!json.contains("writer"));
        assert!(!json.contains("modifier"));
    }
}
