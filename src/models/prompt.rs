//! Prompt Models
//!
//! Structures for the YAML role templates and the user-custom prompt record.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Prompt family a user-custom prompt applies to. The modifier phase reuses
/// the writer-family prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    Writer,
    Reviewer,
}

impl PromptRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptRole::Writer => "writer",
            PromptRole::Reviewer => "reviewer",
        }
    }
}

impl std::fmt::Display for PromptRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// On-disk YAML template for one role
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    #[serde(default)]
    pub metadata: Option<TemplateMetadata>,
    pub prompt: PromptBody,
    #[serde(default)]
    pub iteration_phases: Option<IterationPhases>,
    #[serde(default)]
    pub context_sections: Vec<ContextSection>,
}

impl PromptTemplate {
    /// Templates must carry a non-empty role line and objective to be usable.
    pub fn validate(&self) -> Result<(), String> {
        if self.prompt.role.trim().is_empty() {
            return Err("模板缺少角色设定 (prompt.role)".to_string());
        }
        if self.prompt.objective.trim().is_empty() {
            return Err("模板缺少目标说明 (prompt.objective)".to_string());
        }
        for section in &self.context_sections {
            if section.placeholder.trim().is_empty() {
                return Err(format!("上下文章节 {} 缺少占位符", section.title));
            }
        }
        Ok(())
    }
}

/// Optional descriptive metadata carried by a template file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateMetadata {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
}

/// The fixed preamble and closing instruction of a role prompt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptBody {
    /// Role line, e.g. "你现在扮演一名资深的中国发明专利撰写专家。"
    pub role: String,
    pub objective: String,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub final_instruction: Option<String>,
}

/// First-round vs. subsequent-round instruction lines
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationPhases {
    pub first_iteration: PhaseInstruction,
    pub subsequent_iteration: PhaseInstruction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseInstruction {
    pub instruction: String,
}

/// One conditional context section: included iff the `condition` variable is
/// present and non-empty, with `placeholder` expanded from the variable table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSection {
    pub title: String,
    /// A `{{name}}` expression naming the variable to insert
    pub placeholder: String,
    #[serde(default)]
    pub condition: Option<String>,
}

/// Persisted user-custom prompts, one slot per role family
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPromptRecord {
    pub prompts: UserPrompts,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserPrompts {
    #[serde(default)]
    pub writer: String,
    #[serde(default)]
    pub reviewer: String,
}

impl Default for UserPromptRecord {
    fn default() -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            prompts: UserPrompts::default(),
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

impl UserPromptRecord {
    pub fn get(&self, role: PromptRole) -> &str {
        match role {
            PromptRole::Writer => &self.prompts.writer,
            PromptRole::Reviewer => &self.prompts.reviewer,
        }
    }

    pub fn set(&mut self, role: PromptRole, content: String) {
        match role {
            PromptRole::Writer => self.prompts.writer = content,
            PromptRole::Reviewer => self.prompts.reviewer = content,
        }
        self.updated_at = Utc::now().to_rfc3339();
    }
}

/// Statistics about the user prompt record, surfaced by the prompts endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPromptStats {
    pub has_writer_prompt: bool,
    pub has_reviewer_prompt: bool,
    pub writer_prompt_length: usize,
    pub reviewer_prompt_length: usize,
    pub last_updated: String,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_validation() {
        let yaml = r#"
prompt:
  role: "你现在扮演一名资深的中国发明专利撰写专家。"
  objective: "撰写一份结构完整的发明专利草案。"
  requirements:
    - "使用 Markdown 编写完整专利文档"
context_sections:
  - title: "【技术背景与创新点上下文】"
    placeholder: "{{context}}"
    condition: "context"
"#;
        let template: PromptTemplate = serde_yaml::from_str(yaml).unwrap();
        assert!(template.validate().is_ok());
        assert_eq!(template.context_sections.len(), 1);
    }

    #[test]
    fn test_template_missing_role_fails_validation() {
        let yaml = r#"
prompt:
  role: "   "
  objective: "x"
"#;
        let template: PromptTemplate = serde_yaml::from_str(yaml).unwrap();
        assert!(template.validate().is_err());
    }

    #[test]
    fn test_user_prompt_record_set_updates_timestamp() {
        let mut record = UserPromptRecord::default();
        let before = record.updated_at.clone();
        record.set(PromptRole::Writer, "自定义撰写提示词".to_string());
        assert_eq!(record.get(PromptRole::Writer), "自定义撰写提示词");
        assert!(record.updated_at >= before);
    }
}
