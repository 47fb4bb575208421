//! Prompt Store
//!
//! Loads role prompt templates from `<PROMPTS_DIR>/<role>/base_prompt.yaml`,
//! validates them, and serves them to the prompt engine. A template failing
//! to parse or validate is skipped with a warning; compiled-in defaults back
//! every role. Reload builds a fresh map and swaps it atomically.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use tracing::{info, warn};

use crate::models::prompt::{
    ContextSection, IterationPhases, PhaseInstruction, PromptBody, PromptRole, PromptTemplate,
};

/// Registry of role templates
pub struct PromptStore {
    dir: PathBuf,
    templates: RwLock<HashMap<PromptRole, PromptTemplate>>,
}

impl PromptStore {
    /// Create the store and load templates from disk.
    pub fn new(dir: PathBuf) -> Self {
        let store = Self {
            dir,
            templates: RwLock::new(HashMap::new()),
        };
        store.reload();
        store
    }

    /// Rebuild the template map from disk and swap it in.
    pub fn reload(&self) {
        let mut fresh = HashMap::new();
        for role in [PromptRole::Writer, PromptRole::Reviewer] {
            if let Some(template) = self.load_role(role) {
                fresh.insert(role, template);
            }
        }
        let count = fresh.len();
        *self.templates.write().expect("template registry lock") = fresh;
        info!(loaded = count, dir = %self.dir.display(), "提示词模板加载完成");
    }

    fn load_role(&self, role: PromptRole) -> Option<PromptTemplate> {
        let path = self.dir.join(role.as_str()).join("base_prompt.yaml");
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(_) => {
                warn!(path = %path.display(), "模板文件不存在，使用内置默认模板");
                return None;
            }
        };

        let template: PromptTemplate = match serde_yaml::from_str(&raw) {
            Ok(t) => t,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "模板解析失败，跳过");
                return None;
            }
        };

        if let Err(e) = template.validate() {
            warn!(path = %path.display(), error = %e, "模板校验失败，跳过");
            return None;
        }

        Some(template)
    }

    /// The template for a role: file-backed if valid, compiled-in otherwise.
    pub fn get(&self, role: PromptRole) -> PromptTemplate {
        self.templates
            .read()
            .expect("template registry lock")
            .get(&role)
            .cloned()
            .unwrap_or_else(|| compiled_default(role))
    }

    /// Whether the role is currently backed by a file template.
    pub fn has_file_template(&self, role: PromptRole) -> bool {
        self.templates
            .read()
            .expect("template registry lock")
            .contains_key(&role)
    }
}

/// Compiled-in writer template, the last link of the fallback chain.
fn default_writer() -> PromptTemplate {
    PromptTemplate {
        metadata: None,
        prompt: PromptBody {
            role: "你现在扮演一名资深的中国发明专利撰写专家。".to_string(),
            objective: "目标：基于给定的技术背景和创新点，撰写一份结构完整、符合中国专利法和实务规范的发明专利草案。"
                .to_string(),
            requirements: vec![
                "使用 Markdown 编写完整专利文档".to_string(),
                "章节建议包括但不限于：标题、技术领域、背景技术、发明内容、附图说明、具体实施方式、权利要求书、摘要".to_string(),
                "所有图示必须使用 mermaid 语法的代码块".to_string(),
                "语言应尽可能客观、严谨、避免营销化和口语化表述".to_string(),
                "权利要求书要有独立权利要求和若干从属权利要求，并尽量覆盖主要创新点".to_string(),
            ],
            final_instruction: Some(
                "请直接输出完整、可独立阅读的 Markdown 专利文档，不要额外附加解释说明。".to_string(),
            ),
        },
        iteration_phases: Some(IterationPhases {
            first_iteration: PhaseInstruction {
                instruction: "你需要基于下面的技术背景/创新点，给出首版完整专利草案：".to_string(),
            },
            subsequent_iteration: PhaseInstruction {
                instruction: "你需要在上一版草案基础上，结合评审意见对文档进行整体修订和增强。"
                    .to_string(),
            },
        }),
        context_sections: vec![
            ContextSection {
                title: "【技术背景与创新点上下文】".to_string(),
                placeholder: "{{context}}".to_string(),
                condition: Some("context".to_string()),
            },
            ContextSection {
                title: "【上一版专利草案】".to_string(),
                placeholder: "{{previous_draft}}".to_string(),
                condition: Some("previous_draft".to_string()),
            },
            ContextSection {
                title: "【合规评审与问题清单】".to_string(),
                placeholder: "{{previous_review}}".to_string(),
                condition: Some("previous_review".to_string()),
            },
        ],
    }
}

/// Compiled-in reviewer template.
fn default_reviewer() -> PromptTemplate {
    PromptTemplate {
        metadata: None,
        prompt: PromptBody {
            role: "你现在扮演一名资深专利代理人 / 合规审查专家。".to_string(),
            objective: "任务：对下面的专利草案进行严格审查，找出所有可能的合规风险、缺陷和可改进之处，并给出条理清晰的修改建议。"
                .to_string(),
            requirements: vec![
                "是否充分体现并保护核心创新点".to_string(),
                "权利要求书是否具备新颖性、创造性和实用性，是否存在过窄或过宽的问题".to_string(),
                "是否存在模糊、主观或不清楚的表述".to_string(),
                "是否有与背景技术、实施例不一致的地方".to_string(),
                "mermaid 图是否与文字描述一致，是否存在遗漏或不清晰的环节".to_string(),
                "是否有明显的专利法或实务上的违反之处".to_string(),
            ],
            final_instruction: Some(
                "请以 Markdown 输出评审结果，包含以下部分：概览评语、问题清单（分条列出，每条包括问题描述和修改建议）、总体风险评估。不要重写专利全文，只给出评审和修改建议。"
                    .to_string(),
            ),
        },
        iteration_phases: None,
        context_sections: vec![
            ContextSection {
                title: "【技术背景与创新点上下文】".to_string(),
                placeholder: "{{context}}".to_string(),
                condition: Some("context".to_string()),
            },
            ContextSection {
                title: "【当前专利草案】".to_string(),
                placeholder: "{{current_draft}}".to_string(),
                condition: Some("current_draft".to_string()),
            },
        ],
    }
}

/// The always-available compiled-in template for a role.
pub fn compiled_default(role: PromptRole) -> PromptTemplate {
    match role {
        PromptRole::Writer => default_writer(),
        PromptRole::Reviewer => default_reviewer(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WRITER_YAML: &str = r#"
metadata:
  name: "专利撰写提示词"
  version: "2.0"
  description: "写作角色模板"
prompt:
  role: "你是一名专利撰写专家。"
  objective: "撰写专利草案。"
  requirements:
    - "使用 Markdown"
  final_instruction: "直接输出文档。"
iteration_phases:
  first_iteration:
    instruction: "给出首版草案。"
  subsequent_iteration:
    instruction: "结合评审意见修订。"
context_sections:
  - title: "【上下文】"
    placeholder: "{{context}}"
    condition: "context"
"#;

    #[test]
    fn test_compiled_defaults_are_valid() {
        assert!(compiled_default(PromptRole::Writer).validate().is_ok());
        assert!(compiled_default(PromptRole::Reviewer).validate().is_ok());
    }

    #[test]
    fn test_missing_dir_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = PromptStore::new(dir.path().join("nope"));
        assert!(!store.has_file_template(PromptRole::Writer));
        let template = store.get(PromptRole::Writer);
        assert!(template.prompt.role.contains("专利撰写专家"));
    }

    #[test]
    fn test_file_template_loaded_and_preferred() {
        let dir = tempfile::tempdir().unwrap();
        let writer_dir = dir.path().join("writer");
        std::fs::create_dir_all(&writer_dir).unwrap();
        std::fs::write(writer_dir.join("base_prompt.yaml"), WRITER_YAML).unwrap();

        let store = PromptStore::new(dir.path().to_path_buf());
        assert!(store.has_file_template(PromptRole::Writer));
        assert!(!store.has_file_template(PromptRole::Reviewer));

        let template = store.get(PromptRole::Writer);
        assert_eq!(template.prompt.role, "你是一名专利撰写专家。");
        assert_eq!(template.metadata.unwrap().version, "2.0");
    }

    #[test]
    fn test_invalid_template_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let writer_dir = dir.path().join("writer");
        std::fs::create_dir_all(&writer_dir).unwrap();
        std::fs::write(
            writer_dir.join("base_prompt.yaml"),
            "prompt:\n  role: \"  \"\n  objective: \"x\"\n",
        )
        .unwrap();

        let store = PromptStore::new(dir.path().to_path_buf());
        assert!(!store.has_file_template(PromptRole::Writer));
        // Fallback still usable.
        assert!(store.get(PromptRole::Writer).validate().is_ok());
    }

    #[test]
    fn test_reload_picks_up_new_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = PromptStore::new(dir.path().to_path_buf());
        assert!(!store.has_file_template(PromptRole::Writer));

        let writer_dir = dir.path().join("writer");
        std::fs::create_dir_all(&writer_dir).unwrap();
        std::fs::write(writer_dir.join("base_prompt.yaml"), WRITER_YAML).unwrap();

        store.reload();
        assert!(store.has_file_template(PromptRole::Writer));
    }
}
