//! Prompt Engine
//!
//! Resolves, for each role and round, the prompt to send: user-custom (if
//! set) with dynamic marker expansion, else a template-backed default. The
//! fallback chain — user-custom, file template, compiled-in default — is an
//! explicit priority list evaluated once per assembly.
//!
//! After assembly the result is checked against the input budget and
//! compressed by truncating context variables in a fixed order until it fits.

use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::{debug, warn};

use super::store::PromptStore;
use super::user::UserPromptStore;
use crate::models::prompt::{PromptRole, PromptTemplate};
use crate::services::templates::TemplateRegistry;
use crate::utils::error::{AppError, AppResult};
use crate::utils::text::{char_len, truncate_chars};

/// The literal dynamic marker users place in custom prompts
pub const DYNAMIC_MARKER: &str = "</text>";

const DYNAMIC_BLOCK_HEADER: &str = "====== 动态上下文 ======";
const DYNAMIC_BLOCK_FOOTER: &str = "====== 动态上下文结束 ======";

/// Role of one prompt assembly. The modifier is a writer-family prompt whose
/// template injects the previous draft and review.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineRole {
    Writer,
    Modifier,
    Reviewer,
}

impl EngineRole {
    /// User-custom prompts and templates are keyed by family.
    pub fn family(&self) -> PromptRole {
        match self {
            EngineRole::Writer | EngineRole::Modifier => PromptRole::Writer,
            EngineRole::Reviewer => PromptRole::Reviewer,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineRole::Writer => "writer",
            EngineRole::Modifier => "modifier",
            EngineRole::Reviewer => "reviewer",
        }
    }
}

/// Variable table for one assembly; the only recognized names.
#[derive(Debug, Clone, Default)]
pub struct PromptVars {
    pub context: String,
    pub previous_draft: Option<String>,
    pub previous_review: Option<String>,
    pub current_draft: Option<String>,
    pub iteration: u32,
    pub total_iterations: u32,
    pub template_id: Option<String>,
}

impl PromptVars {
    fn lookup(&self, name: &str) -> Option<String> {
        let value = match name {
            "context" => Some(self.context.clone()),
            "previous_draft" => self.previous_draft.clone(),
            "previous_review" => self.previous_review.clone(),
            "current_draft" => self.current_draft.clone(),
            "iteration" => Some(self.iteration.to_string()),
            "total_iterations" => Some(self.total_iterations.to_string()),
            "template_id" => self.template_id.clone(),
            _ => None,
        };
        value.filter(|v| !v.trim().is_empty())
    }

    /// The draft a dynamic marker expands to for the given role.
    fn relevant_draft(&self, role: EngineRole) -> String {
        match role {
            EngineRole::Writer => String::new(),
            EngineRole::Modifier => self.previous_draft.clone().unwrap_or_default(),
            EngineRole::Reviewer => self.current_draft.clone().unwrap_or_default(),
        }
    }
}

/// Which assembly path was selected for a build
enum AssemblyPlan {
    CustomWithMarker(String),
    CustomAppend(String),
    Template(Box<PromptTemplate>),
}

/// Prompt assembly and substitution engine
pub struct PromptEngine {
    user_prompts: Arc<UserPromptStore>,
    store: Arc<PromptStore>,
    registry: Arc<TemplateRegistry>,
    max_input_length: usize,
}

impl PromptEngine {
    pub fn new(
        user_prompts: Arc<UserPromptStore>,
        store: Arc<PromptStore>,
        registry: Arc<TemplateRegistry>,
        max_input_length: usize,
    ) -> Self {
        Self {
            user_prompts,
            store,
            registry,
            max_input_length,
        }
    }

    /// Assemble the prompt for one role and round, enforcing the input budget.
    pub fn build(&self, role: EngineRole, vars: &PromptVars) -> AppResult<String> {
        let plan = match self.user_prompts.get(role.family()) {
            Some(custom) if custom.contains(DYNAMIC_MARKER) => {
                debug!(role = role.as_str(), "使用用户自定义提示词（动态标记替换）");
                AssemblyPlan::CustomWithMarker(custom)
            }
            Some(custom) => {
                debug!(role = role.as_str(), "使用用户自定义提示词（附加动态上下文）");
                AssemblyPlan::CustomAppend(custom)
            }
            None => AssemblyPlan::Template(Box::new(self.store.get(role.family()))),
        };

        self.enforce_budget(&plan, role, vars)
    }

    /// Re-assemble with progressively truncated variables until the prompt
    /// fits: context to 60%, then previous_draft, then previous_review.
    fn enforce_budget(
        &self,
        plan: &AssemblyPlan,
        role: EngineRole,
        vars: &PromptVars,
    ) -> AppResult<String> {
        let mut vars = vars.clone();
        let mut assembled = self.assemble(plan, role, &vars);

        for step in 0..3 {
            if char_len(&assembled) <= self.max_input_length {
                return Ok(assembled);
            }
            match step {
                0 => vars.context = shrink(&vars.context),
                1 => vars.previous_draft = vars.previous_draft.as_deref().map(shrink),
                _ => vars.previous_review = vars.previous_review.as_deref().map(shrink),
            }
            warn!(
                role = role.as_str(),
                step,
                chars = char_len(&assembled),
                limit = self.max_input_length,
                "提示词超出长度限制，压缩后重新组装"
            );
            assembled = self.assemble(plan, role, &vars);
        }

        if char_len(&assembled) <= self.max_input_length {
            Ok(assembled)
        } else {
            Err(AppError::PromptTooLarge(format!(
                "压缩后提示词仍超过限制 ({} > {})",
                char_len(&assembled),
                self.max_input_length
            )))
        }
    }

    fn assemble(&self, plan: &AssemblyPlan, role: EngineRole, vars: &PromptVars) -> String {
        match plan {
            AssemblyPlan::CustomWithMarker(custom) => {
                let expanded = custom.replace(DYNAMIC_MARKER, &vars.relevant_draft(role));
                substitute_variables(&expanded, vars)
            }
            AssemblyPlan::CustomAppend(custom) => {
                let draft = vars.relevant_draft(role);
                let combined = if draft.is_empty() {
                    custom.clone()
                } else {
                    format!(
                        "{}\n\n{}\n{}\n{}",
                        custom, DYNAMIC_BLOCK_HEADER, draft, DYNAMIC_BLOCK_FOOTER
                    )
                };
                substitute_variables(&combined, vars)
            }
            AssemblyPlan::Template(template) => self.render_template(template, vars),
        }
    }

    fn render_template(&self, template: &PromptTemplate, vars: &PromptVars) -> String {
        let mut parts: Vec<String> = Vec::new();

        parts.push(template.prompt.role.clone());
        parts.push(template.prompt.objective.clone());

        if !template.prompt.requirements.is_empty() {
            parts.push(String::new());
            parts.push("整体要求：".to_string());
            for (i, req) in template.prompt.requirements.iter().enumerate() {
                parts.push(format!("{}. {}", i + 1, req));
            }
        }

        parts.push(String::new());
        parts.push(format!(
            "这是第 {}/{} 轮。",
            vars.iteration, vars.total_iterations
        ));
        if let Some(phases) = &template.iteration_phases {
            if vars.iteration <= 1 {
                parts.push(phases.first_iteration.instruction.clone());
            } else {
                parts.push(phases.subsequent_iteration.instruction.clone());
            }
        }
        parts.push(String::new());

        for section in &template.context_sections {
            if let Some(condition) = &section.condition {
                if vars.lookup(condition).is_none() {
                    continue;
                }
            }
            let value = substitute_variables(&section.placeholder, vars);
            if value.trim().is_empty() || value == section.placeholder {
                continue;
            }
            parts.push(section.title.clone());
            parts.push(value);
            parts.push(String::new());
        }

        if let Some(template_id) = &vars.template_id {
            let info = self.template_info(template_id);
            if !info.is_empty() {
                parts.push(info);
                parts.push(String::new());
            }
        }

        if let Some(final_instruction) = &template.prompt.final_instruction {
            parts.push(final_instruction.clone());
        }

        parts.join("\n")
    }

    /// The only dynamic content generator: resolve a template id to its title
    /// line. Output failing the natural-language filter is replaced with an
    /// empty string.
    fn template_info(&self, template_id: &str) -> String {
        let text = match self.registry.get(template_id) {
            Some(descriptor) => format!("使用模板: {}", descriptor.name),
            None => format!("使用模板ID: {}", template_id),
        };
        reject_code_fragments(&text)
    }
}

fn shrink(value: &str) -> String {
    let keep = char_len(value) * 60 / 100;
    truncate_chars(value, keep)
}

fn variable_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{(\w+)\}\}").expect("variable pattern is valid"))
}

/// Replace every `{{name}}` whose name is in the variable table; unknown
/// names are left untouched.
fn substitute_variables(text: &str, vars: &PromptVars) -> String {
    variable_pattern()
        .replace_all(text, |caps: &regex::Captures| {
            vars.lookup(&caps[1]).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn code_fragment_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"```|\b(def|function|fn|class|import|return|const|var)\s")
            .expect("code fragment pattern is valid")
    })
}

/// Generated text must be natural language; anything that looks like leaked
/// code is dropped entirely.
fn reject_code_fragments(text: &str) -> String {
    if code_fragment_pattern().is_match(text) {
        warn!("生成内容疑似包含代码片段，已丢弃");
        String::new()
    } else {
        text.to_string()
    }
}
