//! Request Validator
//!
//! Input sanitation and bounds for generation requests. Errors carry
//! human-readable messages that are safe to return to clients.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::config::SecuritySettings;
use crate::models::job::{InputMode, JobInput};
use crate::utils::error::{AppError, AppResult};

/// Raw generation request as received on the wire. Accepts both camelCase
/// and snake_case field names.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateRequest {
    pub mode: Option<String>,
    #[serde(alias = "project_path")]
    #[serde(rename = "projectPath")]
    pub project_path: Option<String>,
    #[serde(alias = "idea_text")]
    #[serde(rename = "ideaText")]
    pub idea_text: Option<String>,
    pub iterations: Option<u32>,
    #[serde(alias = "output_name")]
    #[serde(rename = "outputName")]
    pub output_name: Option<String>,
    #[serde(alias = "template_id")]
    #[serde(rename = "templateId")]
    pub template_id: Option<String>,
}

/// Windows reserved device names, rejected as output file names
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

const DANGEROUS_NAME_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*', '/', '\\'];

/// Validate a raw request into a well-formed [`JobInput`].
pub fn validate_request(raw: &GenerateRequest, limits: &SecuritySettings) -> AppResult<JobInput> {
    let mode = match raw.mode.as_deref() {
        Some("code") => InputMode::Code,
        Some("idea") => InputMode::Idea,
        _ => return Err(AppError::validation("模式必须是 'code' 或 'idea'")),
    };

    let (project_path, idea_text) = match mode {
        InputMode::Code => {
            let path = raw.project_path.as_deref().unwrap_or(".");
            (Some(validate_project_path(path)?), None)
        }
        InputMode::Idea => {
            let text = raw
                .idea_text
                .as_deref()
                .ok_or_else(|| AppError::validation("创意模式下必须提供创意文本"))?;
            (None, Some(validate_idea_text(text, limits)?))
        }
    };

    Ok(JobInput {
        mode,
        project_path,
        idea_text,
        iterations: validate_iterations(raw.iterations, limits)?,
        output_name: validate_output_name(raw.output_name.as_deref(), limits)?,
        template_id: validate_template_id(raw.template_id.as_deref())?,
    })
}

/// Iteration count bounds: 1..=max, defaulting to 1 when absent.
pub fn validate_iterations(value: Option<u32>, limits: &SecuritySettings) -> AppResult<u32> {
    let iterations = value.unwrap_or(1);
    if iterations < 1 {
        return Err(AppError::validation("迭代次数至少为1"));
    }
    if iterations > limits.max_iterations {
        return Err(AppError::validation(format!(
            "迭代次数不能超过{}",
            limits.max_iterations
        )));
    }
    Ok(iterations)
}

/// Idea text: trimmed, 10..=max_idea_length chars, no script injection.
pub fn validate_idea_text(text: &str, limits: &SecuritySettings) -> AppResult<String> {
    let clean = text.trim();
    if clean.is_empty() {
        return Err(AppError::validation("创意文本不能为空"));
    }
    if clean.chars().count() < 10 {
        return Err(AppError::validation("创意文本太短，请提供更详细的描述"));
    }
    if clean.chars().count() > limits.max_idea_length {
        return Err(AppError::validation("创意文本长度超过限制"));
    }

    let lowered = clean.to_lowercase();
    if lowered.contains("<script") || lowered.contains("javascript:") {
        return Err(AppError::validation("创意文本包含不安全内容"));
    }

    Ok(clean.to_string())
}

/// Project path: non-empty, bounded length, an existing readable directory.
pub fn validate_project_path(path: &str) -> AppResult<String> {
    let clean = path.trim();
    if clean.is_empty() {
        return Err(AppError::validation("路径不能为空"));
    }
    if clean.len() > 260 {
        return Err(AppError::validation("路径长度超过限制"));
    }

    let target = PathBuf::from(clean);
    let resolved = target
        .canonicalize()
        .map_err(|_| AppError::validation("路径不存在"))?;
    if !resolved.is_dir() {
        return Err(AppError::validation("路径必须是目录"));
    }
    if is_system_path(&resolved) {
        return Err(AppError::validation("不允许访问系统关键目录"));
    }

    Ok(clean.to_string())
}

fn is_system_path(path: &Path) -> bool {
    const DANGEROUS_PREFIXES: &[&str] = &["/etc", "/bin", "/usr/bin", "/usr/sbin", "/var", "/proc"];
    let text = path.to_string_lossy();
    DANGEROUS_PREFIXES
        .iter()
        .any(|prefix| text == *prefix || text.starts_with(&format!("{}/", prefix)))
}

/// Output file name: optional; bounded, no path separators or reserved names.
pub fn validate_output_name(
    name: Option<&str>,
    limits: &SecuritySettings,
) -> AppResult<Option<String>> {
    let Some(name) = name else {
        return Ok(None);
    };
    let clean = name.trim();
    if clean.is_empty() {
        return Ok(None);
    }
    if clean.chars().count() > limits.max_output_name_length {
        return Err(AppError::validation("输出文件名长度超过限制"));
    }
    if let Some(c) = clean.chars().find(|c| DANGEROUS_NAME_CHARS.contains(c)) {
        return Err(AppError::validation(format!("文件名包含不安全字符: {}", c)));
    }
    if RESERVED_NAMES
        .iter()
        .any(|r| r.eq_ignore_ascii_case(clean))
    {
        return Err(AppError::validation("文件名不能使用系统保留名称"));
    }
    Ok(Some(clean.to_string()))
}

/// Template id: optional; file-system-safe charset only.
pub fn validate_template_id(id: Option<&str>) -> AppResult<Option<String>> {
    let Some(id) = id else {
        return Ok(None);
    };
    let clean = id.trim();
    if clean.is_empty() {
        return Ok(None);
    }
    if clean.len() > 64
        || !clean
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(AppError::validation("无效的模板ID"));
    }
    Ok(Some(clean.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn limits() -> SecuritySettings {
        Config::default().security
    }

    fn idea_request(text: &str, iterations: Option<u32>) -> GenerateRequest {
        GenerateRequest {
            mode: Some("idea".to_string()),
            idea_text: Some(text.to_string()),
            iterations,
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_idea_request() {
        let raw = idea_request("一种基于访问新近度并按键大小加权的缓存淘汰策略", Some(3));
        let input = validate_request(&raw, &limits()).unwrap();
        assert_eq!(input.mode, InputMode::Idea);
        assert_eq!(input.iterations, 3);
        assert!(input.project_path.is_none());
    }

    #[test]
    fn test_missing_idea_text_rejected() {
        let raw = GenerateRequest {
            mode: Some("idea".to_string()),
            ..Default::default()
        };
        assert!(validate_request(&raw, &limits()).is_err());
    }

    #[test]
    fn test_empty_idea_text_rejected() {
        let raw = idea_request("   ", None);
        assert!(validate_request(&raw, &limits()).is_err());
    }

    #[test]
    fn test_short_idea_text_rejected() {
        let raw = idea_request("太短", None);
        assert!(validate_request(&raw, &limits()).is_err());
    }

    #[test]
    fn test_script_injection_rejected() {
        let raw = idea_request("<script>alert(1)</script> 这是一段足够长的描述", None);
        assert!(validate_request(&raw, &limits()).is_err());
    }

    #[test]
    fn test_bad_mode_rejected() {
        let raw = GenerateRequest {
            mode: Some("hybrid".to_string()),
            ..Default::default()
        };
        assert!(validate_request(&raw, &limits()).is_err());
        let raw = GenerateRequest::default();
        assert!(validate_request(&raw, &limits()).is_err());
    }

    #[test]
    fn test_iteration_bounds() {
        assert_eq!(validate_iterations(None, &limits()).unwrap(), 1);
        assert_eq!(validate_iterations(Some(10), &limits()).unwrap(), 10);
        assert!(validate_iterations(Some(0), &limits()).is_err());
        assert!(validate_iterations(Some(11), &limits()).is_err());
    }

    #[test]
    fn test_output_name_rules() {
        let l = limits();
        assert_eq!(validate_output_name(None, &l).unwrap(), None);
        assert_eq!(validate_output_name(Some("  "), &l).unwrap(), None);
        assert_eq!(
            validate_output_name(Some("my-patent"), &l).unwrap(),
            Some("my-patent".to_string())
        );
        assert!(validate_output_name(Some("a/b"), &l).is_err());
        assert!(validate_output_name(Some("CON"), &l).is_err());
        assert!(validate_output_name(Some(&"x".repeat(101)), &l).is_err());
    }

    #[test]
    fn test_template_id_rules() {
        assert_eq!(
            validate_template_id(Some("default")).unwrap(),
            Some("default".to_string())
        );
        assert_eq!(validate_template_id(None).unwrap(), None);
        assert!(validate_template_id(Some("../escape")).is_err());
        assert!(validate_template_id(Some("带空格 的")).is_err());
    }

    #[test]
    fn test_code_mode_requires_existing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let raw = GenerateRequest {
            mode: Some("code".to_string()),
            project_path: Some(dir.path().to_string_lossy().to_string()),
            ..Default::default()
        };
        let input = validate_request(&raw, &limits()).unwrap();
        assert_eq!(input.mode, InputMode::Code);
        assert!(input.project_path.is_some());

        let raw = GenerateRequest {
            mode: Some("code".to_string()),
            project_path: Some("/definitely/not/here".to_string()),
            ..Default::default()
        };
        assert!(validate_request(&raw, &limits()).is_err());
    }

    #[test]
    fn test_camel_and_snake_case_accepted() {
        let camel: GenerateRequest = serde_json::from_str(
            r#"{"mode":"idea","ideaText":"一种足够长的创意描述文本","iterations":2}"#,
        )
        .unwrap();
        assert!(camel.idea_text.is_some());

        let snake: GenerateRequest = serde_json::from_str(
            r#"{"mode":"idea","idea_text":"一种足够长的创意描述文本","iterations":2}"#,
        )
        .unwrap();
        assert!(snake.idea_text.is_some());
    }
}
