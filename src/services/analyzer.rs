//! Source Summarizer
//!
//! Builds a bounded Markdown digest of a project tree that becomes the
//! first-round context for code-mode runs.
//!
//! The walk is breadth-first with directory entries sorted lexicographically
//! before visiting, so two runs over an unchanged tree produce byte-identical
//! output.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::AnalysisSettings;
use crate::utils::error::{AppError, AppResult};

/// File extensions accepted as source code
const ALLOWED_EXTENSIONS: &[&str] = &[
    "js", "jsx", "ts", "tsx", "py", "java", "cs", "go", "rs", "cpp", "c", "rb", "php", "swift",
    "kt", "scala", "dart", "sh", "bash", "zsh", "ps1", "bat", "sql", "html", "css", "scss", "sass",
    "less", "vue", "svelte",
];

/// Directory names never descended into
const IGNORE_DIRS: &[&str] = &[
    "node_modules", ".git", "dist", "build", "out", ".next", ".turbo", "coverage", "__pycache__",
    ".venv", "venv", "env", ".env", ".idea", ".vscode", ".eclipse", "target", "bin", "obj",
    "Debug", "Release", "packages", "vendor", "cache", "temp", "tmp", ".tmp",
];

fn is_code_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| {
            let lowered = ext.to_ascii_lowercase();
            ALLOWED_EXTENSIONS.iter().any(|a| *a == lowered)
        })
        .unwrap_or(false)
}

fn is_ignored_dir(name: &str) -> bool {
    IGNORE_DIRS.iter().any(|d| *d == name)
}

/// Read at most `max_lines` head lines of a file, capped at
/// `max_content_length` bytes; lossy on invalid UTF-8.
fn read_head(path: &Path, settings: &AnalysisSettings) -> Option<String> {
    let bytes = std::fs::read(path).ok()?;
    let text = String::from_utf8_lossy(&bytes);

    let mut lines = Vec::new();
    let mut total = 0usize;
    for line in text.lines().take(settings.max_lines) {
        let line = line.trim_end_matches(['\n', '\r']);
        if total + line.len() > settings.max_content_length {
            let remaining = settings.max_content_length.saturating_sub(total);
            if remaining > 0 {
                let cut = line
                    .char_indices()
                    .take_while(|(i, _)| *i < remaining)
                    .last()
                    .map(|(i, c)| i + c.len_utf8())
                    .unwrap_or(0);
                lines.push(&line[..cut]);
            }
            break;
        }
        total += line.len() + 1;
        lines.push(line);
    }

    let content = lines.join("\n");
    if content.trim().is_empty() {
        None
    } else {
        Some(content)
    }
}

/// Collect accepted files breadth-first, entries sorted per directory.
fn collect_files(root: &Path, settings: &AnalysisSettings) -> Vec<PathBuf> {
    let mut accepted = Vec::new();
    let mut queue = VecDeque::new();
    queue.push_back(root.to_path_buf());

    while let Some(dir) = queue.pop_front() {
        if accepted.len() >= settings.max_files {
            break;
        }

        let mut entries: Vec<PathBuf> = match std::fs::read_dir(&dir) {
            Ok(rd) => rd.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "目录不可读，跳过");
                continue;
            }
        };
        entries.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        for entry in entries {
            let name = entry
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();

            if entry.is_dir() {
                if !is_ignored_dir(&name) {
                    queue.push_back(entry);
                }
            } else if entry.is_file() && is_code_file(&entry) {
                if accepted.len() >= settings.max_files {
                    info!(max_files = settings.max_files, "达到最大文件数限制，停止扫描");
                    return accepted;
                }
                let size = std::fs::metadata(&entry).map(|m| m.len()).unwrap_or(0);
                if size > settings.max_file_size {
                    debug!(file = %entry.display(), size, "文件过大，跳过");
                    continue;
                }
                accepted.push(entry);
            }
        }
    }

    accepted
}

/// Summarize a project tree into the code-innovation context document.
pub fn summarize_project(root: &Path, settings: &AnalysisSettings) -> AppResult<String> {
    let abs_root = root
        .canonicalize()
        .map_err(|_| AppError::validation(format!("路径不存在: {}", root.display())))?;
    if !abs_root.is_dir() {
        return Err(AppError::validation(format!(
            "路径不是目录: {}",
            root.display()
        )));
    }

    info!(root = %abs_root.display(), "开始分析代码目录");

    let files = collect_files(&abs_root, settings);
    if files.is_empty() {
        return Ok("# Codebase Overview\n\n未找到可分析的代码文件。\n".to_string());
    }

    let mut out = Vec::new();
    out.push("# Codebase Overview".to_string());
    out.push(format!("Root directory: {}", abs_root.display()));
    out.push(format!("Total sampled files: {}", files.len()));
    out.push(String::new());

    let mut processed = 0usize;
    let mut successful = 0usize;
    let mut total_content = 0usize;

    for file in &files {
        if total_content >= settings.max_total_bytes {
            info!(
                max_total_bytes = settings.max_total_bytes,
                "达到内容总量限制，停止分析"
            );
            break;
        }

        let rel = file
            .strip_prefix(&abs_root)
            .unwrap_or(file)
            .to_string_lossy()
            .replace('\\', "/");
        processed += 1;

        match read_head(file, settings) {
            Some(content) => {
                successful += 1;
                total_content += content.len();
                out.push("---".to_string());
                out.push(format!("FILE: {}", rel));
                out.push(String::new());
                out.push("SNIPPET:".to_string());
                out.push("```".to_string());
                out.push(content);
                out.push("```".to_string());
                out.push(String::new());
            }
            None => {
                out.push("---".to_string());
                out.push(format!("FILE: {}", rel));
                out.push(String::new());
                out.push("(无法读取文件或文件为空)".to_string());
                out.push(String::new());
            }
        }
    }

    out.push("---".to_string());
    out.push("## Analysis Summary".to_string());
    out.push(format!("- 处理文件数: {}", processed));
    out.push(format!("- 成功分析: {}", successful));
    out.push(format!("- 内容总量: {} 字符", total_content));
    out.push(String::new());
    out.push(
        "Instruction: Based on the overview above, extract the core technical ideas \
         and potential innovation points that would be valuable for a patent."
            .to_string(),
    );
    out.push(String::new());

    info!(
        successful,
        total = files.len(),
        total_content,
        "代码分析完成"
    );

    Ok(out.join("\n"))
}
