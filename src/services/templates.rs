//! Document Template Registry
//!
//! Lists the DOCX patent templates a run can be labeled with and resolves
//! template ids to display names for the prompt footer. Content insertion
//! into the binary document is delegated to the external document renderer,
//! so descriptors carry counts of zero unless a future analyzer fills them.

use std::path::PathBuf;
use std::sync::RwLock;

use tracing::info;

use crate::models::template::{TemplateDescriptor, TemplateStats};

/// Read-mostly registry of document templates, replaced wholesale on reload
pub struct TemplateRegistry {
    dir: PathBuf,
    templates: RwLock<Vec<TemplateDescriptor>>,
}

impl TemplateRegistry {
    /// Scan the templates directory; an empty or missing directory yields the
    /// built-in default descriptor.
    pub fn new(dir: PathBuf) -> Self {
        let registry = Self {
            dir,
            templates: RwLock::new(Vec::new()),
        };
        registry.reload();
        registry
    }

    /// Rebuild the descriptor list from disk and swap it in.
    pub fn reload(&self) {
        let mut found = self.scan();
        if found.is_empty() {
            found.push(TemplateDescriptor::builtin_default());
        } else if !found.iter().any(|t| t.is_default) {
            found[0].is_default = true;
        }
        let count = found.len();
        *self.templates.write().expect("template registry lock") = found;
        info!(templates = count, dir = %self.dir.display(), "文档模板扫描完成");
    }

    fn scan(&self) -> Vec<TemplateDescriptor> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };

        let mut found: Vec<TemplateDescriptor> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.eq_ignore_ascii_case("docx"))
                    .unwrap_or(false)
            })
            .filter_map(|path| {
                let stem = path.file_stem()?.to_str()?.to_string();
                let id: String = stem
                    .chars()
                    .map(|c| {
                        if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                            c
                        } else {
                            '_'
                        }
                    })
                    .collect();
                Some(TemplateDescriptor {
                    id: id.clone(),
                    name: stem,
                    description: String::new(),
                    is_default: id == "default",
                    is_valid: true,
                    placeholder_count: 0,
                    section_count: 0,
                })
            })
            .collect();

        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }

    pub fn list(&self) -> Vec<TemplateDescriptor> {
        self.templates
            .read()
            .expect("template registry lock")
            .clone()
    }

    pub fn get(&self, id: &str) -> Option<TemplateDescriptor> {
        self.templates
            .read()
            .expect("template registry lock")
            .iter()
            .find(|t| t.id == id)
            .cloned()
    }

    pub fn default_template_id(&self) -> String {
        let templates = self.templates.read().expect("template registry lock");
        templates
            .iter()
            .find(|t| t.is_default)
            .or_else(|| templates.first())
            .map(|t| t.id.clone())
            .unwrap_or_else(|| "default".to_string())
    }

    pub fn stats(&self) -> TemplateStats {
        let templates = self.templates.read().expect("template registry lock");
        let valid = templates.iter().filter(|t| t.is_valid).count();
        TemplateStats {
            total_templates: templates.len(),
            valid_templates: valid,
            invalid_templates: templates.len() - valid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_dir_serves_builtin_default() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TemplateRegistry::new(dir.path().to_path_buf());

        let templates = registry.list();
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].id, "default");
        assert!(templates[0].is_default);
        assert_eq!(registry.default_template_id(), "default");
    }

    #[test]
    fn test_scan_finds_docx_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("标准模板.docx"), b"pk").unwrap();
        std::fs::write(dir.path().join("simple.docx"), b"pk").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let registry = TemplateRegistry::new(dir.path().to_path_buf());
        let templates = registry.list();
        assert_eq!(templates.len(), 2);
        assert!(templates.iter().any(|t| t.name == "simple"));
        assert!(templates.iter().any(|t| t.name == "标准模板"));
        // Some descriptor must be the default even without a "default" id.
        assert!(templates.iter().any(|t| t.is_default));
    }

    #[test]
    fn test_lookup_by_id() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("default.docx"), b"pk").unwrap();

        let registry = TemplateRegistry::new(dir.path().to_path_buf());
        assert!(registry.get("default").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_reload_swaps_listing() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TemplateRegistry::new(dir.path().to_path_buf());
        assert_eq!(registry.list().len(), 1);

        std::fs::write(dir.path().join("a.docx"), b"pk").unwrap();
        std::fs::write(dir.path().join("b.docx"), b"pk").unwrap();
        registry.reload();
        assert_eq!(registry.list().len(), 2);
    }
}
