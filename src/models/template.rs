//! Document Template Models
//!
//! Descriptors for the DOCX patent templates a run can be labeled with.
//! Content insertion into the binary document is delegated to the external
//! document renderer; the orchestrator only lists templates and resolves
//! their display names.

use serde::{Deserialize, Serialize};

/// Descriptor of one document template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateDescriptor {
    /// File-system safe identifier
    pub id: String,
    /// Display name
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub is_default: bool,
    pub is_valid: bool,
    pub placeholder_count: u32,
    pub section_count: u32,
}

impl TemplateDescriptor {
    /// The compiled-in descriptor served when no template files exist.
    pub fn builtin_default() -> Self {
        Self {
            id: "default".to_string(),
            name: "默认模板".to_string(),
            description: "系统默认专利模板".to_string(),
            is_default: true,
            is_valid: true,
            placeholder_count: 0,
            section_count: 0,
        }
    }
}

/// Aggregate counts returned with the template listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateStats {
    pub total_templates: usize,
    pub valid_templates: usize,
    pub invalid_templates: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_default() {
        let t = TemplateDescriptor::builtin_default();
        assert_eq!(t.id, "default");
        assert!(t.is_default);
        assert!(t.is_valid);
    }
}
