//! User Prompt Store
//!
//! Persists the user-custom writer/reviewer prompts as a single JSON file.
//! Writes go to a sibling temp file followed by an atomic rename, so a read
//! never observes a half-written record.

use std::path::PathBuf;
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::models::prompt::{PromptRole, UserPromptRecord, UserPromptStats};
use crate::utils::error::{AppError, AppResult};

/// Process-wide store for the user prompt record
pub struct UserPromptStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl UserPromptStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    /// Load the record, falling back to defaults on a missing or corrupt file.
    pub fn load(&self) -> UserPromptRecord {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => match serde_json::from_str::<UserPromptRecord>(&raw) {
                Ok(record) => record,
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "用户提示词数据解析失败，使用默认值");
                    UserPromptRecord::default()
                }
            },
            Err(_) => UserPromptRecord::default(),
        }
    }

    /// Non-empty, non-whitespace custom prompt for a role, if set.
    pub fn get(&self, role: PromptRole) -> Option<String> {
        let record = self.load();
        let prompt = record.get(role);
        if prompt.trim().is_empty() {
            None
        } else {
            Some(prompt.to_string())
        }
    }

    /// Set one role's custom prompt and persist atomically.
    pub fn set(&self, role: PromptRole, content: &str) -> AppResult<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| AppError::internal("user prompt store lock poisoned"))?;

        let mut record = self.load();
        record.set(role, content.trim().to_string());
        self.persist(&record)?;
        debug!(role = %role, chars = content.len(), "用户提示词已保存");
        Ok(())
    }

    /// Set both roles in one atomic write. `None` leaves a slot unchanged.
    pub fn set_all(&self, writer: Option<&str>, reviewer: Option<&str>) -> AppResult<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| AppError::internal("user prompt store lock poisoned"))?;

        let mut record = self.load();
        if let Some(writer) = writer {
            record.set(PromptRole::Writer, writer.trim().to_string());
        }
        if let Some(reviewer) = reviewer {
            record.set(PromptRole::Reviewer, reviewer.trim().to_string());
        }
        self.persist(&record)
    }

    fn persist(&self, record: &UserPromptRecord) -> AppResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        let json = serde_json::to_string_pretty(record)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Statistics surfaced by the prompts endpoint.
    pub fn stats(&self) -> UserPromptStats {
        let record = self.load();
        UserPromptStats {
            has_writer_prompt: !record.prompts.writer.trim().is_empty(),
            has_reviewer_prompt: !record.prompts.reviewer.trim().is_empty(),
            writer_prompt_length: record.prompts.writer.chars().count(),
            reviewer_prompt_length: record.prompts.reviewer.chars().count(),
            last_updated: record.updated_at.clone(),
            created_at: record.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, UserPromptStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = UserPromptStore::new(dir.path().join("data/user_prompts.json"));
        (dir, store)
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let (_dir, store) = store();
        assert!(store.get(PromptRole::Writer).is_none());
        assert!(store.get(PromptRole::Reviewer).is_none());
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let (_dir, store) = store();
        store.set(PromptRole::Writer, "请按以下要求撰写专利草案").unwrap();

        assert_eq!(
            store.get(PromptRole::Writer).as_deref(),
            Some("请按以下要求撰写专利草案")
        );
        assert!(store.get(PromptRole::Reviewer).is_none());

        let stats = store.stats();
        assert!(stats.has_writer_prompt);
        assert!(!stats.has_reviewer_prompt);
    }

    #[test]
    fn test_whitespace_prompt_reads_as_unset() {
        let (_dir, store) = store();
        store.set(PromptRole::Reviewer, "   \n  ").unwrap();
        assert!(store.get(PromptRole::Reviewer).is_none());
    }

    #[test]
    fn test_set_all_updates_both_slots() {
        let (_dir, store) = store();
        store.set_all(Some("撰写提示"), Some("评审提示")).unwrap();
        assert_eq!(store.get(PromptRole::Writer).as_deref(), Some("撰写提示"));
        assert_eq!(store.get(PromptRole::Reviewer).as_deref(), Some("评审提示"));

        store.set_all(None, Some("新的评审提示")).unwrap();
        assert_eq!(store.get(PromptRole::Writer).as_deref(), Some("撰写提示"));
        assert_eq!(
            store.get(PromptRole::Reviewer).as_deref(),
            Some("新的评审提示")
        );
    }

    #[test]
    fn test_corrupt_file_recovers_to_defaults() {
        let (dir, store) = store();
        std::fs::create_dir_all(dir.path().join("data")).unwrap();
        std::fs::write(dir.path().join("data/user_prompts.json"), "{not json").unwrap();
        assert!(store.get(PromptRole::Writer).is_none());

        // And the store can still write over it.
        store.set(PromptRole::Writer, "恢复后的提示词").unwrap();
        assert!(store.get(PromptRole::Writer).is_some());
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let (dir, store) = store();
        store.set(PromptRole::Writer, "提示词内容").unwrap();
        assert!(!dir.path().join("data/user_prompts.tmp").exists());
    }
}
