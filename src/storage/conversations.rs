//! Conversation Store
//!
//! Durable per-round dialogue persistence on embedded SQLite, using rusqlite
//! with r2d2 connection pooling. Blocking database work is wrapped in
//! `spawn_blocking` when called from async contexts.
//!
//! SQLite's write lock serializes round writes across workers; reads are
//! consistent to the last committed write.

use std::path::Path;

use chrono::Utc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};

use crate::models::conversation::{RoundRecord, RoundRole, RoundView, StoredTask};
use crate::utils::error::{AppError, AppResult};

/// Type alias for the connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Schema version recorded in SQLite's `user_version` pragma
const SCHEMA_VERSION: i32 = 2;

/// SQLite-backed conversation persistence
#[derive(Clone)]
pub struct ConversationStore {
    pool: DbPool,
}

impl ConversationStore {
    /// Open (or create) the store at the given path and run migrations.
    pub fn open(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let manager = SqliteConnectionManager::file(path);
        Self::with_manager(manager)
    }

    /// In-memory store for tests.
    pub fn in_memory() -> AppResult<Self> {
        // A single shared connection keeps the in-memory database alive and
        // visible to every checkout.
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| AppError::database(format!("Failed to create connection pool: {}", e)))?;
        let store = Self { pool };
        store.migrate()?;
        Ok(store)
    }

    fn with_manager(manager: SqliteConnectionManager) -> AppResult<Self> {
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| AppError::database(format!("Failed to create connection pool: {}", e)))?;
        let store = Self { pool };
        store.migrate()?;
        Ok(store)
    }

    fn conn(&self) -> AppResult<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| AppError::database(format!("Failed to get connection: {}", e)))
    }

    /// Create tables and bring the schema up to [`SCHEMA_VERSION`].
    ///
    /// Safe to run on every open: tables use IF NOT EXISTS and column
    /// additions are guarded by a pragma lookup.
    fn migrate(&self) -> AppResult<()> {
        let conn = self.conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                title TEXT,
                mode TEXT NOT NULL DEFAULT 'idea',
                iterations INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS rounds (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id TEXT NOT NULL,
                round_number INTEGER NOT NULL,
                role TEXT NOT NULL,
                prompt TEXT NOT NULL,
                response TEXT NOT NULL,
                ts TEXT NOT NULL,
                FOREIGN KEY (task_id) REFERENCES tasks(id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_rounds_task_round_role
             ON rounds(task_id, round_number, role)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_rounds_task_id ON rounds(task_id)",
            [],
        )?;

        // v2 added run status and the output-name column to tasks.
        Self::add_column_if_missing(&conn, "tasks", "status", "TEXT NOT NULL DEFAULT 'running'")?;
        Self::add_column_if_missing(&conn, "tasks", "base_name", "TEXT")?;

        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(())
    }

    fn add_column_if_missing(
        conn: &Connection,
        table: &str,
        column: &str,
        definition: &str,
    ) -> AppResult<()> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
        let exists = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .filter_map(|r| r.ok())
            .any(|name| name == column);

        if !exists {
            conn.execute(
                &format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, definition),
                [],
            )?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Synchronous core, used directly by tests and wrapped by the async API
    // ------------------------------------------------------------------

    /// Register a run before its first round.
    pub fn create_task_sync(
        &self,
        task_id: &str,
        title: &str,
        mode: &str,
        iterations: u32,
        base_name: Option<&str>,
    ) -> AppResult<()> {
        let now = Utc::now().to_rfc3339();
        self.conn()?.execute(
            "INSERT INTO tasks (id, title, mode, iterations, created_at, updated_at, status, base_name)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5, 'running', ?6)",
            params![task_id, title, mode, iterations, now, base_name],
        )?;
        Ok(())
    }

    /// Flip a run's terminal status in the browser listing.
    pub fn update_task_status_sync(&self, task_id: &str, status: &str) -> AppResult<()> {
        self.conn()?.execute(
            "UPDATE tasks SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![task_id, status, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Append one immutable round record.
    pub fn log_round_sync(
        &self,
        task_id: &str,
        round_number: u32,
        role: RoundRole,
        prompt: &str,
        response: &str,
    ) -> AppResult<()> {
        let ts = Utc::now().to_rfc3339();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO rounds (task_id, round_number, role, prompt, response, ts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![task_id, round_number, role.as_str(), prompt, response, ts],
        )?;
        conn.execute(
            "UPDATE tasks SET updated_at = ?2 WHERE id = ?1",
            params![task_id, ts],
        )?;
        Ok(())
    }

    /// Distinct round indices for a run, ascending.
    pub fn rounds_for_sync(&self, task_id: &str) -> AppResult<Vec<u32>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT round_number FROM rounds
             WHERE task_id = ?1 ORDER BY round_number",
        )?;
        let rounds = stmt
            .query_map(params![task_id], |row| row.get::<_, u32>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rounds)
    }

    /// All records of one round, keyed by role.
    pub fn round_view_sync(&self, task_id: &str, round_number: u32) -> AppResult<RoundView> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT task_id, round_number, role, prompt, response, ts
             FROM rounds WHERE task_id = ?1 AND round_number = ?2",
        )?;
        let records = stmt
            .query_map(params![task_id, round_number], |row| {
                Ok((
                    row.get::<_, String>(2)?,
                    RoundRecord {
                        task_id: row.get(0)?,
                        round_number: row.get(1)?,
                        role: RoundRole::Writer, // fixed up below from the role column
                        prompt: row.get(3)?,
                        response: row.get(4)?,
                        timestamp: row.get(5)?,
                    },
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut view = RoundView::default();
        for (role_str, mut record) in records {
            let role = RoundRole::parse(&role_str)?;
            record.role = role;
            match role {
                RoundRole::Writer => view.writer = Some(record),
                RoundRole::Modifier => view.modifier = Some(record),
                RoundRole::Reviewer => view.reviewer = Some(record),
            }
        }
        Ok(view)
    }

    /// All registered runs, most recent first.
    pub fn list_tasks_sync(&self) -> AppResult<Vec<StoredTask>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, title, mode, iterations, created_at, updated_at, status, base_name
             FROM tasks ORDER BY created_at DESC",
        )?;
        let tasks = stmt
            .query_map([], Self::row_to_task)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    pub fn task_sync(&self, task_id: &str) -> AppResult<Option<StoredTask>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, title, mode, iterations, created_at, updated_at, status, base_name
             FROM tasks WHERE id = ?1",
            params![task_id],
            Self::row_to_task,
        )
        .optional()
        .map_err(AppError::from)
    }

    /// Remove a run and all its rounds.
    pub fn delete_task_sync(&self, task_id: &str) -> AppResult<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM rounds WHERE task_id = ?1", params![task_id])?;
        conn.execute("DELETE FROM tasks WHERE id = ?1", params![task_id])?;
        Ok(())
    }

    pub fn is_healthy(&self) -> bool {
        match self.pool.get() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => false,
        }
    }

    fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<StoredTask> {
        Ok(StoredTask {
            id: row.get(0)?,
            title: row.get(1)?,
            mode: row.get(2)?,
            iterations: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
            status: row.get(6)?,
            base_name: row.get(7)?,
        })
    }

    // ------------------------------------------------------------------
    // Async wrappers for callers on the runtime
    // ------------------------------------------------------------------

    pub async fn create_task(
        &self,
        task_id: String,
        title: String,
        mode: String,
        iterations: u32,
        base_name: Option<String>,
    ) -> AppResult<()> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            store.create_task_sync(&task_id, &title, &mode, iterations, base_name.as_deref())
        })
        .await
        .map_err(|e| AppError::database(format!("Task join error: {}", e)))?
    }

    pub async fn update_task_status(&self, task_id: String, status: String) -> AppResult<()> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.update_task_status_sync(&task_id, &status))
            .await
            .map_err(|e| AppError::database(format!("Task join error: {}", e)))?
    }

    pub async fn log_round(
        &self,
        task_id: String,
        round_number: u32,
        role: RoundRole,
        prompt: String,
        response: String,
    ) -> AppResult<()> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            store.log_round_sync(&task_id, round_number, role, &prompt, &response)
        })
        .await
        .map_err(|e| AppError::database(format!("Task join error: {}", e)))?
    }

    pub async fn rounds_for(&self, task_id: String) -> AppResult<Vec<u32>> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.rounds_for_sync(&task_id))
            .await
            .map_err(|e| AppError::database(format!("Task join error: {}", e)))?
    }

    pub async fn round_view(&self, task_id: String, round_number: u32) -> AppResult<RoundView> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.round_view_sync(&task_id, round_number))
            .await
            .map_err(|e| AppError::database(format!("Task join error: {}", e)))?
    }

    pub async fn list_tasks(&self) -> AppResult<Vec<StoredTask>> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.list_tasks_sync())
            .await
            .map_err(|e| AppError::database(format!("Task join error: {}", e)))?
    }

    pub async fn task(&self, task_id: String) -> AppResult<Option<StoredTask>> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.task_sync(&task_id))
            .await
            .map_err(|e| AppError::database(format!("Task join error: {}", e)))?
    }

    pub async fn delete_task(&self, task_id: String) -> AppResult<()> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.delete_task_sync(&task_id))
            .await
            .map_err(|e| AppError::database(format!("Task join error: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ConversationStore {
        ConversationStore::in_memory().unwrap()
    }

    #[test]
    fn test_create_and_fetch_task() {
        let store = store();
        store
            .create_task_sync("t1", "缓存淘汰策略", "idea", 3, Some("cache-patent"))
            .unwrap();

        let task = store.task_sync("t1").unwrap().unwrap();
        assert_eq!(task.title, "缓存淘汰策略");
        assert_eq!(task.mode, "idea");
        assert_eq!(task.iterations, 3);
        assert_eq!(task.status, "running");
        assert_eq!(task.base_name.as_deref(), Some("cache-patent"));

        assert!(store.task_sync("missing").unwrap().is_none());
    }

    #[test]
    fn test_round_logging_and_views() {
        let store = store();
        store.create_task_sync("t1", "t", "idea", 2, None).unwrap();

        store
            .log_round_sync("t1", 1, RoundRole::Writer, "wp1", "draft1")
            .unwrap();
        store
            .log_round_sync("t1", 1, RoundRole::Reviewer, "rp1", "review1")
            .unwrap();
        store
            .log_round_sync("t1", 2, RoundRole::Modifier, "wp2", "draft2")
            .unwrap();

        assert_eq!(store.rounds_for_sync("t1").unwrap(), vec![1, 2]);

        let round1 = store.round_view_sync("t1", 1).unwrap();
        assert_eq!(round1.writer.as_ref().unwrap().response, "draft1");
        assert_eq!(round1.reviewer.as_ref().unwrap().response, "review1");
        assert!(round1.modifier.is_none());

        let round2 = store.round_view_sync("t1", 2).unwrap();
        assert_eq!(round2.modifier.as_ref().unwrap().response, "draft2");
        assert!(round2.writer.is_none());
        assert!(round2.reviewer.is_none());
    }

    #[test]
    fn test_duplicate_round_role_rejected() {
        let store = store();
        store.create_task_sync("t1", "t", "idea", 1, None).unwrap();
        store
            .log_round_sync("t1", 1, RoundRole::Writer, "p", "r")
            .unwrap();

        let err = store.log_round_sync("t1", 1, RoundRole::Writer, "p2", "r2");
        assert!(err.is_err(), "composite unique index must reject duplicates");
    }

    #[test]
    fn test_status_update() {
        let store = store();
        store.create_task_sync("t1", "t", "code", 1, None).unwrap();
        store.update_task_status_sync("t1", "completed").unwrap();
        assert_eq!(store.task_sync("t1").unwrap().unwrap().status, "completed");
    }

    #[test]
    fn test_delete_task_removes_rounds() {
        let store = store();
        store.create_task_sync("t1", "t", "idea", 1, None).unwrap();
        store
            .log_round_sync("t1", 1, RoundRole::Writer, "p", "r")
            .unwrap();

        store.delete_task_sync("t1").unwrap();
        assert!(store.task_sync("t1").unwrap().is_none());
        assert!(store.rounds_for_sync("t1").unwrap().is_empty());
    }

    #[test]
    fn test_migration_is_idempotent() {
        let store = store();
        // Running the migration again must not fail or duplicate columns.
        store.migrate().unwrap();
        store.migrate().unwrap();
        store.create_task_sync("t1", "t", "idea", 1, None).unwrap();
        assert!(store.is_healthy());
    }

    #[test]
    fn test_list_tasks_orders_recent_first() {
        let store = store();
        store.create_task_sync("a", "第一个", "idea", 1, None).unwrap();
        store.create_task_sync("b", "第二个", "idea", 1, None).unwrap();
        let tasks = store.list_tasks_sync().unwrap();
        assert_eq!(tasks.len(), 2);
    }
}
