//! `SQLite` implementation of [`TaskStore`].
//!
//! Each write transaction checks a connection out of the pool and holds it
//! until commit or rollback, issuing `BEGIN IMMEDIATE` so the write lock is
//! taken up front rather than on the first statement.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use taskfeed_core::{NewTask, Task, TaskId, TaskPatch, UserId};
use tracing::{debug, warn};

use crate::errors::{Result, StoreError};
use crate::migrations::run_migrations;
use crate::pool::{self, ConnectionConfig, ConnectionPool, PooledConnection};
use crate::store::{TaskStore, TaskTransaction};

const TASK_COLUMNS: &str = "id, owner, title, description, completed, created_at, updated_at";

/// Task store backed by an `r2d2` pool of `SQLite` connections.
#[derive(Clone)]
pub struct SqliteTaskStore {
    pool: ConnectionPool,
}

impl SqliteTaskStore {
    /// Open (or create) a database file and bring its schema up to date.
    pub fn open(path: &str, config: &ConnectionConfig) -> Result<Self> {
        Self::from_pool(pool::new_file(path, config)?)
    }

    /// Fresh in-memory database, mainly for tests.
    pub fn in_memory() -> Result<Self> {
        Self::from_pool(pool::new_in_memory(&ConnectionConfig::default())?)
    }

    /// Wrap an existing pool, running pending migrations first.
    pub fn from_pool(pool: ConnectionPool) -> Result<Self> {
        let conn = pool.get()?;
        let applied = run_migrations(&conn)?;
        if applied > 0 {
            debug!(applied, "task schema migrated");
        }
        drop(conn);
        Ok(Self { pool })
    }

    /// Underlying pool.
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }
}

impl TaskStore for SqliteTaskStore {
    fn get(&self, owner: &UserId, id: TaskId) -> Result<Option<Task>> {
        let conn = self.pool.get()?;
        select_task(&conn, owner, id)
    }

    fn list(&self, owner: &UserId, skip: u32, limit: u32) -> Result<Vec<Task>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE owner = ?1 ORDER BY id LIMIT ?2 OFFSET ?3"
        ))?;
        let rows = stmt.query_map(params![owner.as_str(), limit, skip], RawTask::from_row)?;
        rows.map(|raw| raw?.into_task()).collect()
    }

    fn begin(&self) -> Result<Box<dyn TaskTransaction>> {
        let conn = self.pool.get()?;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Box::new(SqliteTransaction { conn: Some(conn) }))
    }
}

/// Write transaction holding a pooled connection.
pub struct SqliteTransaction {
    conn: Option<PooledConnection>,
}

impl SqliteTransaction {
    fn conn(&self) -> Result<&Connection> {
        self.conn.as_deref().ok_or(StoreError::Finished)
    }

    fn finish(&mut self, sql: &str) -> Result<()> {
        let conn = self.conn.take().ok_or(StoreError::Finished)?;
        if let Err(e) = conn.execute_batch(sql) {
            // A failed COMMIT can leave the transaction open on a connection
            // that is about to go back to the pool.
            if !conn.is_autocommit() {
                let _ = conn.execute_batch("ROLLBACK");
            }
            return Err(e.into());
        }
        Ok(())
    }
}

impl TaskTransaction for SqliteTransaction {
    fn insert(&mut self, owner: &UserId, task: &NewTask) -> Result<Task> {
        let conn = self.conn()?;
        let now = Utc::now();
        let stamp = to_sql_time(now);
        let _ = conn.execute(
            "INSERT INTO tasks (owner, title, description, completed, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                owner.as_str(),
                task.title,
                task.description,
                task.completed,
                stamp
            ],
        )?;
        let id = TaskId::new(conn.last_insert_rowid());
        select_task(conn, owner, id)?.ok_or_else(|| StoreError::Corrupt {
            table: "tasks",
            message: format!("inserted row {id} not readable"),
        })
    }

    fn update(&mut self, owner: &UserId, id: TaskId, patch: &TaskPatch) -> Result<Option<Task>> {
        let conn = self.conn()?;

        let mut sets: Vec<&str> = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        if let Some(title) = &patch.title {
            sets.push("title = ?");
            values.push(Box::new(title.clone()));
        }
        if let Some(description) = &patch.description {
            sets.push("description = ?");
            values.push(Box::new(description.clone()));
        }
        if let Some(completed) = patch.completed {
            sets.push("completed = ?");
            values.push(Box::new(completed));
        }
        sets.push("updated_at = ?");
        values.push(Box::new(to_sql_time(Utc::now())));
        values.push(Box::new(id.get()));
        values.push(Box::new(owner.as_str().to_owned()));

        let sql = format!(
            "UPDATE tasks SET {} WHERE id = ? AND owner = ?",
            sets.join(", ")
        );
        let refs: Vec<&dyn rusqlite::types::ToSql> = values.iter().map(AsRef::as_ref).collect();
        let changed = conn.execute(&sql, refs.as_slice())?;
        if changed == 0 {
            return Ok(None);
        }
        select_task(conn, owner, id)
    }

    fn delete(&mut self, owner: &UserId, id: TaskId) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "DELETE FROM tasks WHERE id = ?1 AND owner = ?2",
            params![id.get(), owner.as_str()],
        )?;
        Ok(changed > 0)
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        self.finish("COMMIT")
    }

    fn rollback(mut self: Box<Self>) -> Result<()> {
        self.finish("ROLLBACK")
    }
}

impl Drop for SqliteTransaction {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                warn!(error = %e, "rollback of abandoned transaction failed");
            }
        }
    }
}

fn select_task(conn: &Connection, owner: &UserId, id: TaskId) -> Result<Option<Task>> {
    conn.query_row(
        &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1 AND owner = ?2"),
        params![id.get(), owner.as_str()],
        RawTask::from_row,
    )
    .optional()?
    .map(RawTask::into_task)
    .transpose()
}

/// Row as stored, before timestamp decoding.
struct RawTask {
    id: i64,
    owner: String,
    title: String,
    description: Option<String>,
    completed: bool,
    created_at: String,
    updated_at: String,
}

impl RawTask {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            completed: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn into_task(self) -> Result<Task> {
        Ok(Task {
            id: TaskId::new(self.id),
            owner: UserId::from(self.owner),
            title: self.title,
            description: self.description,
            completed: self.completed,
            created_at: from_sql_time(&self.created_at)?,
            updated_at: from_sql_time(&self.updated_at)?,
        })
    }
}

fn to_sql_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn from_sql_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            table: "tasks",
            message: format!("bad timestamp {s:?}: {e}"),
        })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn alice() -> UserId {
        UserId::from("alice")
    }

    fn insert(store: &SqliteTaskStore, owner: &UserId, title: &str) -> Task {
        let mut tx = store.begin().unwrap();
        let task = tx.insert(owner, &NewTask::titled(title)).unwrap();
        tx.commit().unwrap();
        task
    }

    #[test]
    fn insert_assigns_id_and_timestamps() {
        let store = SqliteTaskStore::in_memory().unwrap();
        let task = insert(&store, &alice(), "Buy milk");
        assert_eq!(task.id.get(), 1);
        assert_eq!(task.title, "Buy milk");
        assert!(!task.completed);
        assert_eq!(task.created_at, task.updated_at);
        assert_eq!(store.get(&alice(), task.id).unwrap(), Some(task));
    }

    #[test]
    fn get_scoped_by_owner() {
        let store = SqliteTaskStore::in_memory().unwrap();
        let task = insert(&store, &alice(), "private");
        assert!(store.get(&UserId::from("bob"), task.id).unwrap().is_none());
    }

    #[test]
    fn rollback_discards_insert() {
        let store = SqliteTaskStore::in_memory().unwrap();
        let mut tx = store.begin().unwrap();
        let task = tx.insert(&alice(), &NewTask::titled("gone")).unwrap();
        tx.rollback().unwrap();
        assert!(store.get(&alice(), task.id).unwrap().is_none());
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let store = SqliteTaskStore::in_memory().unwrap();
        let id = {
            let mut tx = store.begin().unwrap();
            tx.insert(&alice(), &NewTask::titled("abandoned")).unwrap().id
        };
        assert!(store.get(&alice(), id).unwrap().is_none());
        // The connection went back to the pool usable.
        let _ = insert(&store, &alice(), "after");
    }

    #[test]
    fn update_applies_patch_and_refreshes_updated_at() {
        let store = SqliteTaskStore::in_memory().unwrap();
        let task = insert(&store, &alice(), "Buy milk");

        let mut tx = store.begin().unwrap();
        let updated = tx
            .update(&alice(), task.id, &TaskPatch::completed(true))
            .unwrap()
            .unwrap();
        tx.commit().unwrap();

        assert!(updated.completed);
        assert_eq!(updated.title, "Buy milk");
        assert_eq!(updated.created_at, task.created_at);
        assert!(updated.updated_at >= task.updated_at);
    }

    #[test]
    fn update_other_owner_is_none() {
        let store = SqliteTaskStore::in_memory().unwrap();
        let task = insert(&store, &alice(), "mine");
        let mut tx = store.begin().unwrap();
        let result = tx
            .update(&UserId::from("bob"), task.id, &TaskPatch::completed(true))
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn delete_reports_whether_removed() {
        let store = SqliteTaskStore::in_memory().unwrap();
        let task = insert(&store, &alice(), "temp");
        let mut tx = store.begin().unwrap();
        assert!(tx.delete(&alice(), task.id).unwrap());
        assert!(!tx.delete(&alice(), task.id).unwrap());
        tx.commit().unwrap();
        assert!(store.get(&alice(), task.id).unwrap().is_none());
    }

    #[test]
    fn list_pages_in_id_order() {
        let store = SqliteTaskStore::in_memory().unwrap();
        for i in 0..5 {
            let _ = insert(&store, &alice(), &format!("task {i}"));
        }
        let _ = insert(&store, &UserId::from("bob"), "not alice's");

        let page = store.list(&alice(), 1, 2).unwrap();
        let titles: Vec<_> = page.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, ["task 1", "task 2"]);
        assert_eq!(store.list(&alice(), 0, 100).unwrap().len(), 5);
        assert!(store.list(&alice(), 10, 10).unwrap().is_empty());
    }

    #[test]
    fn corrupt_timestamp_reported() {
        let store = SqliteTaskStore::in_memory().unwrap();
        let task = insert(&store, &alice(), "x");
        {
            let conn = store.pool().get().unwrap();
            let _ = conn
                .execute(
                    "UPDATE tasks SET created_at = 'yesterday' WHERE id = ?1",
                    params![task.id.get()],
                )
                .unwrap();
        }
        assert_matches!(
            store.get(&alice(), task.id),
            Err(StoreError::Corrupt { table: "tasks", .. })
        );
    }

    #[test]
    fn file_database_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.db");
        let path = path.to_str().unwrap();

        let id = {
            let store = SqliteTaskStore::open(path, &ConnectionConfig::default()).unwrap();
            insert(&store, &alice(), "durable").id
        };

        let reopened = SqliteTaskStore::open(path, &ConnectionConfig::default()).unwrap();
        let task = reopened.get(&alice(), id).unwrap().unwrap();
        assert_eq!(task.title, "durable");
    }

    #[test]
    fn concurrent_writers_serialize_on_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.db");
        let store = SqliteTaskStore::open(path.to_str().unwrap(), &ConnectionConfig::default())
            .unwrap();

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let _ = insert(&store, &alice(), &format!("t{i}"));
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.list(&alice(), 0, 100).unwrap().len(), 4);
    }
}
