//! SQLite-backed task store.

use super::{NewTask, StoreError, Task, TaskFilter, TaskLog, TaskPatch, TaskStatus};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    description TEXT,
    status TEXT NOT NULL DEFAULT 'pending',
    priority INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
CREATE INDEX IF NOT EXISTS idx_tasks_priority_created ON tasks(priority DESC, created_at DESC);

CREATE TABLE IF NOT EXISTS task_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id INTEGER NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    FOREIGN KEY (task_id) REFERENCES tasks(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_task_logs_task ON task_logs(task_id, created_at DESC);
"#;

/// Startup connectivity retry bounds.
pub const CONNECT_ATTEMPTS: u32 = 5;
pub const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Cloneable handle to the task database.
///
/// Shares one connection behind an async mutex; request handlers and
/// background workers all go through the same handle.
#[derive(Clone)]
pub struct TaskStore {
    conn: Arc<Mutex<Connection>>,
}

impl TaskStore {
    /// Open the database at `path` and run the idempotent schema.
    ///
    /// `:memory:` is accepted (used by the test suites).
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let path = path.to_string();
        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&path)?;
            conn.execute_batch(SCHEMA)?;
            Ok::<_, rusqlite::Error>(conn)
        })
        .await??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open with a bounded startup retry (5 attempts, 3 seconds apart).
    ///
    /// Connectivity is only retried here; once connected, the store is
    /// assumed healthy until an operation fails outright.
    pub async fn connect(path: &str) -> Result<Self, StoreError> {
        let mut attempt = 1;
        loop {
            match Self::open(path).await {
                Ok(store) => {
                    tracing::info!("Database connection successful");
                    return Ok(store);
                }
                Err(e) if attempt < CONNECT_ATTEMPTS => {
                    tracing::warn!(
                        "Database connection failed (attempt {}/{}): {}. Retrying...",
                        attempt,
                        CONNECT_ATTEMPTS,
                        e
                    );
                    attempt += 1;
                    tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Dispose of the connection after the server has drained.
    ///
    /// The connection itself closes when the last clone of the handle drops;
    /// this just flushes the query planner stats and logs the shutdown.
    pub async fn close(&self) {
        let conn = self.conn.clone();
        let result = tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute_batch("PRAGMA optimize;")
        })
        .await;

        match result {
            Ok(Ok(())) => tracing::info!("Database connection disposed"),
            Ok(Err(e)) => tracing::warn!("Error disposing database connection: {}", e),
            Err(e) => tracing::warn!("Error disposing database connection: {}", e),
        }
    }

    /// Run `f` against the shared connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, rusqlite::Error> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            f(&mut conn)
        })
        .await??;
        Ok(result)
    }

    /// Insert a task and its creation audit entry in one transaction.
    pub async fn create_task(&self, new: NewTask) -> Result<Task, StoreError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let now = Utc::now();
            let status = new.status.unwrap_or(TaskStatus::Pending);

            tx.execute(
                "INSERT INTO tasks (title, description, status, priority, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![new.title, new.description, status.as_str(), new.priority, now, now],
            )?;
            let id = tx.last_insert_rowid();

            insert_log(&tx, id, &format!("Task created with status {status}"))?;

            let task = fetch_task(&tx, id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
            tx.commit()?;
            Ok(task)
        })
        .await
    }

    /// Fetch a task by id. Absence is a normal result, not an error.
    pub async fn get_task(&self, id: i64) -> Result<Option<Task>, StoreError> {
        self.with_conn(move |conn| fetch_task(conn, id)).await
    }

    /// List a page of tasks plus the total count of rows matching the
    /// filters before pagination.
    ///
    /// Ordered by priority (descending), ties broken by recency. The count
    /// query applies the same filters as the page query so `total` is
    /// consistent with the filtered result set.
    pub async fn list_tasks(
        &self,
        skip: u64,
        limit: u64,
        filter: TaskFilter,
    ) -> Result<(Vec<Task>, u64), StoreError> {
        self.with_conn(move |conn| {
            let mut clauses: Vec<&str> = Vec::new();
            let mut args: Vec<String> = Vec::new();

            if let Some(title) = &filter.title {
                // SQLite LIKE is case-insensitive for ASCII
                clauses.push("title LIKE '%' || ? || '%'");
                args.push(title.clone());
            }
            if let Some(status) = filter.status {
                clauses.push("status = ?");
                args.push(status.as_str().to_string());
            }

            let where_sql = if clauses.is_empty() {
                String::new()
            } else {
                format!(" WHERE {}", clauses.join(" AND "))
            };

            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM tasks{where_sql}"),
                rusqlite::params_from_iter(args.iter()),
                |row| row.get(0),
            )?;

            let mut stmt = conn.prepare(&format!(
                "SELECT id, title, description, status, priority, created_at, updated_at
                 FROM tasks{where_sql}
                 ORDER BY priority DESC, created_at DESC
                 LIMIT {limit} OFFSET {skip}"
            ))?;
            let tasks = stmt
                .query_map(rusqlite::params_from_iter(args.iter()), task_from_row)?
                .collect::<Result<Vec<_>, _>>()?;

            Ok((tasks, total.max(0) as u64))
        })
        .await
    }

    /// Apply a partial update.
    ///
    /// An empty patch returns the unmodified task with no audit entry. After
    /// a mutation, at most one entry is appended: a status-transition message
    /// when `status` was supplied and differs from the prior value, otherwise
    /// a generic details message. Concurrent updates to the same id resolve
    /// last-commit-wins.
    pub async fn update_task(
        &self,
        id: i64,
        patch: TaskPatch,
    ) -> Result<Option<Task>, StoreError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let Some(current) = fetch_task(&tx, id)? else {
                return Ok(None);
            };

            if patch.is_empty() {
                return Ok(Some(current));
            }

            let now = Utc::now();
            let title = patch.title.as_deref().unwrap_or(&current.title);
            let description = match &patch.description {
                Some(explicit) => explicit.as_deref(),
                None => current.description.as_deref(),
            };
            let status = patch.status.unwrap_or(current.status);
            let priority = patch.priority.unwrap_or(current.priority);

            tx.execute(
                "UPDATE tasks
                 SET title = ?1, description = ?2, status = ?3, priority = ?4, updated_at = ?5
                 WHERE id = ?6",
                params![title, description, status.as_str(), priority, now, id],
            )?;

            let message = match patch.status {
                Some(new_status) if new_status != current.status => {
                    format!("Status changed from {} to {}", current.status, new_status)
                }
                _ => "Task details updated.".to_string(),
            };
            insert_log(&tx, id, &message)?;

            let updated = fetch_task(&tx, id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
            tx.commit()?;
            Ok(Some(updated))
        })
        .await
    }

    /// Delete a task; its audit entries go with it via `ON DELETE CASCADE`.
    ///
    /// Returns whether a row was actually deleted.
    pub async fn delete_task(&self, id: i64) -> Result<bool, StoreError> {
        self.with_conn(move |conn| {
            let deleted = conn.execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
            Ok(deleted > 0)
        })
        .await
    }

    /// List a task's audit entries, newest first.
    pub async fn list_task_logs(
        &self,
        task_id: i64,
        skip: u64,
        limit: u64,
    ) -> Result<Vec<TaskLog>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT id, task_id, status, created_at FROM task_logs
                 WHERE task_id = ?1
                 ORDER BY created_at DESC
                 LIMIT {limit} OFFSET {skip}"
            ))?;
            let logs = stmt
                .query_map(params![task_id], log_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(logs)
        })
        .await
    }

    /// Append a single immutable audit entry.
    ///
    /// For events outside [`TaskStore::update_task`]'s automatic logging,
    /// such as process-start and background-error notifications.
    pub async fn create_task_log(
        &self,
        task_id: i64,
        message: &str,
    ) -> Result<TaskLog, StoreError> {
        let message = message.to_string();
        self.with_conn(move |conn| {
            let now = Utc::now();
            conn.execute(
                "INSERT INTO task_logs (task_id, status, created_at) VALUES (?1, ?2, ?3)",
                params![task_id, message, now],
            )?;
            Ok(TaskLog {
                id: conn.last_insert_rowid(),
                task_id,
                status: message,
                created_at: now,
            })
        })
        .await
    }
}

#[cfg(test)]
impl TaskStore {
    /// Test hook: run raw SQL against the shared connection, e.g. to install
    /// a trigger that makes a later operation fail.
    pub(crate) async fn run_batch_sql(&self, sql: &str) -> Result<(), StoreError> {
        let sql = sql.to_string();
        self.with_conn(move |conn| conn.execute_batch(&sql)).await
    }
}

fn fetch_task(conn: &Connection, id: i64) -> rusqlite::Result<Option<Task>> {
    conn.query_row(
        "SELECT id, title, description, status, priority, created_at, updated_at
         FROM tasks WHERE id = ?1",
        params![id],
        task_from_row,
    )
    .optional()
}

fn insert_log(conn: &Connection, task_id: i64, message: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO task_logs (task_id, status, created_at) VALUES (?1, ?2, ?3)",
        params![task_id, message, Utc::now()],
    )?;
    Ok(())
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    let status: String = row.get(3)?;
    let status = TaskStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown task status: {status}").into(),
        )
    })?;
    Ok(Task {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        status,
        priority: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn log_from_row(row: &Row<'_>) -> rusqlite::Result<TaskLog> {
    Ok(TaskLog {
        id: row.get(0)?,
        task_id: row.get(1)?,
        status: row.get(2)?,
        created_at: row.get(3)?,
    })
}
