//! Task storage.
//!
//! Persists tasks and their append-only audit logs in SQLite. The store is a
//! cloneable handle over a single shared connection; all SQL runs on the
//! blocking thread pool and every mutating operation commits the row and its
//! triggered audit entry in one transaction.

mod sqlite;

pub use sqlite::{TaskStore, CONNECT_ATTEMPTS, CONNECT_RETRY_DELAY};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Storage failure surfaced by the repository layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Lifecycle status of a task.
///
/// Persisted and serialized as the lowercase snake_case string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }

    /// Strict parse of the persisted/wire representation.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of trackable work.
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    /// 1-5, higher means more urgent
    pub priority: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An immutable audit record attached to a task.
///
/// `status` is a free-text message, not necessarily a [`TaskStatus`] value.
#[derive(Debug, Clone, Serialize)]
pub struct TaskLog {
    pub id: i64,
    pub task_id: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Fields for task creation. Validation happens at the API boundary.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    /// Explicit initial status; defaults to [`TaskStatus::Pending`].
    pub status: Option<TaskStatus>,
    pub priority: i64,
}

/// A partial update: only supplied fields are applied.
///
/// `description` is doubly optional so an explicit `null` (clear the field)
/// is distinguishable from the field being absent.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub status: Option<TaskStatus>,
    pub priority: Option<i64>,
}

impl TaskPatch {
    /// A patch that only moves the task to `status`.
    pub fn with_status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.priority.is_none()
    }
}

/// Filters for task listing. Both apply to the page and the total count.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// Case-insensitive substring match against the title
    pub title: Option<String>,
    /// Exact status equality
    pub status: Option<TaskStatus>,
}
