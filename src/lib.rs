//! # taskman
//!
//! Async task management HTTP API.
//!
//! A thin web service over SQLite: CRUD for tasks with status transitions,
//! an append-only audit log per task, pagination and filtering, and a
//! fire-and-forget background worker that simulates long-running processing.
//!
//! ## Task lifecycle
//! 1. `POST /tasks` creates a task (status `pending`)
//! 2. `POST /tasks/{id}/process` schedules the background worker
//! 3. The worker flips the task to `in_progress`, waits, then `completed`
//! 4. Every mutation appends a row to the task's audit log
//!
//! ## Modules
//! - `api`: axum routes, request validation, and HTTP error mapping
//! - `store`: SQLite-backed repository for tasks and their logs
//! - `worker`: background status-transition worker
//! - `config`: environment-derived configuration

pub mod api;
pub mod config;
pub mod store;
pub mod worker;

pub use config::Config;
pub use store::{Task, TaskLog, TaskStatus, TaskStore};
