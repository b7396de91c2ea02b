//! HTTP API for the task manager.
//!
//! ## Endpoints
//!
//! - `POST /tasks` - Create a task
//! - `GET /tasks` - List tasks with pagination and filters
//! - `GET /tasks/{id}` - Fetch a single task
//! - `PUT /tasks/{id}` - Partially update a task
//! - `DELETE /tasks/{id}` - Delete a task and its audit log
//! - `POST /tasks/{id}/process` - Trigger background processing
//! - `GET /tasks/{id}/logs` - Read a task's audit trail
//! - `GET /health` - Health check

mod error;
mod routes;
mod tasks;

pub use error::{ApiError, FieldError};
pub use routes::{router, serve, AppState};
