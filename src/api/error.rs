//! API error type and its HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::store::StoreError;

/// A single field validation failure.
#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed or out-of-range input, rejected before reaching the store.
    #[error("validation failed")]
    Validation(Vec<FieldError>),

    /// Requested entity does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Operation disallowed given the entity's current state.
    #[error("{0}")]
    Conflict(String),

    /// Storage failure surfaced from the repository layer.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    pub fn task_not_found() -> Self {
        Self::NotFound("Task not found".to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Validation(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "detail": errors })),
            )
                .into_response(),
            Self::NotFound(detail) => {
                (StatusCode::NOT_FOUND, Json(json!({ "detail": detail }))).into_response()
            }
            Self::Conflict(detail) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "detail": detail }))).into_response()
            }
            Self::Store(e) => {
                tracing::error!("Storage error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "detail": "internal error" })),
                )
                    .into_response()
            }
        }
    }
}
