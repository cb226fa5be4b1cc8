use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use reclaim_core::{error::CoreError, normalize::NormalizeError};

use crate::engine::EngineError;

/// Application-level errors that map directly to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    /// A webhook payload the normalizer refused.
    #[error("unprocessable payload: {message}")]
    Unprocessable {
        field: Option<&'static str>,
        message: String,
    },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound { .. } => AppError::NotFound(err.to_string()),
            CoreError::InvalidTransition { .. } => AppError::Conflict(err.to_string()),
            CoreError::Validation(msg) => AppError::BadRequest(msg),
            CoreError::Serialization(e) => AppError::BadRequest(e.to_string()),
        }
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Core(e) => e.into(),
            EngineError::Repository(e) => AppError::Internal(e),
        }
    }
}

impl From<NormalizeError> for AppError {
    fn from(err: NormalizeError) -> Self {
        let field = match &err {
            NormalizeError::InvalidField { field, .. } => Some(*field),
            NormalizeError::UnsupportedTopic(_) => Some("topic"),
            NormalizeError::Malformed(_) => None,
        };
        AppError::Unprocessable {
            field,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message, field) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), None),
            AppError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "validation_error",
                msg.clone(),
                None,
            ),
            AppError::Unprocessable { field, message } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "invalid_payload",
                message.clone(),
                *field,
            ),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "invalid_transition", msg.clone(), None),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Unauthorized".to_string(),
                None,
            ),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error".to_string(),
                    None,
                )
            }
        };

        (
            status,
            Json(json!({
                "error": {
                    "code": code,
                    "message": message,
                    "field": field
                }
            })),
        )
            .into_response()
    }
}
