//! HTTP error mapping.

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::engine::EngineError;

/// Error response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug)]
pub enum AppError {
    /// Malformed path, query or body.
    BadRequest(String),
    Engine(EngineError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, ApiError::new("BAD_REQUEST", msg)),
            AppError::Engine(e) => {
                let msg = e.to_string();
                match e {
                    EngineError::Validation(_) => (StatusCode::BAD_REQUEST, ApiError::new("VALIDATION", msg)),
                    EngineError::LimitExceeded(_) => {
                        (StatusCode::BAD_REQUEST, ApiError::new("LIMIT_EXCEEDED", msg))
                    }
                    EngineError::NotFound { .. } => (StatusCode::NOT_FOUND, ApiError::new("NOT_FOUND", msg)),
                    EngineError::TransientRead(_) => {
                        tracing::error!("read failure: {msg}");
                        (StatusCode::INTERNAL_SERVER_ERROR, ApiError::new("TRANSIENT_READ", msg))
                    }
                    EngineError::WalError(_) => {
                        tracing::error!("write failure: {msg}");
                        (StatusCode::INTERNAL_SERVER_ERROR, ApiError::new("WRITE_FAILED", msg))
                    }
                }
            }
        };

        (status, Json(error)).into_response()
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        AppError::Engine(err)
    }
}

impl From<JsonRejection> for AppError {
    fn from(err: JsonRejection) -> Self {
        AppError::BadRequest(err.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(err: QueryRejection) -> Self {
        AppError::BadRequest(err.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(err: PathRejection) -> Self {
        AppError::BadRequest(err.body_text())
    }
}
