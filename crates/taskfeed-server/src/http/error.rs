//! HTTP error mapping.
//!
//! Body shape: `{"error": {"code": "not_found", "message": "task 7 not found"}}`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use taskfeed_auth::AuthError;
use thiserror::Error;
use tracing::error;

use crate::mutation::MutationError;

/// Error returned by HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or invalid bearer credential (401).
    #[error("unauthenticated: {0}")]
    Unauthenticated(#[from] AuthError),
    /// Task absent or not owned by the caller (404).
    #[error("{0}")]
    NotFound(String),
    /// Request body or parameters rejected (422).
    #[error("{0}")]
    Invalid(String),
    /// Store or runtime failure (500). The detail is logged, not returned.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// HTTP status.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Invalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated(_) => "unauthenticated",
            Self::NotFound(_) => "not_found",
            Self::Invalid(_) => "invalid",
            Self::Internal(_) => "storage_error",
        }
    }
}

impl From<MutationError> for ApiError {
    fn from(err: MutationError) -> Self {
        match err {
            MutationError::Invalid(e) => Self::Invalid(e.to_string()),
            MutationError::NotFound(id) => Self::NotFound(format!("task {id} not found")),
            MutationError::Storage(e) => Self::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &self {
            Self::Internal(detail) => {
                error!(error = %detail, "request failed");
                "internal storage error".to_string()
            }
            Self::Unauthenticated(_) => "could not validate credentials".to_string(),
            other => other.to_string(),
        };
        let body = json!({ "error": { "code": self.code(), "message": message } });
        (self.status(), Json(body)).into_response()
    }
}
