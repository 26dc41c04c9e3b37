//! Centralized error types for HomeLink.
//!
//! Uses `thiserror` for ergonomic error definitions and maps straight to the
//! small set of status codes the voice platform contract allows (200, 301,
//! 401, 403, 404, 405). Error responses carry no body — the upstream consumer
//! only looks at the status line.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Core application error type used across all HomeLink services.
#[derive(Debug, thiserror::Error)]
pub enum HomelinkError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl HomelinkError {
    /// Map error to HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for HomelinkError {
    fn into_response(self) -> Response {
        // Don't leak internal details to clients
        match &self {
            HomelinkError::Database(e) => tracing::error!("Database error: {e}"),
            HomelinkError::Internal(e) => tracing::error!("Internal error: {e}"),
            _ => {}
        }

        self.status_code().into_response()
    }
}

/// Convenience type alias for Results using HomelinkError.
pub type HomelinkResult<T> = Result<T, HomelinkError>;
