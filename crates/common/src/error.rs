use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use crate::queue::QueueError;

/// Common error types used across the application.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// An infrastructure dependency (preference service, counter store) failed or timed out.
    #[error("Dependency unavailable: {0}")]
    TransientDependency(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Too many requests")]
    RateLimited,

    #[error("User {user_id} has not opted in to {channel} notifications")]
    NotOptedIn { user_id: String, channel: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether the failure came from infrastructure rather than the caller.
    pub fn is_internal(&self) -> bool {
        self.status_code().is_server_error()
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::NotOptedIn { .. } => StatusCode::BAD_REQUEST,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Database(_)
            | AppError::Redis(_)
            | AppError::Queue(_)
            | AppError::TransientDependency(_)
            | AppError::Config(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Infrastructure details stay in the logs.
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "Request failed with internal error");
            "Failed to process request".to_string()
        } else {
            self.to_string()
        };

        let body = json!({ "error": message });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::Validation("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::NotOptedIn {
                user_id: "u".into(),
                channel: "sms".into()
            }
            .status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::RateLimited.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            AppError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert!(AppError::TransientDependency("down".into()).is_internal());
        assert!(AppError::Queue(QueueError::Unavailable("down".into())).is_internal());
        assert!(!AppError::RateLimited.is_internal());
    }
}
