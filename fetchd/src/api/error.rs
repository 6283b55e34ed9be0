//! API error handling.
//!
//! Provides consistent error responses for the API.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::Error;

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
}

/// API error type that can be converted to HTTP responses.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

impl ApiError {
    /// Create a new API error.
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Create a 400 Bad Request error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_REQUEST", message)
    }

    /// Create a 404 Not Found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    /// Create a 409 Conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "CONFLICT", message)
    }

    /// Create a 500 Internal Server Error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    /// Create a 503 Service Unavailable error.
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorResponse {
            code: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidRequest(msg) => ApiError::bad_request(msg),
            Error::QueueFull { depth, limit } => ApiError::service_unavailable(format!(
                "Job queue is full ({depth}/{limit}); retry later"
            )),
            Error::NotFound { entity_type, id } => {
                ApiError::not_found(format!("{entity_type} with id '{id}' not found"))
            }
            Error::AlreadyTerminal { id, state } => {
                ApiError::conflict(format!("Job {id} already finished ({state})"))
            }
            Error::NotRunning { id, state } => {
                ApiError::conflict(format!("Job {id} is not running ({state})"))
            }
            Error::InvalidStateTransition { .. } => {
                // State-machine violations are implementation bugs, never a
                // client condition; hide the detail.
                tracing::error!("Internal state error: {}", err);
                ApiError::internal("Internal consistency error")
            }
            Error::Configuration(msg) => ApiError::bad_request(msg),
            Error::Io(e) => {
                tracing::error!("IO error: {}", e);
                ApiError::internal("IO error occurred")
            }
            _ => {
                tracing::error!("Unexpected error: {}", err);
                ApiError::internal("An unexpected error occurred")
            }
        }
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_creation() {
        let err = ApiError::not_found("Job not found");
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.code, "NOT_FOUND");
        assert_eq!(err.message, "Job not found");
    }

    #[test]
    fn queue_full_maps_to_503() {
        let api_err: ApiError = Error::QueueFull {
            depth: 10,
            limit: 10,
        }
        .into();
        assert_eq!(api_err.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn terminal_and_not_running_map_to_conflict() {
        let api_err: ApiError = Error::AlreadyTerminal {
            id: "j1".to_string(),
            state: "succeeded".to_string(),
        }
        .into();
        assert_eq!(api_err.status, StatusCode::CONFLICT);

        let api_err: ApiError = Error::NotRunning {
            id: "j1".to_string(),
            state: "queued".to_string(),
        }
        .into();
        assert_eq!(api_err.status, StatusCode::CONFLICT);
    }

    #[test]
    fn internal_state_errors_are_masked() {
        let api_err: ApiError = Error::InvalidStateTransition {
            from: "succeeded".to_string(),
            to: "running".to_string(),
        }
        .into();
        assert_eq!(api_err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!api_err.message.contains("succeeded"));
    }

    #[test]
    fn test_from_domain_error() {
        let domain_err = Error::not_found("Job", "123");
        let api_err: ApiError = domain_err.into();

        assert_eq!(api_err.status, StatusCode::NOT_FOUND);
        assert!(api_err.message.contains("123"));
    }
}
