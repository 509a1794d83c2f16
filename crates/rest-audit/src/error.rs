//! Error types
//!
//! [`AuditError`] covers the audit pipeline itself. None of its variants ever
//! reach the API caller: capture and finalize failures go to the error
//! channel, configuration failures abort startup.
//!
//! [`AppError`] is the HTTP-facing error of the demo orders API.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type alias for audit pipeline operations
pub type AuditResult<T> = std::result::Result<T, AuditError>;

/// Audit pipeline failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuditError {
    /// Malformed route or global options, fatal at startup
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The state before an update/delete (or after an update) could not be read
    #[error("Capture error: {0}")]
    Capture(String),

    /// A record could not be built or there was nothing to emit
    #[error("Build error: {0}")]
    Build(String),
}

impl AuditError {
    /// Message without the variant prefix
    pub fn message(&self) -> &str {
        match self {
            AuditError::Configuration(msg) | AuditError::Capture(msg) | AuditError::Build(msg) => {
                msg
            },
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AuditError::Configuration(_) => "configuration",
            AuditError::Capture(_) => "capture",
            AuditError::Build(_) => "build",
        }
    }
}

/// Demo API errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            AppError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            AppError::Internal(message) => {
                tracing::error!("Internal error: {}", message);
                (StatusCode::INTERNAL_SERVER_ERROR, message)
            },
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "status": status.as_u16(),
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_error_display_and_message() {
        let err = AuditError::Capture("get:/api/test/5 failed".to_string());
        assert_eq!(err.to_string(), "Capture error: get:/api/test/5 failed");
        assert_eq!(err.message(), "get:/api/test/5 failed");
        assert_eq!(err.kind(), "capture");
    }

    #[test]
    fn test_app_error_status() {
        let response = AppError::NotFound("order 7".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = AppError::BadRequest("missing item".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
