//! Error types for the data gateway.
//!
//! Every fallible operation in the library returns [`ServerError`]. Its
//! `Display` text is the `detail` message clients see, and
//! [`ServerError::status_code`] decides the HTTP status.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

/// Domain-specific errors for the data gateway.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Statement-type validation failed
    #[error("Query validation failed: {0}")]
    ValidationFailed(String),

    /// Dataset-reference validation failed
    #[error("Dataset validation failed: {0}")]
    DatasetDenied(String),

    /// Access to a resource outside the allow-list
    #[error("{0}")]
    PermissionDenied(String),

    /// Malformed request
    #[error("{0}")]
    InvalidInput(String),

    /// Resource not found
    #[error("{0}")]
    NotFound(String),

    /// Optional integration without credentials
    #[error("{0}")]
    NotConfigured(String),

    /// Upstream service (warehouse, search) failure
    #[error("{service} error: {message}")]
    Upstream {
        service: &'static str,
        status: Option<u16>,
        message: String,
    },

    /// Operation exceeded its deadline
    #[error("Query timeout: operation exceeded {timeout_seconds} seconds")]
    Timeout { timeout_seconds: u64 },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a statement validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationFailed(msg.into())
    }

    /// Create a dataset validation error.
    pub fn dataset_denied(msg: impl Into<String>) -> Self {
        Self::DatasetDenied(msg.into())
    }

    /// Create the error for a dataset outside the allow-list.
    pub fn dataset_not_allowed(dataset_id: &str) -> Self {
        Self::PermissionDenied(format!("Access to dataset '{dataset_id}' is not allowed"))
    }

    /// Create an invalid input error.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a not configured error.
    pub fn not_configured(msg: impl Into<String>) -> Self {
        Self::NotConfigured(msg.into())
    }

    /// Create an upstream error.
    pub fn upstream(service: &'static str, status: Option<u16>, msg: impl Into<String>) -> Self {
        Self::Upstream {
            service,
            status,
            message: msg.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(seconds: u64) -> Self {
        Self::Timeout {
            timeout_seconds: seconds,
        }
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Map a transport-level `reqwest` failure.
    pub fn from_reqwest(service: &'static str, e: reqwest::Error) -> Self {
        let status = e.status().map(|s| s.as_u16());
        Self::Upstream {
            service,
            status,
            message: e.to_string(),
        }
    }

    /// HTTP status reported to clients.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::ValidationFailed(_) | Self::DatasetDenied(_) | Self::PermissionDenied(_) => {
                StatusCode::FORBIDDEN
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Self::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Config(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this error is transient and may succeed on retry.
    ///
    /// Upstream failures without a status (connect errors, resets) and those
    /// with 408, 429 or 5xx are transient; other 4xx are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Upstream { status: None, .. } => true,
            Self::Upstream {
                status: Some(code), ..
            } => matches!(*code, 408 | 429 | 500..=599),
            _ => false,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let detail = self.to_string();

        if status.is_server_error() {
            error!(status = status.as_u16(), "{}", detail);
        } else if status == StatusCode::FORBIDDEN {
            warn!("Rejected request: {}", detail);
        }

        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ServerError::invalid_input("too long").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServerError::validation("x").status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ServerError::dataset_not_allowed("hr").status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ServerError::not_found("Table a.b not found").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServerError::upstream("BigQuery", Some(400), "bad").status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ServerError::not_configured("Web search is not configured").status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ServerError::timeout(60).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ServerError::internal("boom").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_detail_messages() {
        assert_eq!(
            ServerError::validation("Operation 'DROP' is not allowed").to_string(),
            "Query validation failed: Operation 'DROP' is not allowed"
        );
        assert_eq!(
            ServerError::dataset_denied("Reference to unauthorized dataset: hr").to_string(),
            "Dataset validation failed: Reference to unauthorized dataset: hr"
        );
        assert_eq!(
            ServerError::dataset_not_allowed("hr").to_string(),
            "Access to dataset 'hr' is not allowed"
        );
    }

    #[test]
    fn test_transient_errors() {
        assert!(ServerError::timeout(30).is_transient());
        assert!(ServerError::upstream("BigQuery", None, "reset").is_transient());
        assert!(ServerError::upstream("BigQuery", Some(503), "busy").is_transient());
        assert!(ServerError::upstream("Tavily", Some(429), "slow down").is_transient());
        assert!(!ServerError::upstream("BigQuery", Some(404), "gone").is_transient());
        assert!(!ServerError::validation("x").is_transient());
    }
}
