//! Error handling module
//!
//! Defines the application error type and its HTTP mapping

use crate::services::gateway::{GatewayError, RetryDiagnostics, HEADER_ALL_FAILED};
use axum::{
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Request validation failed
    #[error("Request validation failed: {0}")]
    Validation(String),

    /// Every upstream credential failed
    #[error(
        "All upstream credentials failed after {} attempts",
        .0.attempts
    )]
    Exhausted(RetryDiagnostics),

    /// Upstream unreachable or broken mid-response
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// The token-protected API could not be reached
    #[error("{0}")]
    Proxy(String),

    /// Service temporarily unavailable
    #[error("Service temporarily unavailable: {0}")]
    ServiceUnavailable(String),

    /// Internal server error
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),
}

/// Error body: `{"type": "error", "error": {"type": .., "message": ..}}`
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    #[serde(rename = "type")]
    pub error_type: String,
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}

impl AppError {
    /// Get HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::Serialization(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Exhausted(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Config(_) | AppError::Proxy(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Get error type string
    pub fn error_type(&self) -> &'static str {
        match self {
            AppError::Validation(_) | AppError::Serialization(_) => "invalid_request_error",
            AppError::NotFound(_) => "not_found_error",
            AppError::Exhausted(_) => "rate_limit_error",
            AppError::ServiceUnavailable(_) => "overloaded_error",
            AppError::Upstream(_) | AppError::Config(_) | AppError::Proxy(_) | AppError::Internal(_) => {
                "api_error"
            }
        }
    }

    /// Convert to the JSON error envelope
    pub fn to_envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            error_type: "error".to_string(),
            error: ErrorDetail {
                error_type: self.error_type().to_string(),
                message: self.to_string(),
            },
        }
    }

    /// Extra response headers
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let AppError::Exhausted(diagnostics) = self {
            insert_diagnostic_headers(&mut headers, diagnostics);
            headers.insert(HeaderName::from_static(HEADER_ALL_FAILED), HeaderValue::from_static("true"));
        }
        headers
    }
}

/// Copy retry diagnostics into response headers
pub fn insert_diagnostic_headers(headers: &mut HeaderMap, diagnostics: &RetryDiagnostics) {
    for (name, value) in diagnostics.headers() {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    }
}

impl From<GatewayError> for AppError {
    fn from(error: GatewayError) -> Self {
        match error {
            GatewayError::NoCredentials => AppError::ServiceUnavailable(error.to_string()),
            GatewayError::Exhausted(diagnostics) => AppError::Exhausted(diagnostics),
            GatewayError::Stream(_) | GatewayError::Transport(_) => AppError::Upstream(error.to_string()),
            GatewayError::InvalidRequest(message) => AppError::Validation(message),
        }
    }
}

/// Implement IntoResponse trait to allow errors to be returned directly as HTTP responses
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!("Application error: {} - Status code: {}", self, status);
        } else {
            tracing::warn!("Client error: {} - Status code: {}", self, status);
        }

        let headers = self.headers();
        match &self {
            AppError::Proxy(message) => {
                (status, headers, Json(serde_json::json!({ "error": message }))).into_response()
            }
            _ => (status, headers, Json(self.to_envelope())).into_response(),
        }
    }
}

/// Result type alias
pub type AppResult<T> = Result<T, AppError>;
