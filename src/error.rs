//! Error types for fediwire
//!
//! Every failure in the federation core is local to the request or document
//! that caused it. Errors are converted to `FederationError`, which
//! implements `IntoResponse` so a rejected delivery becomes a 4xx for the
//! sending peer without touching other in-flight work.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use thiserror::Error;

/// Why a single field failed its contract
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationFailure {
    /// A required field is absent
    Missing,
    /// The value matches none of the accepted types
    TypeMismatch,
    /// The value matched a type but its validator rejected it
    Rejected,
}

/// A field/value pair that violates its document's field contract
#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid value {value} for {field} ({reason:?})")]
pub struct ValidationError {
    /// Offending field name
    pub field: String,
    /// Offending value (`null` when a required field is missing)
    pub value: Value,
    /// Which check failed
    pub reason: ValidationFailure,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, value: Value, reason: ValidationFailure) -> Self {
        Self {
            field: field.into(),
            value,
            reason,
        }
    }

    pub fn missing(field: impl Into<String>) -> Self {
        Self::new(field, Value::Null, ValidationFailure::Missing)
    }
}

/// Federation-wide error type
#[derive(Debug, Error)]
pub enum FederationError {
    /// Document failed its schema (400)
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Malformed request or payload (400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Signature verification failed (401)
    #[error("Invalid signature")]
    InvalidSignature,

    /// Key material could not be parsed or used (500 on the signing side)
    #[error("Key error: {0}")]
    Key(String),

    /// Access denied, e.g. key fetch pointing at a private host (403)
    #[error("Access denied")]
    Forbidden,

    /// Resource not found (404)
    #[error("Resource not found")]
    NotFound,

    /// HTTP client error (502)
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Remote peer misbehaved (502)
    #[error("Federation error: {0}")]
    Federation(String),

    /// Document store error (500)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error (500)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error (500)
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for FederationError {
    fn from(err: config::ConfigError) -> Self {
        FederationError::Config(err.to_string())
    }
}

impl FederationError {
    /// Short machine-readable label, used for the error metric and JSON body
    pub fn kind(&self) -> &'static str {
        match self {
            FederationError::Validation(_) => "validation",
            FederationError::BadRequest(_) => "bad_request",
            FederationError::InvalidSignature => "invalid_signature",
            FederationError::Key(_) => "key",
            FederationError::Forbidden => "forbidden",
            FederationError::NotFound => "not_found",
            FederationError::HttpClient(_) => "http_client",
            FederationError::Federation(_) => "federation",
            FederationError::Storage(_) => "storage",
            FederationError::Config(_) => "config",
            FederationError::Internal(_) => "internal",
        }
    }

    /// HTTP status reported to the peer for this error
    pub fn status(&self) -> StatusCode {
        match self {
            FederationError::Validation(_) | FederationError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            FederationError::InvalidSignature => StatusCode::UNAUTHORIZED,
            FederationError::Forbidden => StatusCode::FORBIDDEN,
            FederationError::NotFound => StatusCode::NOT_FOUND,
            FederationError::HttpClient(_) | FederationError::Federation(_) => {
                StatusCode::BAD_GATEWAY
            }
            FederationError::Key(_)
            | FederationError::Storage(_)
            | FederationError::Config(_)
            | FederationError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for FederationError {
    fn into_response(self) -> Response {
        use axum::Json;

        let status = self.status();
        let error_type = self.kind();
        // Server-side details stay in the logs
        let error_message = if status.is_server_error() && status != StatusCode::BAD_GATEWAY {
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        crate::metrics::ERRORS_TOTAL
            .with_label_values(&[error_type])
            .inc();

        let body = Json(serde_json::json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Result type alias using FederationError
pub type Result<T> = std::result::Result<T, FederationError>;
