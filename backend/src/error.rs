//! Standardized error handling for the Flowgrid API
//!
//! This module provides a consistent error response format across all endpoints.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Standard API error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code (e.g., "VALIDATION_ERROR", "NOT_FOUND", "ENGINE_ERROR")
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Optional field-level errors for validation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HashMap<String, Vec<String>>>,
    /// ISO 8601 timestamp
    pub timestamp: String,
    /// Request path that caused the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
            path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    // Convenience constructors for common error types

    /// Create a 404 Not Found error
    pub fn not_found(message: impl Into<String>) -> AppError {
        AppError::NotFound(message.into())
    }

    /// Create a 500 Internal Server Error
    pub fn internal(message: impl Into<String>) -> AppError {
        AppError::InternalError(message.into())
    }

    /// Create a 403 Forbidden error
    pub fn forbidden(message: impl Into<String>) -> AppError {
        AppError::Forbidden(message.into())
    }

    /// Create a 400 Bad Request error
    pub fn bad_request(message: impl Into<String>) -> AppError {
        AppError::BadRequest(message.into())
    }
}

/// Application error type that can be converted to HTTP responses
#[derive(Debug)]
pub enum AppError {
    // Precondition errors: missing identifiers, wrong lifecycle status,
    // malformed action payloads
    BadRequest(String),

    // Authorization errors: a workflow touched outside its owning tenant
    Forbidden(String),

    // Resource errors
    NotFound(String),

    // Validation errors with field-level detail
    ValidationError { details: HashMap<String, Vec<String>> },

    // Server errors
    InternalError(String),
    DatabaseError(String),

    // Upstream automation engine errors, reported with enough context to
    // distinguish a misconfiguration from a genuine engine failure
    EngineError {
        status: Option<u16>,
        url: String,
        message: String,
    },
}

impl AppError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::InternalError(_) | Self::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::EngineError { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    /// Get the error code string
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::InternalError(_) => "INTERNAL_ERROR",
            Self::DatabaseError(_) => "DATABASE_ERROR",
            Self::EngineError { .. } => "ENGINE_ERROR",
        }
    }

    /// Get the error message
    pub fn message(&self) -> String {
        match self {
            Self::BadRequest(msg) => msg.clone(),
            Self::Forbidden(msg) => msg.clone(),
            Self::NotFound(resource) => format!("{} not found", resource),
            Self::ValidationError { details } => {
                let mut fields: Vec<String> = details
                    .iter()
                    .map(|(field, errors)| format!("{}: {}", field, errors.join(", ")))
                    .collect();
                fields.sort();
                format!("Validation failed: {}", fields.join("; "))
            }
            Self::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                "An internal error occurred".to_string()
            }
            Self::DatabaseError(msg) => {
                tracing::error!("Database error: {}", msg);
                "A database error occurred".to_string()
            }
            Self::EngineError {
                status,
                url,
                message,
            } => match status {
                Some(code) => format!(
                    "Automation engine request to {} failed with status {}: {}",
                    url, code, message
                ),
                None => format!("Automation engine request to {} failed: {}", url, message),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut error = ApiError::new(self.error_code(), self.message());

        // Add details for validation errors
        if let Self::ValidationError { details } = &self {
            error.details = Some(details.clone());
        }

        (status, Json(error)).into_response()
    }
}

// Implement From for common error types
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("Resource".to_string()),
            _ => Self::DatabaseError(err.to_string()),
        }
    }
}

/// Result type alias for handlers
pub type ApiResult<T> = Result<T, AppError>;

/// Helper to add multiple validation errors
pub struct ValidationBuilder {
    details: HashMap<String, Vec<String>>,
}

impl ValidationBuilder {
    pub fn new() -> Self {
        Self {
            details: HashMap::new(),
        }
    }

    pub fn error(mut self, field: &str, message: &str) -> Self {
        self.details
            .entry(field.to_string())
            .or_insert_with(Vec::new)
            .push(message.to_string());
        self
    }

    pub fn build(self) -> Option<AppError> {
        if self.details.is_empty() {
            None
        } else {
            Some(AppError::ValidationError {
                details: self.details,
            })
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.details.is_empty()
    }
}

impl Default for ValidationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_builder() {
        let error = ValidationBuilder::new()
            .error("template_ids", "At least one template id is required")
            .error("template_ids", "Template ids must be unique")
            .error("variables", "Variable values must not be empty")
            .build();

        assert!(error.is_some());
        if let Some(AppError::ValidationError { details }) = error {
            assert_eq!(details.get("template_ids").unwrap().len(), 2);
            assert_eq!(details.get("variables").unwrap().len(), 1);
        }
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            AppError::Forbidden("workflow belongs to another tenant".into()).error_code(),
            "FORBIDDEN"
        );
        assert_eq!(
            AppError::NotFound("Workflow".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::EngineError {
                status: Some(502),
                url: "http://engine.local/api/v1/workflows".into(),
                message: "bad gateway".into(),
            }
            .status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_engine_error_message_carries_context() {
        let err = AppError::EngineError {
            status: Some(401),
            url: "http://engine.local/api/v1/workflows/w1".into(),
            message: "<html>Unauthorized</html>".into(),
        };
        let msg = err.message();
        assert!(msg.contains("401"));
        assert!(msg.contains("/api/v1/workflows/w1"));
    }
}
