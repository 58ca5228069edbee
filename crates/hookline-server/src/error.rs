//! Management API error responses.
//!
//! Every failing operation answers with the structured body
//! `{status: "error", code, message, timestamp, request_id}` and the
//! matching HTTP status.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use hookline_core::error::RelayError;
use serde_json::json;
use uuid::Uuid;

/// An API-surface error with its HTTP mapping.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    /// 400 with code `validation_error`
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "validation_error",
            message: message.into(),
        }
    }

    /// 404 with code `not_found`
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "not_found",
            message: message.into(),
        }
    }

    /// 500 with code `internal_error`
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal_error",
            message: message.into(),
        }
    }

    /// The mapped HTTP status (test helper)
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// The machine-readable code (test helper)
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        let message = err.to_string();
        match err {
            RelayError::Validation { .. } | RelayError::InvalidUrl { .. } => Self {
                status: StatusCode::BAD_REQUEST,
                code: "validation_error",
                message,
            },
            RelayError::NotFound { .. } => Self {
                status: StatusCode::NOT_FOUND,
                code: "not_found",
                message,
            },
            RelayError::Conflict { .. } => Self {
                status: StatusCode::CONFLICT,
                code: "conflict",
                message,
            },
            RelayError::CapacityExhausted { .. } => Self {
                status: StatusCode::SERVICE_UNAVAILABLE,
                code: "capacity_exhausted",
                message,
            },
            _ => Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "internal_error",
                message,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "status": "error",
            "code": self.code,
            "message": self.message,
            "timestamp": Utc::now().to_rfc3339(),
            "request_id": Uuid::new_v4().to_string(),
        });
        (self.status, Json(body)).into_response()
    }
}
