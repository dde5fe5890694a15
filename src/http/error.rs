//! API error type with flat JSON bodies.
//!
//! Every non-2xx response is `{ "error": <message> }`, plus `details`
//! (upstream and internal failures) or `fields` (validation failures).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::engine::{SubmitError, TurnError};
use crate::normalize::ValidationError;
use crate::providers::truncate_diagnostic;

/// Body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Short message.
    pub error: String,
    /// Truncated diagnostic text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Field-scoped validation messages.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldError>,
}

/// One invalid field.
#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    /// Field name.
    pub field: String,
    /// User-facing message.
    pub message: String,
}

impl From<ValidationError> for FieldError {
    fn from(e: ValidationError) -> Self {
        Self {
            field: e.field,
            message: e.message,
        }
    }
}

/// API-level errors with HTTP status mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed or incomplete request.
    #[error("Invalid request: {0}")]
    BadRequest(String),
    /// The operation needs an authenticated caller.
    #[error("Authentication required")]
    Unauthorized,
    /// Submitted record failed validation.
    #[error("Validation failed")]
    Unprocessable(Vec<FieldError>),
    /// The completion service failed.
    #[error("Completion service error: {0}")]
    Upstream(String),
    /// Anything else.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    error: message,
                    details: None,
                    fields: Vec::new(),
                },
            ),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                ErrorBody {
                    error: "authentication required".to_owned(),
                    details: None,
                    fields: Vec::new(),
                },
            ),
            ApiError::Unprocessable(fields) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorBody {
                    error: "validation failed".to_owned(),
                    details: None,
                    fields,
                },
            ),
            ApiError::Upstream(detail) => {
                tracing::warn!(status = 502, "completion service unavailable");
                (
                    StatusCode::BAD_GATEWAY,
                    ErrorBody {
                        error: "completion service unavailable".to_owned(),
                        details: Some(truncate_diagnostic(&detail)),
                        fields: Vec::new(),
                    },
                )
            }
            ApiError::Internal(detail) => {
                tracing::error!(detail = %truncate_diagnostic(&detail), "API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        error: "internal error".to_owned(),
                        details: Some(truncate_diagnostic(&detail)),
                        fields: Vec::new(),
                    },
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

impl From<TurnError> for ApiError {
    fn from(e: TurnError) -> Self {
        match e {
            TurnError::Upstream(inner) => ApiError::Upstream(inner.to_string()),
        }
    }
}

impl From<SubmitError> for ApiError {
    fn from(e: SubmitError) -> Self {
        match e {
            SubmitError::Unauthenticated => ApiError::Unauthorized,
            SubmitError::Invalid(problems) => {
                ApiError::Unprocessable(problems.into_iter().map(FieldError::from).collect())
            }
            SubmitError::Store(inner) => ApiError::Internal(inner.to_string()),
        }
    }
}
