//! Error Taxonomy
//!
//! Every error surfaced to a caller carries a stable machine code, not
//! prose. Input errors are rejected synchronously and never retried; rate
//! limit errors say exactly how long to wait; store failures map to
//! NETWORK_ERROR / SERVER_ERROR.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// A single field-level validation failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// Payload field the error refers to
    pub field: String,
    /// Human-readable message for the form UI
    pub message: String,
}

impl FieldError {
    pub fn new(field: &str, message: &str) -> Self {
        Self {
            field: field.to_string(),
            message: message.to_string(),
        }
    }
}

/// Errors surfaced to API callers
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Token failed the structural check
    #[error("access token is malformed")]
    InvalidToken,

    /// No guest matches the token
    #[error("no guest found for this token")]
    TokenNotFound,

    /// Too many attempts; the caller should wait
    #[error("too many attempts, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Payload failed validation
    #[error("submission failed validation")]
    Validation { fields: Vec<FieldError> },

    /// The store's uniqueness constraint fired despite the upsert fast path
    #[error("a response already exists for this guest")]
    DuplicateSubmission,

    /// Store or provider connectivity failure
    #[error("network error: {0}")]
    Network(String),

    /// Store-side failure
    #[error("server error: {0}")]
    Server(String),

    /// Anything unclassified
    #[error("unknown error: {0}")]
    Unknown(String),
}

impl ApiError {
    /// Stable machine code for this error
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidToken => "INVALID_TOKEN",
            Self::TokenNotFound => "TOKEN_NOT_FOUND",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::DuplicateSubmission => "DUPLICATE_SUBMISSION",
            Self::Network(_) => "NETWORK_ERROR",
            Self::Server(_) => "SERVER_ERROR",
            Self::Unknown(_) => "UNKNOWN_ERROR",
        }
    }

    /// Single-field validation error
    pub fn validation(field: &str, message: &str) -> Self {
        Self::Validation {
            fields: vec![FieldError::new(field, message)],
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::InvalidToken | Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::TokenNotFound => StatusCode::NOT_FOUND,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::DuplicateSubmission => StatusCode::CONFLICT,
            Self::Network(_) | Self::Server(_) | Self::Unknown(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Wire shape of an error response
#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<Vec<FieldError>>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            code: self.code(),
            message: self.to_string(),
            retry_after_secs: match &self {
                Self::RateLimited { retry_after_secs } => Some(*retry_after_secs),
                _ => None,
            },
            fields: match &self {
                Self::Validation { fields } => Some(fields.clone()),
                _ => None,
            },
        };
        (status, Json(body)).into_response()
    }
}
