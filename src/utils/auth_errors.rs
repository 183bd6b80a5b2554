// Workflow error taxonomy and its HTTP mapping. Every failure carries a
// user-safe message and a code; internal causes are logged, never serialized.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidInput,
    Unauthorized,
    NotFound,
    Conflict,
    InternalError,
    PayloadTooLarge,
    TooManyRequests,
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct AuthError {
    pub code: ErrorCode,
    pub message: String,
    /// Seconds until a denied caller may retry (rate limiting only).
    pub retry_after: Option<u64>,
    /// Internal cause, logged at response time.
    cause: Option<String>,
}

/// Unified error body: `{"error": <message>, "code": <CODE>}`.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: ErrorCode,
}

impl AuthError {
    fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retry_after: None,
            cause: None,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    pub fn internal(cause: impl std::fmt::Display) -> Self {
        let mut err = Self::new(ErrorCode::InternalError, "internal server error");
        err.cause = Some(cause.to_string());
        err
    }

    pub fn too_many_requests(retry_after_secs: u64) -> Self {
        let mut err = Self::new(ErrorCode::TooManyRequests, "too many requests");
        err.retry_after = Some(retry_after_secs);
        err
    }

    pub fn status_code(&self) -> StatusCode {
        match self.code {
            ErrorCode::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Conflict => StatusCode::CONFLICT,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorCode::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        if let Some(cause) = &self.cause {
            tracing::error!(code = ?self.code, cause = %cause, "request failed");
        }

        let body = ErrorBody {
            error: self.message.clone(),
            code: self.code,
        };
        let mut response = (self.status_code(), Json(body)).into_response();

        if let Some(secs) = self.retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }

        response
    }
}
