//! Vision Service error types.
//!
//! All errors map to HTTP status codes via the `IntoResponse` impl.
//! Messages returned to clients for infrastructure failures are generic;
//! the underlying error is logged server-side.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::jwt::JwtValidationError;
use crate::models::MeetingStateError;
use serde::Serialize;
use thiserror::Error;

/// Vision Service error type.
///
/// Domain errors (`InsufficientFunds`, `MeetingEnded`, `NotAuthorized`, ...)
/// carry distinct codes so clients can tell "buy more tokens" apart from
/// "access denied".
#[derive(Debug, Error)]
pub enum VsError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid state transition or conflicting update.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Insufficient funds: balance {balance}, required {required}")]
    InsufficientFunds { balance: i64, required: i64 },

    #[error("Meeting has ended")]
    MeetingEnded,

    #[error("Not authorized to join this meeting")]
    NotAuthorized,

    #[error("Meeting is at capacity")]
    CapacityExceeded,

    #[error("User is banned")]
    UserBanned,

    #[error("Store operation timed out")]
    Timeout,

    /// Public meeting code collision on insert. Retried by the caller.
    #[error("Duplicate meeting code")]
    DuplicateId,

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl VsError {
    /// Returns the HTTP status code for this error (for metrics recording).
    pub fn status_code(&self) -> u16 {
        match self {
            VsError::Database(_) | VsError::DuplicateId | VsError::Internal(_) => 500,
            VsError::InvalidToken(_) => 401,
            VsError::InsufficientFunds { .. } => 402,
            VsError::Forbidden(_) | VsError::NotAuthorized | VsError::UserBanned => 403,
            VsError::NotFound(_) => 404,
            VsError::Conflict(_) | VsError::CapacityExceeded => 409,
            VsError::MeetingEnded => 410,
            VsError::BadRequest(_) => 400,
            VsError::ServiceUnavailable(_) => 503,
            VsError::Timeout => 504,
        }
    }

    /// Short, bounded label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            VsError::Database(_) => "database",
            VsError::InvalidToken(_) => "invalid_token",
            VsError::NotFound(_) => "not_found",
            VsError::Conflict(_) => "conflict",
            VsError::Forbidden(_) => "forbidden",
            VsError::BadRequest(_) => "bad_request",
            VsError::InsufficientFunds { .. } => "insufficient_funds",
            VsError::MeetingEnded => "meeting_ended",
            VsError::NotAuthorized => "not_authorized",
            VsError::CapacityExceeded => "capacity_exceeded",
            VsError::UserBanned => "user_banned",
            VsError::Timeout => "timeout",
            VsError::DuplicateId => "duplicate_id",
            VsError::ServiceUnavailable(_) => "service_unavailable",
            VsError::Internal(_) => "internal",
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for VsError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            VsError::Database(err) => {
                tracing::error!(target: "vs.database", error = %err, "Database operation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "An internal database error occurred".to_string(),
                )
            }
            VsError::InvalidToken(reason) => {
                (StatusCode::UNAUTHORIZED, "INVALID_TOKEN", reason.clone())
            }
            VsError::NotFound(resource) => (StatusCode::NOT_FOUND, "NOT_FOUND", resource.clone()),
            VsError::Conflict(reason) => (StatusCode::CONFLICT, "CONFLICT", reason.clone()),
            VsError::Forbidden(reason) => (StatusCode::FORBIDDEN, "FORBIDDEN", reason.clone()),
            VsError::BadRequest(reason) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", reason.clone()),
            VsError::InsufficientFunds { balance, required } => (
                StatusCode::PAYMENT_REQUIRED,
                "INSUFFICIENT_FUNDS",
                format!("Not enough vision tokens: balance {balance}, required {required}"),
            ),
            VsError::MeetingEnded => (
                StatusCode::GONE,
                "MEETING_ENDED",
                "This meeting has ended".to_string(),
            ),
            VsError::NotAuthorized => (
                StatusCode::FORBIDDEN,
                "NOT_AUTHORIZED",
                "You are not authorized to join this meeting".to_string(),
            ),
            VsError::CapacityExceeded => (
                StatusCode::CONFLICT,
                "CAPACITY_EXCEEDED",
                "This meeting is full".to_string(),
            ),
            VsError::UserBanned => (
                StatusCode::FORBIDDEN,
                "USER_BANNED",
                "This account has been suspended".to_string(),
            ),
            VsError::Timeout => {
                tracing::warn!(target: "vs.store", "Store operation timed out");
                (
                    StatusCode::GATEWAY_TIMEOUT,
                    "TIMEOUT",
                    "The operation timed out. Please try again.".to_string(),
                )
            }
            VsError::ServiceUnavailable(reason) => {
                tracing::warn!(target: "vs.availability", reason = %reason, "Service unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Service temporarily unavailable".to_string(),
                )
            }
            VsError::DuplicateId | VsError::Internal(_) => {
                tracing::error!(target: "vs.internal", error = %self, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        let mut response = (status, Json(error_response)).into_response();

        if status == StatusCode::UNAUTHORIZED {
            if let Ok(header_value) =
                "Bearer realm=\"vision-meet-api\", error=\"invalid_token\"".parse()
            {
                response
                    .headers_mut()
                    .insert("WWW-Authenticate", header_value);
            }
        }

        response
    }
}

impl From<sqlx::Error> for VsError {
    fn from(err: sqlx::Error) -> Self {
        VsError::Database(err.to_string())
    }
}

impl From<JwtValidationError> for VsError {
    fn from(err: JwtValidationError) -> Self {
        VsError::InvalidToken(err.to_string())
    }
}

impl From<MeetingStateError> for VsError {
    fn from(err: MeetingStateError) -> Self {
        match err {
            MeetingStateError::AlreadyStarted | MeetingStateError::NotStarted => {
                VsError::Conflict(err.to_string())
            }
            MeetingStateError::AlreadyEnded => VsError::MeetingEnded,
            MeetingStateError::CapacityExceeded => VsError::CapacityExceeded,
        }
    }
}
