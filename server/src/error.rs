//! Error types for the Daytrack server.
//!
//! Each module owns the errors of its own concern (`ConfigError`,
//! `TelegramError`, `ControlDecodeError`, `NetworkParseError`). This module
//! defines [`ServerError`], the type the webhook handler fails with, and maps
//! it onto HTTP responses.
//!
//! | Variant | Status |
//! |---------|--------|
//! | [`ServerError::Forbidden`] | 403 |
//! | [`ServerError::RateLimited`] | 429 with `Retry-After` |
//! | [`ServerError::InvalidPayload`] | 500 |
//! | [`ServerError::Internal`] | 500 |
//!
//! Malformed payloads answer 500 rather than 400 so the platform treats them
//! like any other delivery failure.

use std::error::Error;
use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

/// Header name for the retry delay of rate-limited requests.
pub const HEADER_RETRY_AFTER: &str = "Retry-After";

/// Error body returned with every non-2xx response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable error message.
    pub error: String,

    /// Machine-readable error code.
    pub code: String,
}

/// Failure of a webhook request.
#[derive(Debug)]
pub enum ServerError {
    /// The caller is not inside the origin allowlist.
    Forbidden {
        /// Resolved caller address, if any.
        origin: Option<String>,
    },

    /// The caller exceeded its request budget.
    RateLimited {
        /// Rate-limited origin.
        origin: String,
        /// Number of seconds until the budget frees up.
        retry_after: u64,
    },

    /// The request body is not a valid update.
    InvalidPayload(String),

    /// Unexpected failure while handling the request.
    Internal(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forbidden { origin: Some(origin) } => {
                write!(f, "origin {origin} is not allowed")
            }
            Self::Forbidden { origin: None } => write!(f, "origin could not be resolved"),
            Self::RateLimited {
                origin,
                retry_after,
            } => {
                write!(
                    f,
                    "rate limit exceeded for {origin}, retry after {retry_after} seconds"
                )
            }
            Self::InvalidPayload(msg) => write!(f, "invalid payload: {msg}"),
            Self::Internal(msg) => write!(f, "internal server error: {msg}"),
        }
    }
}

impl Error for ServerError {}

impl ServerError {
    /// Creates a new rate limit error.
    ///
    /// # Example
    ///
    /// ```rust
    /// use daytrack_server::error::ServerError;
    ///
    /// let err = ServerError::rate_limited("149.154.167.220", 12);
    /// assert!(matches!(err, ServerError::RateLimited { retry_after: 12, .. }));
    /// ```
    pub fn rate_limited(origin: impl Into<String>, retry_after: u64) -> Self {
        Self::RateLimited {
            origin: origin.into(),
            retry_after,
        }
    }

    /// Creates a new invalid payload error.
    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::InvalidPayload(message.into())
    }

    /// Creates a new internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// HTTP status this error maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::InvalidPayload(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Forbidden { .. } => "forbidden",
            Self::RateLimited { .. } => "rate_limited",
            Self::InvalidPayload(_) => "invalid_payload",
            Self::Internal(_) => "internal",
        }
    }

    /// Message exposed to the caller. Internal details stay in the logs.
    fn public_message(&self) -> String {
        match self {
            Self::Forbidden { .. } => "forbidden".to_string(),
            Self::RateLimited { .. } => "rate limit exceeded".to_string(),
            Self::InvalidPayload(_) | Self::Internal(_) => "internal server error".to_string(),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.public_message(),
            code: self.code().to_string(),
        });

        match self {
            Self::RateLimited { retry_after, .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                [(HEADER_RETRY_AFTER, retry_after.to_string())],
                body,
            )
                .into_response(),
            other => (other.status(), body).into_response(),
        }
    }
}

/// A specialized Result type for webhook handling.
pub type Result<T> = std::result::Result<T, ServerError>;
