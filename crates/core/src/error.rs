//! Framework-agnostic service error.
//!
//! Each variant maps to an HTTP status code. The Axum layer converts this
//! into a response; the JSON-RPC layer maps it onto JSON-RPC error codes.

use serde::Serialize;

#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum ServiceError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    /// Backend I/O failure: git subprocess, hosted-API HTTP error.
    #[error("{0}")]
    Upstream(String),
    /// Hosted-API rate limit exhausted. `reset_at` is a unix timestamp.
    #[error("rate limit exceeded, resets at {reset_at}")]
    RateLimited { reset_at: i64 },
    #[error("{0}")]
    Internal(String),
}

impl ServiceError {
    /// HTTP status code as a `u16`.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest(_) => 400,
            Self::Unauthorized(_) => 401,
            Self::Forbidden(_) => 403,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::Upstream(_) => 502,
            Self::RateLimited { .. } => 503,
            Self::Internal(_) => 500,
        }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Upstream(_) => "upstream",
            Self::RateLimited { .. } => "rate_limited",
            Self::Internal(_) => "internal",
        }
    }

    /// The human-readable message.
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Build a closure that wraps a storage/IO error as `Internal`.
    pub fn from_db<E: std::fmt::Display>(context: &str) -> impl FnOnce(E) -> Self + '_ {
        move |e| Self::Internal(format!("{context}: {e}"))
    }
}

/// API error payload: `{"error": "...", "code": "..."}`.
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_at: Option<i64>,
}

impl From<&ServiceError> for ApiError {
    fn from(e: &ServiceError) -> Self {
        Self {
            error: e.message(),
            code: e.code().to_string(),
            reset_at: match e {
                ServiceError::RateLimited { reset_at } => Some(*reset_at),
                _ => None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_error_kinds() {
        assert_eq!(ServiceError::BadRequest("x".into()).status_code(), 400);
        assert_eq!(ServiceError::NotFound("x".into()).status_code(), 404);
        assert_eq!(ServiceError::Conflict("x".into()).status_code(), 409);
        assert_eq!(ServiceError::Forbidden("x".into()).status_code(), 403);
        assert_eq!(ServiceError::Upstream("x".into()).status_code(), 502);
        assert_eq!(ServiceError::RateLimited { reset_at: 0 }.status_code(), 503);
    }

    #[test]
    fn rate_limited_payload_carries_reset_at() {
        let err = ServiceError::RateLimited { reset_at: 1700000000 };
        let payload = ApiError::from(&err);
        assert_eq!(payload.reset_at, Some(1700000000));
        assert_eq!(payload.code, "rate_limited");
    }
}
