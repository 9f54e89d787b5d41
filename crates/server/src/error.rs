use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::fmt;

use revline_core::{ApiError, ServiceError};

/// Thin Axum adapter around the shared [`ServiceError`] type.
///
/// Produces `{"error": "<message>", "code": "<kind>"}` JSON responses.
#[derive(Debug)]
pub struct ApiErr(pub ServiceError);

impl ApiErr {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self(ServiceError::BadRequest(msg.into()))
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self(ServiceError::Unauthorized(msg.into()))
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self(ServiceError::NotFound(msg.into()))
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self(ServiceError::Internal(msg.into()))
    }

    /// Build a closure that logs a DB/IO error and returns `500`.
    pub fn from_db<E: fmt::Display>(context: &str) -> impl FnOnce(E) -> Self + '_ {
        move |e| {
            tracing::error!("{context}: {e}");
            Self::internal("internal server error")
        }
    }
}

impl From<ServiceError> for ApiErr {
    fn from(e: ServiceError) -> Self {
        if let ServiceError::Internal(msg) = &e {
            // Full context in the log, a short message on the wire.
            tracing::error!("internal error: {msg}");
            return Self(ServiceError::Internal("internal server error".into()));
        }
        Self(e)
    }
}

impl IntoResponse for ApiErr {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(ApiError::from(&self.0))).into_response()
    }
}
