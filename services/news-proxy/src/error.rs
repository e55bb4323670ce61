//! Service-specific error types
//!
//! Per-request failures become JSON error responses of the shape
//! `{"error":{"type":"...","message":"...","request_id":"req_..."}}`.
//! Startup failures go through `anyhow` in main instead.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors surfaced to API clients.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Upstream(#[from] key_pool::Error),

    #[error("invalid upstream response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Upstream(key_pool::Error::PoolExhausted { .. })
            | ApiError::Upstream(key_pool::Error::NoCredentials) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Upstream(_) | ApiError::InvalidResponse(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Error type label for the response body.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "invalid_request",
            ApiError::Upstream(key_pool::Error::PoolExhausted { .. })
            | ApiError::Upstream(key_pool::Error::NoCredentials) => "pool_exhausted",
            ApiError::Upstream(_) => "upstream_error",
            ApiError::InvalidResponse(_) => "invalid_upstream_response",
        }
    }

    pub fn into_response_with_id(self, request_id: &str) -> Response {
        error_response(self.status(), self.kind(), &self.to_string(), request_id)
    }
}

/// JSON error body with the request id for log correlation.
pub fn error_response(
    status: StatusCode,
    kind: &str,
    message: &str,
    request_id: &str,
) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": kind,
            "message": message,
            "request_id": request_id,
        }
    });
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}
