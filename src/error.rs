//! Unified application error model and HTTP mapping helpers.
//! Guards and handlers build `ApiError` values; the `IntoResponse` impl
//! renders the JSON body and status code the wire contract expects.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("bad request: {message}")]
    BadRequest { message: String },
    #[error("unauthorized: {message}")]
    Unauthorized { message: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String },
    #[error("not found: {message}")]
    NotFound { message: String, file_path: Option<String> },
    #[error("rate limited: {message}")]
    RateLimited { message: String, retry_after_secs: u64 },
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl ApiError {
    pub fn bad_request<S: Into<String>>(msg: S) -> Self {
        ApiError::BadRequest { message: msg.into() }
    }
    pub fn unauthorized<S: Into<String>>(msg: S) -> Self {
        ApiError::Unauthorized { message: msg.into() }
    }
    pub fn forbidden<S: Into<String>>(msg: S) -> Self {
        ApiError::Forbidden { message: msg.into() }
    }
    pub fn not_found<S: Into<String>>(msg: S, file_path: Option<String>) -> Self {
        ApiError::NotFound { message: msg.into(), file_path }
    }
    pub fn rate_limited<S: Into<String>>(msg: S, retry_after_secs: u64) -> Self {
        ApiError::RateLimited { message: msg.into(), retry_after_secs }
    }
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        ApiError::Internal { message: msg.into() }
    }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden { .. } => StatusCode::FORBIDDEN,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.http_status();
        let body = match &self {
            ApiError::NotFound { message, file_path } => {
                json!({"message": message, "filePath": file_path})
            }
            ApiError::RateLimited { message, retry_after_secs } => {
                json!({"error": "Too many requests", "message": message, "retryAfter": retry_after_secs})
            }
            ApiError::Unauthorized { message } => json!({"error": message}),
            ApiError::Forbidden { message } => {
                json!({"error": "Access denied", "message": message})
            }
            ApiError::BadRequest { message } | ApiError::Internal { message } => {
                json!({"message": message})
            }
        };
        let mut resp = (status, Json(body)).into_response();
        if let ApiError::RateLimited { retry_after_secs, .. } = &self {
            if let Ok(v) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                resp.headers_mut().insert("Retry-After", v);
            }
        }
        resp
    }
}
