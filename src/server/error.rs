//! API error normalization
//!
//! Every failure leaving the gateway is an [`ApiError`]. All kinds render as
//! JSON `{"error": message}` except a 416, which carries only its
//! `Content-Range` header.

use super::response::json_response;
use crate::auth::AuthError;
use crate::range::unsatisfiable_content_range;
use crate::router::RouterError;
use crate::storage::StorageError;
use crate::upload::UploadError;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_LENGTH, CONTENT_RANGE, WWW_AUTHENTICATE};
use hyper::{Response, StatusCode};
use thiserror::Error;

/// Errors returned to HTTP clients
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    /// `challenge` is the `WWW-Authenticate` value
    #[error("Unauthorized")]
    Unauthorized { challenge: String },

    #[error("{0}")]
    NotFound(String),

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("Requested range not satisfiable")]
    RangeNotSatisfiable { size: u64 },

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Metrics label
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Unauthorized { .. } => "unauthorized",
            ApiError::NotFound(_) => "not_found",
            ApiError::MethodNotAllowed => "method_not_allowed",
            ApiError::PayloadTooLarge { .. } => "payload_too_large",
            ApiError::RangeNotSatisfiable { .. } => "range_not_satisfiable",
            ApiError::Internal(_) => "internal",
        }
    }

    pub fn into_response(self) -> Response<Full<Bytes>> {
        match self {
            ApiError::RangeNotSatisfiable { size } => {
                let mut response = Response::new(Full::new(Bytes::new()));
                *response.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
                let headers = response.headers_mut();
                headers.insert(CONTENT_LENGTH, HeaderValue::from(0u64));
                if let Ok(value) = HeaderValue::from_str(&unsatisfiable_content_range(size)) {
                    headers.insert(CONTENT_RANGE, value);
                }
                response
            }
            ApiError::Unauthorized { ref challenge } => {
                let mut response = json_response(
                    StatusCode::UNAUTHORIZED,
                    &serde_json::json!({ "error": "Unauthorized" }),
                );
                if let Ok(value) = HeaderValue::from_str(challenge) {
                    response.headers_mut().insert(WWW_AUTHENTICATE, value);
                }
                response
            }
            other => json_response(
                other.status(),
                &serde_json::json!({ "error": other.to_string() }),
            ),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) => ApiError::NotFound("File not found".into()),
            err if err.is_client_fault() => ApiError::BadRequest(err.to_string()),
            err => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::Storage(storage) => storage.into(),
            err => ApiError::BadRequest(err.to_string()),
        }
    }
}

impl From<RouterError> for ApiError {
    fn from(err: RouterError) -> Self {
        match err {
            RouterError::NotFound(_) => ApiError::NotFound("Not found".into()),
            RouterError::MethodNotAllowed { .. } => ApiError::MethodNotAllowed,
            err => ApiError::BadRequest(err.to_string()),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        let challenge = match err {
            AuthError::MissingAuth => "Bearer",
            AuthError::TokenExpired => {
                "Bearer error=\"invalid_token\", error_description=\"Token expired\""
            }
            _ => "Bearer error=\"invalid_token\"",
        };
        ApiError::Unauthorized {
            challenge: challenge.to_string(),
        }
    }
}
