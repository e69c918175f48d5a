//! API error types and responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::core::{FlowError, SessionStateError, TokenValidationError};
use crate::keys::KeyResolutionError;
use crate::storage::StorageError;

use super::csrf::CsrfError;

/// API error type
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("CSRF check failed: {0}")]
    Csrf(#[from] CsrfError),

    #[error(transparent)]
    Flow(#[from] FlowError),
}

/// API error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

const INTERNAL_MESSAGE: &str = "Internal server error";
const UPSTREAM_MESSAGE: &str = "Upstream identity provider error";

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "BAD_REQUEST",
                msg.clone(),
                None,
            ),
            ApiError::Unauthorized(msg) => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                msg.clone(),
                None,
            ),
            ApiError::Csrf(err) => (
                StatusCode::FORBIDDEN,
                "CSRF_FAILED",
                err.to_string(),
                None,
            ),
            ApiError::Flow(err) => flow_error_parts(err),
        };

        let body = ErrorResponse {
            error: message,
            code: code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

fn flow_error_parts(err: &FlowError) -> (StatusCode, &'static str, String, Option<serde_json::Value>) {
    match err {
        FlowError::InvalidClient(_) => (
            StatusCode::UNAUTHORIZED,
            "INVALID_CLIENT",
            "Client authentication failed".to_string(),
            None,
        ),
        FlowError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST", msg.clone(), None),
        FlowError::UnsupportedResponseType(kind) => (
            StatusCode::BAD_REQUEST,
            "UNSUPPORTED_RESPONSE_TYPE",
            format!("response_type '{}' is not supported", kind),
            None,
        ),
        FlowError::InvalidScope(msg) => (StatusCode::BAD_REQUEST, "INVALID_SCOPE", msg.clone(), None),
        FlowError::InvalidGrant(msg) => (StatusCode::BAD_REQUEST, "INVALID_GRANT", msg.clone(), None),
        FlowError::UnknownProvider(id) => (
            StatusCode::NOT_FOUND,
            "UNKNOWN_PROVIDER",
            format!("Identity provider '{}' is not enabled", id),
            None,
        ),
        FlowError::Session(SessionStateError::UnknownCode) => (
            StatusCode::BAD_REQUEST,
            "INVALID_GRANT",
            SessionStateError::UnknownCode.to_string(),
            None,
        ),
        FlowError::Session(err) => (StatusCode::BAD_REQUEST, "INVALID_STATE", err.to_string(), None),
        FlowError::Token(err) => token_error_parts(err),
        FlowError::Upstream(err) => {
            warn!(error = %err, "Upstream identity provider failure");
            (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", UPSTREAM_MESSAGE.to_string(), None)
        }
        FlowError::Storage(err) => {
            error!(error = %err, "Storage failure");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                INTERNAL_MESSAGE.to_string(),
                None,
            )
        }
        FlowError::Signing(err) => {
            error!(error = %err, "Token signing failure");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                INTERNAL_MESSAGE.to_string(),
                None,
            )
        }
    }
}

fn token_error_parts(err: &TokenValidationError) -> (StatusCode, &'static str, String, Option<serde_json::Value>) {
    match err {
        TokenValidationError::Store(detail) => {
            error!(error = %detail, "Revocation check failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                INTERNAL_MESSAGE.to_string(),
                None,
            )
        }
        TokenValidationError::KeyResolution(KeyResolutionError::Fetch(detail)) => {
            warn!(error = %detail, "Issuer keys unavailable");
            (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", UPSTREAM_MESSAGE.to_string(), None)
        }
        TokenValidationError::PurposeMismatch { expected, actual } => (
            StatusCode::UNAUTHORIZED,
            err.code(),
            err.to_string(),
            Some(serde_json::json!({
                "expected_purpose": expected.as_str(),
                "actual_purpose": actual,
            })),
        ),
        _ => (StatusCode::UNAUTHORIZED, err.code(), err.to_string(), None),
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        ApiError::Flow(FlowError::Storage(err))
    }
}

impl From<TokenValidationError> for ApiError {
    fn from(err: TokenValidationError) -> Self {
        ApiError::Flow(FlowError::Token(err))
    }
}

impl From<base64::DecodeError> for ApiError {
    fn from(err: base64::DecodeError) -> Self {
        ApiError::Flow(FlowError::InvalidClient(format!("Invalid base64 encoding: {}", err)))
    }
}
