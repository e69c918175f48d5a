//! Double-submit CSRF protection
//!
//! Every browser gets a `csrftoken` cookie. State-changing requests that are
//! not authenticated by an `Authorization` header must echo that cookie in
//! the `x-csrf-token` header and carry a `referer`.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::warn;

use crate::core::opaque_token;

use super::error::ApiError;
use super::handlers::AppState;

pub const CSRF_COOKIE: &str = "csrftoken";
pub const CSRF_HEADER: &str = "x-csrf-token";

/// The browser's CSRF token, available to handlers as an extension
#[derive(Debug, Clone)]
pub struct CsrfToken(pub String);

/// Why a request failed the CSRF check
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CsrfError {
    #[error("missing csrftoken cookie")]
    MissingCookie,

    #[error("missing x-csrf-token header")]
    MissingHeader,

    #[error("CSRF token mismatch")]
    Mismatch,

    #[error("missing referer header")]
    MissingReferer,
}

/// Read a cookie from the request headers
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

/// Whether the request authenticates itself with a bearer token or client credentials
fn has_authorization(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(|value| {
            let lower = value.to_ascii_lowercase();
            lower.starts_with("bearer ") || lower.starts_with("basic ")
        })
        .unwrap_or(false)
}

/// Check a request against the double-submit rule
pub fn check(method: &Method, headers: &HeaderMap) -> Result<(), CsrfError> {
    if matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS) || has_authorization(headers) {
        return Ok(());
    }

    let cookie = cookie_value(headers, CSRF_COOKIE).ok_or(CsrfError::MissingCookie)?;
    let presented = headers
        .get(CSRF_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or(CsrfError::MissingHeader)?;

    if !bool::from(cookie.as_bytes().ct_eq(presented.as_bytes())) {
        return Err(CsrfError::Mismatch);
    }
    if !headers.contains_key(header::REFERER) {
        return Err(CsrfError::MissingReferer);
    }
    Ok(())
}

/// Router middleware: rejects failing requests before the handler runs and
/// issues a CSRF cookie to browsers that have none.
pub async fn guard(State(state): State<Arc<AppState>>, mut request: Request, next: Next) -> Response {
    if state.config.enable_csrf_protection {
        if let Err(err) = check(request.method(), request.headers()) {
            warn!(method = %request.method(), path = %request.uri().path(), error = %err, "CSRF check failed");
            return ApiError::from(err).into_response();
        }
    }

    let existing = cookie_value(request.headers(), CSRF_COOKIE);
    let token = existing.clone().unwrap_or_else(opaque_token);
    request.extensions_mut().insert(CsrfToken(token.clone()));

    let mut response = next.run(request).await;

    if existing.is_none() {
        let secure = if state.config.session_cookie_secure { "; Secure" } else { "" };
        let cookie = format!("{}={}; Path=/; SameSite=Lax{}", CSRF_COOKIE, token, secure);
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }

    response
}
