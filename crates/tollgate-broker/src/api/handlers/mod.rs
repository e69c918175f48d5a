//! API request handlers

pub mod keys;
pub mod login;
pub mod oauth2;
pub mod session;

pub use keys::{jwt_keys, KeysResponse};
pub use login::{login, login_callback, CallbackQuery, LoginQuery};
pub use oauth2::{authorize_get, authorize_post, revoke, token, RevokeRequest, TokenRequest};
pub use session::{current_user, logout, LinkedAccount, LogoutQuery, UserInfoResponse};

use axum::{
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::STANDARD, Engine};
use std::sync::Arc;

use tollgate_bridge::ProviderRegistry;
use tollgate_core::BrokerConfig;

use crate::core::{AuthorizationFlowCoordinator, Blacklist, FlowError, TokenIssuer, TokenValidator};
use crate::keys::KeyRegistry;
use crate::storage::BrokerStore;

use super::error::ApiError;

pub const SESSION_COOKIE: &str = "session";

/// Application state shared by all handlers
pub struct AppState {
    pub config: Arc<BrokerConfig>,
    pub registry: Arc<KeyRegistry>,
    pub store: Arc<dyn BrokerStore>,
    pub validator: Arc<TokenValidator>,
    pub coordinator: AuthorizationFlowCoordinator,
}

impl AppState {
    /// Wire the trust engine together
    pub fn new(
        config: Arc<BrokerConfig>,
        registry: Arc<KeyRegistry>,
        store: Arc<dyn BrokerStore>,
        providers: Arc<ProviderRegistry>,
    ) -> Self {
        let validator = Arc::new(TokenValidator::new(registry.clone(), Blacklist::new(store.clone())));
        let issuer = TokenIssuer::new(registry.clone(), config.clone());
        let coordinator =
            AuthorizationFlowCoordinator::new(config.clone(), store.clone(), providers, validator.clone(), issuer);

        Self {
            config,
            registry,
            store,
            validator,
            coordinator,
        }
    }
}

/// 302 redirect to `location`
pub(crate) fn found(location: String) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

/// Client credentials from HTTP Basic, falling back to form fields
pub(crate) fn client_credentials(
    headers: &HeaderMap,
    form_id: Option<&str>,
    form_secret: Option<&str>,
) -> Result<(String, String), ApiError> {
    if let Some(value) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        if let Some(encoded) = value.strip_prefix("Basic ") {
            let decoded = STANDARD.decode(encoded.trim())?;
            let decoded = String::from_utf8(decoded)
                .map_err(|_| FlowError::InvalidClient("credentials are not UTF-8".into()))?;
            let (id, secret) = decoded
                .split_once(':')
                .ok_or_else(|| FlowError::InvalidClient("malformed basic credentials".into()))?;
            return Ok((id.to_string(), secret.to_string()));
        }
    }

    match (form_id, form_secret) {
        (Some(id), Some(secret)) => Ok((id.to_string(), secret.to_string())),
        _ => Err(FlowError::InvalidClient("missing client credentials".into()).into()),
    }
}

/// The token from an `Authorization: Bearer` header
pub(crate) fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".into()))
}

/// `Set-Cookie` value for the browser session
pub(crate) fn session_cookie(config: &BrokerConfig, session_id: &str, max_age: i64) -> String {
    let secure = if config.session_cookie_secure { "; Secure" } else { "" };
    format!(
        "{}={}; HttpOnly; Path=/; SameSite=Lax; Max-Age={}{}",
        SESSION_COOKIE, session_id, max_age, secure
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_basic_credentials_preferred() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Basic Y2xpZW50OnNlY3JldA=="),
        );

        let (id, secret) = client_credentials(&headers, Some("other"), Some("x")).unwrap();
        assert_eq!((id.as_str(), secret.as_str()), ("client", "secret"));
    }

    #[test]
    fn test_form_credentials_fallback() {
        let (id, _) = client_credentials(&HeaderMap::new(), Some("client"), Some("secret")).unwrap();
        assert_eq!(id, "client");
        assert!(client_credentials(&HeaderMap::new(), Some("client"), None).is_err());
    }

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_err());
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers).unwrap(), "abc.def");
    }
}
