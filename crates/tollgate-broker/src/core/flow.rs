//! Authorization-code federation
//!
//! A login moves through these states:
//!
//! ```text
//! INITIATED -> REDIRECTED_TO_UPSTREAM -> UPSTREAM_CALLBACK_RECEIVED -> CODE_EXCHANGED -> TOKENS_ISSUED
//!     \______________________________________/^
//! ```
//!
//! Direct providers (and browsers that are already logged in) go straight
//! from `INITIATED` to `UPSTREAM_CALLBACK_RECEIVED`. Federated providers are
//! other brokers: their ID token is validated like any other token before the
//! identity is accepted.
//!
//! Sessions and authorization codes are consumed atomically, so a replayed
//! state or code fails.

use chrono::{DateTime, Duration, Utc};
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use tollgate_bridge::{BridgeError, ProviderKind, ProviderRegistry};
use tollgate_core::{BrokerConfig, CoreError, Purpose};

use super::issuer::TokenIssuer;
use super::linkage::build_user_context;
use super::validation::{TokenValidationError, TokenValidator};
use crate::storage::{AuthorizationGrant, AuthorizationSession, BrokerStore, BrowserSession, OAuthClient, StorageError};

// =============================================================================
// Flow state
// =============================================================================

/// Where an authorization flow currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowState {
    Initiated,
    RedirectedToUpstream,
    UpstreamCallbackReceived,
    CodeExchanged,
    TokensIssued,
}

impl FlowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowState::Initiated => "INITIATED",
            FlowState::RedirectedToUpstream => "REDIRECTED_TO_UPSTREAM",
            FlowState::UpstreamCallbackReceived => "UPSTREAM_CALLBACK_RECEIVED",
            FlowState::CodeExchanged => "CODE_EXCHANGED",
            FlowState::TokensIssued => "TOKENS_ISSUED",
        }
    }

    /// Move to `next`, if that edge exists
    pub fn transition(self, next: FlowState) -> Result<FlowState, SessionStateError> {
        use FlowState::*;

        let legal = matches!(
            (self, next),
            (Initiated, RedirectedToUpstream)
                | (Initiated, UpstreamCallbackReceived)
                | (RedirectedToUpstream, UpstreamCallbackReceived)
                | (UpstreamCallbackReceived, CodeExchanged)
                | (CodeExchanged, TokensIssued)
        );

        if legal {
            Ok(next)
        } else {
            Err(SessionStateError::IllegalTransition { from: self, to: next })
        }
    }
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlowState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INITIATED" => Ok(FlowState::Initiated),
            "REDIRECTED_TO_UPSTREAM" => Ok(FlowState::RedirectedToUpstream),
            "UPSTREAM_CALLBACK_RECEIVED" => Ok(FlowState::UpstreamCallbackReceived),
            "CODE_EXCHANGED" => Ok(FlowState::CodeExchanged),
            "TOKENS_ISSUED" => Ok(FlowState::TokensIssued),
            other => Err(format!("unknown flow state: {}", other)),
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Session and code lifecycle failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionStateError {
    #[error("Unknown or already used state")]
    UnknownState,

    #[error("Unknown or already used authorization code")]
    UnknownCode,

    #[error("Authorization session expired")]
    Expired,

    #[error("Session was started for provider '{expected}', not '{actual}'")]
    ProviderMismatch { expected: String, actual: String },

    #[error("Session is bound to a different browser")]
    CsrfMismatch,

    #[error("Illegal flow transition {from} -> {to}")]
    IllegalTransition { from: FlowState, to: FlowState },
}

/// Anything that stops an authorization flow
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Invalid client: {0}")]
    InvalidClient(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unsupported response type: {0}")]
    UnsupportedResponseType(String),

    #[error("Invalid scope: {0}")]
    InvalidScope(String),

    #[error("Invalid grant: {0}")]
    InvalidGrant(String),

    #[error("Unknown identity provider: {0}")]
    UnknownProvider(String),

    #[error(transparent)]
    Session(#[from] SessionStateError),

    #[error(transparent)]
    Token(#[from] TokenValidationError),

    #[error("Upstream authentication failed: {0}")]
    Upstream(#[from] BridgeError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Token signing failed: {0}")]
    Signing(#[from] CoreError),
}

pub type FlowResult<T> = std::result::Result<T, FlowError>;

// =============================================================================
// Requests and responses
// =============================================================================

/// Parameters of `/oauth2/authorize`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorizeRequest {
    pub client_id: String,
    pub redirect_uri: String,
    #[serde(default)]
    pub response_type: String,
    /// Space-separated scopes
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub state: Option<String>,
    /// Upstream provider; the configured default when absent
    #[serde(default)]
    pub idp: Option<String>,
    /// `yes` lets an already logged-in browser skip the upstream hop
    #[serde(default)]
    pub confirm: Option<String>,
}

impl AuthorizeRequest {
    pub fn scopes(&self) -> Vec<String> {
        self.scope.split_whitespace().map(String::from).collect()
    }
}

/// Result of a completed upstream login
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    /// Where to send the browser: the client's redirect URI with `code`
    pub redirect: String,
    /// The browser session to set as a cookie
    pub browser_session: BrowserSession,
}

/// Token endpoint response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub id_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub expires_in: u64,
}

// =============================================================================
// Coordinator
// =============================================================================

/// Drives the authorization-code grant across one or two hops
pub struct AuthorizationFlowCoordinator {
    config: Arc<BrokerConfig>,
    store: Arc<dyn BrokerStore>,
    providers: Arc<ProviderRegistry>,
    validator: Arc<TokenValidator>,
    issuer: TokenIssuer,
}

impl AuthorizationFlowCoordinator {
    pub fn new(
        config: Arc<BrokerConfig>,
        store: Arc<dyn BrokerStore>,
        providers: Arc<ProviderRegistry>,
        validator: Arc<TokenValidator>,
        issuer: TokenIssuer,
    ) -> Self {
        Self {
            config,
            store,
            providers,
            validator,
            issuer,
        }
    }

    /// Handle an authorize request and return where to redirect the browser.
    ///
    /// `csrf_token` is the browser's CSRF cookie; the session is bound to it
    /// so the upstream callback must come from the same browser.
    pub async fn authorize(
        &self,
        request: &AuthorizeRequest,
        browser: Option<&BrowserSession>,
        csrf_token: Option<&str>,
    ) -> FlowResult<String> {
        let client = self
            .store
            .get_client(&request.client_id)
            .await?
            .ok_or_else(|| {
                warn!(client_id = %request.client_id, "Authorize request from unknown client");
                FlowError::InvalidClient(request.client_id.clone())
            })?;

        if !client.redirect_uris.iter().any(|uri| uri == &request.redirect_uri) {
            warn!(
                client_id = %client.client_id,
                redirect_uri = %request.redirect_uri,
                "Redirect URI not registered for client"
            );
            return Err(FlowError::InvalidRequest("redirect_uri not registered".into()));
        }

        if request.response_type != "code" {
            return Err(FlowError::UnsupportedResponseType(request.response_type.clone()));
        }

        let scope = request.scopes();
        if !scope.iter().any(|s| s == "openid") {
            return Err(FlowError::InvalidScope("scope must include openid".into()));
        }
        if let Some(denied) = scope.iter().find(|s| !client.allowed_scopes.contains(s)) {
            return Err(FlowError::InvalidScope(format!("scope '{}' not allowed", denied)));
        }

        let provider = request
            .idp
            .clone()
            .unwrap_or_else(|| self.config.default_provider().to_string());
        if !self.providers.contains(&provider) {
            return Err(FlowError::UnknownProvider(provider));
        }

        if let (Some(browser), Some("yes")) = (browser, request.confirm.as_deref()) {
            if browser.expires_at > Utc::now() {
                info!(
                    client_id = %client.client_id,
                    user_id = %browser.user_id,
                    "Authorize confirmed by logged-in browser"
                );
                let flow_state = FlowState::Initiated.transition(FlowState::UpstreamCallbackReceived)?;
                let code = self
                    .store_grant(&client, &request.redirect_uri, scope, browser, flow_state)
                    .await?;
                return client_redirect(&request.redirect_uri, &code, request.state.as_deref());
            }
        }

        let session = AuthorizationSession {
            state_token: opaque_token(),
            csrf_token: csrf_token.map(String::from),
            client_id: client.client_id.clone(),
            redirect_uri: request.redirect_uri.clone(),
            requested_scope: scope,
            client_state: request.state.clone(),
            provider: provider.clone(),
            flow_state: FlowState::Initiated,
            hop_metadata: serde_json::Value::Null,
            created_at: Utc::now(),
        };

        let mut login = Url::parse(&format!("{}/login/{}", self.config.base_url, provider))
            .map_err(|e| FlowError::InvalidRequest(e.to_string()))?;
        login.query_pairs_mut().append_pair("state", &session.state_token);

        info!(client_id = %client.client_id, provider = %provider, "Authorization session created");
        self.store.put_session(session).await?;

        Ok(login.to_string())
    }

    /// Start the upstream hop for a session; returns the upstream authorize URL
    pub async fn begin_login(&self, provider_id: &str, state: &str) -> FlowResult<String> {
        let mut session = self
            .store
            .get_session(state)
            .await?
            .ok_or(SessionStateError::UnknownState)?;

        if self.session_expired(&session, Utc::now()) {
            self.store.take_session(state).await?;
            return Err(SessionStateError::Expired.into());
        }
        check_provider(&session, provider_id)?;

        let provider = self
            .providers
            .get(provider_id)
            .map_err(|_| FlowError::UnknownProvider(provider_id.to_string()))?;
        let upstream_url = provider.authorization_url(state)?;

        if provider.kind() == ProviderKind::Federated && session.flow_state == FlowState::Initiated {
            session.flow_state = session.flow_state.transition(FlowState::RedirectedToUpstream)?;
        }
        session.hop_metadata = json!({
            "provider_kind": provider.kind().to_string(),
            "upstream_client_id": provider.client_id(),
            "redirected_at": Utc::now().timestamp(),
        });
        self.store.put_session(session).await?;

        info!(provider = %provider_id, kind = %provider.kind(), "Redirecting to upstream provider");
        Ok(upstream_url)
    }

    /// Handle the upstream callback: redeem the upstream code, establish the
    /// identity and hand the client an authorization code.
    pub async fn complete_login(
        &self,
        provider_id: &str,
        state: &str,
        code: &str,
        csrf_token: Option<&str>,
    ) -> FlowResult<LoginOutcome> {
        let session = self.store.take_session(state).await?.ok_or_else(|| {
            warn!(provider = %provider_id, "Callback with unknown or replayed state");
            SessionStateError::UnknownState
        })?;

        if self.session_expired(&session, Utc::now()) {
            warn!(client_id = %session.client_id, "Callback for expired authorization session");
            return Err(SessionStateError::Expired.into());
        }
        check_provider(&session, provider_id)?;
        check_csrf_binding(&session, csrf_token)?;

        let provider = self
            .providers
            .get(provider_id)
            .map_err(|_| FlowError::UnknownProvider(provider_id.to_string()))?;

        let tokens = provider.exchange_code(code).await.map_err(|e| {
            warn!(provider = %provider_id, error = %e, "Upstream code exchange failed");
            e
        })?;

        let username = match provider.kind() {
            ProviderKind::Federated => {
                let id_token = tokens
                    .id_token
                    .as_deref()
                    .ok_or_else(|| BridgeError::Identity("upstream returned no id_token".into()))?;
                let claims = self
                    .validator
                    .validate(id_token, Some(&[provider.client_id()][..]), Some(Purpose::Id))
                    .await?;
                claims.username().unwrap_or(&claims.sub).to_string()
            }
            ProviderKind::Direct => provider.fetch_identity(&tokens).await?.username,
        };

        let flow_state = session.flow_state.transition(FlowState::UpstreamCallbackReceived)?;
        let user = self.store.upsert_user(&username, provider_id).await?;

        let browser_session = BrowserSession {
            session_id: opaque_token(),
            user_id: user.id,
            username: user.username.clone(),
            provider: provider_id.to_string(),
            expires_at: Utc::now() + Duration::seconds(self.config.session_timeout as i64),
        };
        self.store.put_browser_session(browser_session.clone()).await?;

        let client = self
            .store
            .get_client(&session.client_id)
            .await?
            .ok_or_else(|| FlowError::InvalidClient(session.client_id.clone()))?;
        let code = self
            .store_grant(
                &client,
                &session.redirect_uri,
                session.requested_scope.clone(),
                &browser_session,
                flow_state,
            )
            .await?;

        info!(
            provider = %provider_id,
            user_id = %user.id,
            client_id = %client.client_id,
            "Upstream login completed"
        );

        Ok(LoginOutcome {
            redirect: client_redirect(&session.redirect_uri, &code, session.client_state.as_deref())?,
            browser_session,
        })
    }

    /// Redeem an authorization code for tokens
    pub async fn exchange_code(
        &self,
        client_id: &str,
        client_secret: &str,
        code: &str,
        redirect_uri: &str,
    ) -> FlowResult<TokenResponse> {
        let client = self.authenticate_client(client_id, client_secret).await?;

        let grant = self.store.take_grant(code).await?.ok_or_else(|| {
            warn!(client_id = %client_id, "Unknown or replayed authorization code");
            SessionStateError::UnknownCode
        })?;

        if grant.client_id != client.client_id {
            warn!(client_id = %client_id, grant_client = %grant.client_id, "Code presented by wrong client");
            return Err(FlowError::InvalidGrant("code was issued to another client".into()));
        }
        if grant.redirect_uri != redirect_uri {
            return Err(FlowError::InvalidGrant("redirect_uri does not match".into()));
        }
        let now = Utc::now();
        if now - grant.created_at > Duration::seconds(self.config.authorization_session_timeout as i64) {
            return Err(FlowError::InvalidGrant("authorization code expired".into()));
        }

        let flow_state = grant.flow_state.transition(FlowState::CodeExchanged)?;

        let sub = grant.user_id.to_string();
        let links = self.store.linked_identities(grant.user_id).await?;
        let context = build_user_context(&grant.username, &links, now);

        let access = self.issuer.access_token(&sub, &grant.username, client_id, &grant.scope)?;
        let id = self.issuer.id_token(&sub, client_id, context)?;
        let refresh = self.issuer.refresh_token(&sub, &grant.username, client_id, &grant.scope)?;

        let flow_state = flow_state.transition(FlowState::TokensIssued)?;
        info!(client_id = %client_id, user_id = %grant.user_id, state = %flow_state, "Authorization code redeemed");

        Ok(TokenResponse {
            access_token: access.token,
            id_token: id.token,
            refresh_token: Some(refresh.token),
            token_type: "Bearer".into(),
            expires_in: self.config.access_token_expires_in,
        })
    }

    /// Mint a new access and ID token from a refresh token
    pub async fn refresh(&self, client_id: &str, client_secret: &str, refresh_token: &str) -> FlowResult<TokenResponse> {
        let client = self.authenticate_client(client_id, client_secret).await?;
        let claims = self
            .validator
            .validate(refresh_token, None, Some(Purpose::Refresh))
            .await?;

        if claims.azp.as_deref() != Some(client.client_id.as_str()) {
            warn!(client_id = %client_id, jti = %claims.jti, "Refresh token presented by wrong client");
            return Err(FlowError::InvalidGrant("refresh token was issued to another client".into()));
        }

        let user_id = Uuid::parse_str(&claims.sub)
            .map_err(|_| FlowError::InvalidGrant("refresh token subject is not a local user".into()))?;
        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| FlowError::InvalidGrant("user no longer exists".into()))?;

        let links = self.store.linked_identities(user.id).await?;
        let context = build_user_context(&user.username, &links, Utc::now());

        let access = self.issuer.access_token(&claims.sub, &user.username, client_id, &claims.scope)?;
        let id = self.issuer.id_token(&claims.sub, client_id, context)?;

        info!(client_id = %client_id, user_id = %user.id, "Refreshed tokens");
        Ok(TokenResponse {
            access_token: access.token,
            id_token: id.token,
            refresh_token: None,
            token_type: "Bearer".into(),
            expires_in: self.config.access_token_expires_in,
        })
    }

    /// Revoke a refresh token or API key. Revoking twice succeeds.
    pub async fn revoke(&self, client_id: &str, client_secret: &str, token: &str) -> FlowResult<()> {
        self.authenticate_client(client_id, client_secret).await?;

        let claims = match self.validator.validate(token, None, None).await {
            Ok(claims) => claims,
            Err(TokenValidationError::Blacklisted) => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let purpose = claims
            .purpose()
            .filter(Purpose::is_revocable)
            .ok_or_else(|| FlowError::InvalidRequest(format!("tokens with purpose '{}' cannot be revoked", claims.pur)))?;

        if claims.azp.as_deref() != Some(client_id) {
            warn!(client_id = %client_id, jti = %claims.jti, "Revocation by client that does not own the token");
            return Err(FlowError::InvalidGrant("token was not issued to this client".into()));
        }

        self.validator
            .blacklist()
            .revoke(&claims.jti, purpose, claims.exp)
            .await?;
        Ok(())
    }

    /// Look up a live browser session
    pub async fn browser_session(&self, session_id: &str) -> FlowResult<Option<BrowserSession>> {
        let session = self.store.get_browser_session(session_id).await?;
        Ok(session.filter(|s| s.expires_at > Utc::now()))
    }

    /// End a browser session and return where to send the browser
    pub async fn logout(&self, session_id: Option<&str>, next: Option<&str>) -> FlowResult<String> {
        if let Some(session_id) = session_id {
            if self.store.delete_browser_session(session_id).await? {
                info!("Browser session ended");
            }
        }
        Ok(logout_target(&self.config, next))
    }

    async fn authenticate_client(&self, client_id: &str, client_secret: &str) -> FlowResult<OAuthClient> {
        let client = self.store.get_client(client_id).await?;
        match client {
            Some(client)
                if bool::from(client.client_secret.as_bytes().ct_eq(client_secret.as_bytes())) =>
            {
                Ok(client)
            }
            _ => {
                warn!(client_id = %client_id, "Client authentication failed");
                Err(FlowError::InvalidClient(client_id.to_string()))
            }
        }
    }

    async fn store_grant(
        &self,
        client: &OAuthClient,
        redirect_uri: &str,
        scope: Vec<String>,
        browser: &BrowserSession,
        flow_state: FlowState,
    ) -> FlowResult<String> {
        let grant = AuthorizationGrant {
            code: opaque_token(),
            client_id: client.client_id.clone(),
            redirect_uri: redirect_uri.to_string(),
            scope,
            user_id: browser.user_id,
            username: browser.username.clone(),
            provider: browser.provider.clone(),
            flow_state,
            created_at: Utc::now(),
        };
        let code = grant.code.clone();
        self.store.put_grant(grant).await?;
        Ok(code)
    }

    fn session_expired(&self, session: &AuthorizationSession, now: DateTime<Utc>) -> bool {
        now - session.created_at > Duration::seconds(self.config.authorization_session_timeout as i64)
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn check_provider(session: &AuthorizationSession, provider_id: &str) -> Result<(), SessionStateError> {
    if session.provider != provider_id {
        warn!(expected = %session.provider, actual = %provider_id, "Provider does not match session");
        return Err(SessionStateError::ProviderMismatch {
            expected: session.provider.clone(),
            actual: provider_id.to_string(),
        });
    }
    Ok(())
}

fn check_csrf_binding(session: &AuthorizationSession, csrf_token: Option<&str>) -> Result<(), SessionStateError> {
    let Some(bound) = session.csrf_token.as_deref() else {
        return Ok(());
    };
    match csrf_token {
        Some(presented) if bool::from(bound.as_bytes().ct_eq(presented.as_bytes())) => Ok(()),
        _ => {
            warn!(client_id = %session.client_id, "Callback from a browser that did not start the session");
            Err(SessionStateError::CsrfMismatch)
        }
    }
}

/// The client's redirect URI with `code` and the client's `state`
fn client_redirect(redirect_uri: &str, code: &str, state: Option<&str>) -> FlowResult<String> {
    let mut url = Url::parse(redirect_uri).map_err(|e| FlowError::InvalidRequest(e.to_string()))?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("code", code);
        if let Some(state) = state {
            query.append_pair("state", state);
        }
    }
    Ok(url.to_string())
}

/// Where to send the browser after logout.
///
/// Absolute `http(s)` targets are used as-is; anything else is a path under
/// `ROOT_URL`.
pub fn logout_target(config: &BrokerConfig, next: Option<&str>) -> String {
    match next.filter(|n| !n.is_empty()) {
        Some(next) if next.starts_with("http://") || next.starts_with("https://") => next.to_string(),
        Some(next) if next.starts_with('/') => format!("{}{}", config.root_url, next),
        Some(next) => format!("{}/{}", config.root_url, next),
        None if !config.logout_redirect_url.is_empty() => config.logout_redirect_url.clone(),
        None => config.base_url.clone(),
    }
}

/// Unguessable token for states, codes and session ids
pub fn opaque_token() -> String {
    OsRng.sample_iter(&Alphanumeric).take(43).map(char::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_paths() {
        let federated = FlowState::Initiated
            .transition(FlowState::RedirectedToUpstream)
            .and_then(|s| s.transition(FlowState::UpstreamCallbackReceived))
            .and_then(|s| s.transition(FlowState::CodeExchanged))
            .and_then(|s| s.transition(FlowState::TokensIssued));
        assert_eq!(federated, Ok(FlowState::TokensIssued));

        let direct = FlowState::Initiated.transition(FlowState::UpstreamCallbackReceived);
        assert_eq!(direct, Ok(FlowState::UpstreamCallbackReceived));
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(FlowState::Initiated.transition(FlowState::TokensIssued).is_err());
        assert!(FlowState::TokensIssued.transition(FlowState::CodeExchanged).is_err());
        assert!(FlowState::CodeExchanged.transition(FlowState::CodeExchanged).is_err());
        assert_eq!(
            FlowState::RedirectedToUpstream.transition(FlowState::Initiated),
            Err(SessionStateError::IllegalTransition {
                from: FlowState::RedirectedToUpstream,
                to: FlowState::Initiated,
            })
        );
    }

    #[test]
    fn test_flow_state_text_form() {
        for state in [
            FlowState::Initiated,
            FlowState::RedirectedToUpstream,
            FlowState::UpstreamCallbackReceived,
            FlowState::CodeExchanged,
            FlowState::TokensIssued,
        ] {
            assert_eq!(state.as_str().parse::<FlowState>(), Ok(state));
        }
        assert!("DONE".parse::<FlowState>().is_err());
    }

    #[test]
    fn test_client_redirect_keeps_existing_query() {
        let url = client_redirect("https://client.example/cb?x=1", "abc", Some("s t")).unwrap();
        assert_eq!(url, "https://client.example/cb?x=1&code=abc&state=s+t");

        let url = client_redirect("https://client.example/cb", "abc", None).unwrap();
        assert_eq!(url, "https://client.example/cb?code=abc");
    }

    #[test]
    fn test_logout_target() {
        let config = BrokerConfig::from_yaml_str(
            "BASE_URL: https://data.example/user\nLOGOUT_REDIRECT_URL: ''\n",
        )
        .unwrap();

        assert_eq!(logout_target(&config, None), "https://data.example/user");
        assert_eq!(logout_target(&config, Some("/portal")), "https://data.example/portal");
        assert_eq!(
            logout_target(&config, Some("https://elsewhere.example/bye")),
            "https://elsewhere.example/bye"
        );
    }

    #[test]
    fn test_opaque_tokens_are_unique() {
        let a = opaque_token();
        assert_eq!(a.len(), 43);
        assert_ne!(a, opaque_token());
    }
}
