//! Upstream login endpoints

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::Response,
    Extension,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;

use crate::api::csrf::CsrfToken;
use crate::api::error::ApiError;

use super::{found, session_cookie, AppState};

/// Query of GET /login/{provider}
#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    #[serde(default)]
    pub state: Option<String>,
    /// Accepted for compatibility; the session's redirect URI wins
    #[serde(default)]
    pub redirect_uri: Option<String>,
}

/// GET /login/{provider}
pub async fn login(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    Query(query): Query<LoginQuery>,
) -> Result<Response, ApiError> {
    let session_state = query
        .state
        .ok_or_else(|| ApiError::BadRequest("missing state; start at /oauth2/authorize".into()))?;

    let upstream = state.coordinator.begin_login(&provider, &session_state).await?;
    Ok(found(upstream))
}

/// Query of the upstream callback
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    /// Set by the upstream when the user denied or the login failed
    #[serde(default)]
    pub error: Option<String>,
}

/// GET /login/{provider}/login
pub async fn login_callback(
    State(state): State<Arc<AppState>>,
    Extension(csrf): Extension<CsrfToken>,
    Path(provider): Path<String>,
    Query(query): Query<CallbackQuery>,
) -> Result<Response, ApiError> {
    if let Some(error) = query.error {
        warn!(provider = %provider, error = %error, "Upstream reported a login error");
        return Err(ApiError::BadRequest("upstream login failed".into()));
    }

    let (Some(code), Some(session_state)) = (query.code, query.state) else {
        return Err(ApiError::BadRequest("callback requires code and state".into()));
    };

    let outcome = state
        .coordinator
        .complete_login(&provider, &session_state, &code, Some(&csrf.0))
        .await?;

    let cookie = session_cookie(
        &state.config,
        &outcome.browser_session.session_id,
        state.config.session_timeout as i64,
    );

    let mut response = found(outcome.redirect);
    if let Ok(value) = cookie.parse() {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    Ok(response)
}
