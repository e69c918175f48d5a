//! OAuth2 endpoints: authorize, token and revoke

use axum::{
    extract::{Form, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use crate::api::csrf::{cookie_value, CsrfToken};
use crate::api::error::ApiError;
use crate::core::{AuthorizeRequest, FlowError};

use super::{client_credentials, found, AppState, SESSION_COOKIE};

// =============================================================================
// Authorize
// =============================================================================

/// GET /oauth2/authorize
pub async fn authorize_get(
    State(state): State<Arc<AppState>>,
    Extension(csrf): Extension<CsrfToken>,
    headers: HeaderMap,
    Query(request): Query<AuthorizeRequest>,
) -> Result<Response, ApiError> {
    authorize(&state, &csrf, &headers, request).await
}

/// POST /oauth2/authorize
///
/// Used by a consent page to confirm an already logged-in browser.
pub async fn authorize_post(
    State(state): State<Arc<AppState>>,
    Extension(csrf): Extension<CsrfToken>,
    headers: HeaderMap,
    Form(request): Form<AuthorizeRequest>,
) -> Result<Response, ApiError> {
    authorize(&state, &csrf, &headers, request).await
}

async fn authorize(
    state: &AppState,
    csrf: &CsrfToken,
    headers: &HeaderMap,
    request: AuthorizeRequest,
) -> Result<Response, ApiError> {
    let browser = match cookie_value(headers, SESSION_COOKIE) {
        Some(session_id) => state.coordinator.browser_session(&session_id).await?,
        None => None,
    };

    let location = state
        .coordinator
        .authorize(&request, browser.as_ref(), Some(&csrf.0))
        .await?;
    Ok(found(location))
}

// =============================================================================
// Token
// =============================================================================

/// Form body of POST /oauth2/token
#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub grant_type: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
}

/// POST /oauth2/token
pub async fn token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(request): Form<TokenRequest>,
) -> Result<Response, ApiError> {
    let (client_id, client_secret) = client_credentials(
        &headers,
        request.client_id.as_deref(),
        request.client_secret.as_deref(),
    )?;

    let response = match request.grant_type.as_str() {
        "authorization_code" => {
            let code = request
                .code
                .as_deref()
                .ok_or_else(|| FlowError::InvalidRequest("missing code".into()))?;
            let redirect_uri = request
                .redirect_uri
                .as_deref()
                .ok_or_else(|| FlowError::InvalidRequest("missing redirect_uri".into()))?;
            state
                .coordinator
                .exchange_code(&client_id, &client_secret, code, redirect_uri)
                .await?
        }
        "refresh_token" => {
            let refresh_token = request
                .refresh_token
                .as_deref()
                .ok_or_else(|| FlowError::InvalidRequest("missing refresh_token".into()))?;
            state
                .coordinator
                .refresh(&client_id, &client_secret, refresh_token)
                .await?
        }
        other => {
            return Err(FlowError::InvalidRequest(format!("unsupported grant_type '{}'", other)).into());
        }
    };

    Ok(Json(response).into_response())
}

// =============================================================================
// Revoke
// =============================================================================

/// Form body of POST /oauth2/revoke
#[derive(Debug, Deserialize)]
pub struct RevokeRequest {
    pub token: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
}

/// POST /oauth2/revoke
pub async fn revoke(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(request): Form<RevokeRequest>,
) -> Result<StatusCode, ApiError> {
    let (client_id, client_secret) = client_credentials(
        &headers,
        request.client_id.as_deref(),
        request.client_secret.as_deref(),
    )?;

    state
        .coordinator
        .revoke(&client_id, &client_secret, &request.token)
        .await?;

    info!(client_id = %client_id, "Token revocation accepted");
    Ok(StatusCode::OK)
}
