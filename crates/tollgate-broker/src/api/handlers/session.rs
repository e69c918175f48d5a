//! Browser session endpoints

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap},
    response::Response,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use tollgate_core::Purpose;

use crate::api::csrf::cookie_value;
use crate::api::error::ApiError;

use super::{bearer_token, found, session_cookie, AppState, SESSION_COOKIE};

/// Query of GET /logout
#[derive(Debug, Deserialize)]
pub struct LogoutQuery {
    #[serde(default)]
    pub next: Option<String>,
}

/// GET /logout
pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<LogoutQuery>,
) -> Result<Response, ApiError> {
    let session_id = cookie_value(&headers, SESSION_COOKIE);
    let target = state
        .coordinator
        .logout(session_id.as_deref(), query.next.as_deref())
        .await?;

    let mut response = found(target);
    if let Ok(value) = session_cookie(&state.config, "", 0).parse() {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    Ok(response)
}

/// An external account linked to the user
#[derive(Debug, Serialize)]
pub struct LinkedAccount {
    pub provider: String,
    pub account_id: String,
    pub expires_at: i64,
}

/// Response of GET /user
#[derive(Debug, Serialize)]
pub struct UserInfoResponse {
    pub user_id: String,
    pub username: String,
    pub provider: String,
    pub scope: Vec<String>,
    pub linked_accounts: Vec<LinkedAccount>,
}

/// GET /user
///
/// Describes the user behind a bearer access token.
pub async fn current_user(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<UserInfoResponse>, ApiError> {
    let token = bearer_token(&headers)?;
    let claims = state.validator.validate(token, None, Some(Purpose::Access)).await?;

    let user_id = Uuid::parse_str(&claims.sub)
        .map_err(|_| ApiError::Unauthorized("token subject is not a local user".into()))?;
    let user = state
        .store
        .get_user(user_id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("user no longer exists".into()))?;

    let linked_accounts = state
        .store
        .linked_identities(user.id)
        .await?
        .into_iter()
        .map(|link| LinkedAccount {
            provider: link.provider,
            account_id: link.account_id,
            expires_at: link.expires_at.timestamp(),
        })
        .collect();

    Ok(Json(UserInfoResponse {
        user_id: user.id.to_string(),
        username: user.username,
        provider: user.provider,
        scope: claims.scope,
        linked_accounts,
    }))
}
