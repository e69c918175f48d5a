//! Google login
//!
//! Direct provider: the identity comes from Google's userinfo endpoint, so
//! the flow has a single upstream hop.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::warn;
use url::Url;

use tollgate_core::config::GoogleClientConfig;

use crate::error::{BridgeError, Result};
use crate::registry::UpstreamProvider;
use crate::types::{ProviderKind, UpstreamIdentity, UpstreamTokens};

#[derive(Debug, Deserialize)]
struct UserInfo {
    sub: String,
    email: Option<String>,
    #[serde(flatten)]
    extra: HashMap<String, serde_json::Value>,
}

pub struct GoogleProvider {
    config: GoogleClientConfig,
    http_client: reqwest::Client,
}

impl GoogleProvider {
    pub fn new(config: GoogleClientConfig, http_client: reqwest::Client) -> Self {
        Self { config, http_client }
    }
}

#[async_trait]
impl UpstreamProvider for GoogleProvider {
    fn id(&self) -> &str {
        "google"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Direct
    }

    fn client_id(&self) -> &str {
        &self.config.client_id
    }

    fn description(&self) -> &str {
        "Google OpenID Connect"
    }

    fn authorization_url(&self, state: &str) -> Result<String> {
        let mut url = Url::parse(&self.config.authorize_url)?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_url)
            .append_pair("response_type", "code")
            .append_pair("scope", &self.config.scope)
            .append_pair("state", state);
        Ok(url.into())
    }

    async fn exchange_code(&self, code: &str) -> Result<UpstreamTokens> {
        let response = self
            .http_client
            .post(&self.config.token_url)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.config.redirect_url.as_str()),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = %status, "Google rejected code exchange");
            return Err(BridgeError::TokenExchange(format!(
                "upstream returned status {}",
                status.as_u16()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| BridgeError::TokenExchange(e.to_string()))
    }

    async fn fetch_identity(&self, tokens: &UpstreamTokens) -> Result<UpstreamIdentity> {
        let response = self
            .http_client
            .get(&self.config.userinfo_url)
            .bearer_auth(&tokens.access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BridgeError::Identity(format!(
                "userinfo returned status {}",
                response.status().as_u16()
            )));
        }

        let info: UserInfo = response
            .json()
            .await
            .map_err(|e| BridgeError::Identity(e.to_string()))?;

        let username = info
            .email
            .ok_or_else(|| BridgeError::Identity("userinfo carried no email".into()))?;

        Ok(UpstreamIdentity {
            subject: info.sub,
            username,
            claims: info.extra,
        })
    }
}
