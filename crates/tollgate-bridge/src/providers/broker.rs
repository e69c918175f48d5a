//! Upstream broker provider
//!
//! Federates login to another broker (the second hop of a multi-tenant
//! flow). The upstream returns an ID token signed with its own keys; the
//! downstream broker validates it before trusting the identity.

use async_trait::async_trait;
use tracing::{debug, warn};
use url::Url;

use tollgate_core::config::FenceClientConfig;

use crate::error::{BridgeError, Result};
use crate::registry::UpstreamProvider;
use crate::types::{ProviderKind, UpstreamTokens};

/// Provider backed by another broker's OAuth2 endpoints
pub struct FederatedBrokerProvider {
    id: String,
    config: FenceClientConfig,
    http_client: reqwest::Client,
}

impl FederatedBrokerProvider {
    pub fn new(id: impl Into<String>, config: FenceClientConfig, http_client: reqwest::Client) -> Self {
        Self {
            id: id.into(),
            config,
            http_client,
        }
    }
}

#[async_trait]
impl UpstreamProvider for FederatedBrokerProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Federated
    }

    fn client_id(&self) -> &str {
        &self.config.client_id
    }

    fn description(&self) -> &str {
        "upstream broker"
    }

    fn authorization_url(&self, state: &str) -> Result<String> {
        let mut url = Url::parse(&self.config.authorize_url)?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.client_kwargs.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &self.config.client_kwargs.scope)
            .append_pair("state", state);
        Ok(url.into())
    }

    async fn exchange_code(&self, code: &str) -> Result<UpstreamTokens> {
        debug!(provider = %self.id, url = %self.config.access_token_url, "Exchanging upstream code");

        let response = self
            .http_client
            .post(&self.config.access_token_url)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.config.client_kwargs.redirect_uri.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(provider = %self.id, status = %status, body = %body, "Upstream rejected code exchange");
            return Err(BridgeError::TokenExchange(format!(
                "upstream returned status {}",
                status.as_u16()
            )));
        }

        let tokens: UpstreamTokens = response
            .json()
            .await
            .map_err(|e| BridgeError::TokenExchange(e.to_string()))?;

        if tokens.id_token.is_none() {
            return Err(BridgeError::TokenExchange(
                "upstream response carried no id_token".into(),
            ));
        }

        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_core::config::ClientKwargs;

    fn provider() -> FederatedBrokerProvider {
        FederatedBrokerProvider::new(
            "fence",
            FenceClientConfig {
                api_base_url: "https://upstream.example/user".into(),
                client_id: "downstream".into(),
                client_secret: "secret".into(),
                client_kwargs: ClientKwargs {
                    redirect_uri: "https://client.example/user/login/fence/login".into(),
                    scope: "openid user".into(),
                },
                authorize_url: "https://upstream.example/user/oauth2/authorize".into(),
                access_token_url: "https://upstream.example/user/oauth2/token".into(),
                jwks_url: "https://upstream.example/user/jwt/keys".into(),
            },
            reqwest::Client::new(),
        )
    }

    #[test]
    fn test_authorization_url_carries_state() {
        let url = Url::parse(&provider().authorization_url("opaque-state").unwrap()).unwrap();

        assert_eq!(url.path(), "/user/oauth2/authorize");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("state".into(), "opaque-state".into())));
        assert!(pairs.contains(&("client_id".into(), "downstream".into())));
        assert!(pairs.contains(&("response_type".into(), "code".into())));
        assert!(pairs.contains(&(
            "redirect_uri".into(),
            "https://client.example/user/login/fence/login".into()
        )));
    }
}
