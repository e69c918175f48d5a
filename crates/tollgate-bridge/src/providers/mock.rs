//! Mock upstream provider
//!
//! For testing purposes - serves canned code exchanges and identities and
//! counts how often each code was redeemed.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{BridgeError, Result};
use crate::registry::UpstreamProvider;
use crate::types::{ProviderKind, UpstreamIdentity, UpstreamTokens};

/// Mock provider for tests
///
/// Codes registered with [`MockProvider::with_grant`] exchange to the given
/// tokens; any other code fails with `TokenExchange`. A code starting with
/// `TIMEOUT` fails with `Timeout`. Clones share grants and counters, so a
/// test can keep a handle after registering the provider.
#[derive(Clone)]
pub struct MockProvider {
    id: String,
    kind: ProviderKind,
    client_id: String,
    authorize_url: String,
    grants: Arc<Mutex<HashMap<String, UpstreamTokens>>>,
    identities: HashMap<String, UpstreamIdentity>,
    exchanges: Arc<AtomicUsize>,
}

impl MockProvider {
    pub fn new(id: impl Into<String>, kind: ProviderKind) -> Self {
        let id = id.into();
        Self {
            authorize_url: format!("https://{}.idp.test/oauth2/authorize", id),
            client_id: format!("{}-client", id),
            id,
            kind,
            grants: Arc::new(Mutex::new(HashMap::new())),
            identities: HashMap::new(),
            exchanges: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_authorize_url(mut self, url: impl Into<String>) -> Self {
        self.authorize_url = url.into();
        self
    }

    /// Make `code` redeemable once for `tokens`
    pub fn with_grant(self, code: impl Into<String>, tokens: UpstreamTokens) -> Self {
        self.add_grant(code, tokens);
        self
    }

    /// Make `code` redeemable once for `tokens` after construction
    pub fn add_grant(&self, code: impl Into<String>, tokens: UpstreamTokens) {
        if let Ok(mut grants) = self.grants.lock() {
            grants.insert(code.into(), tokens);
        }
    }

    /// Identity returned for an access token (direct providers)
    pub fn with_identity(mut self, access_token: impl Into<String>, identity: UpstreamIdentity) -> Self {
        self.identities.insert(access_token.into(), identity);
        self
    }

    /// Number of code exchanges attempted so far
    pub fn exchange_count(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpstreamProvider for MockProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn description(&self) -> &str {
        "mock provider"
    }

    fn authorization_url(&self, state: &str) -> Result<String> {
        let mut url = url::Url::parse(&self.authorize_url)?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("response_type", "code")
            .append_pair("state", state);
        Ok(url.into())
    }

    async fn exchange_code(&self, code: &str) -> Result<UpstreamTokens> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);

        if code.starts_with("TIMEOUT") {
            return Err(BridgeError::Timeout);
        }

        let mut grants = self
            .grants
            .lock()
            .map_err(|_| BridgeError::TokenExchange("mock state poisoned".into()))?;
        grants
            .remove(code)
            .ok_or_else(|| BridgeError::TokenExchange("invalid code".into()))
    }

    async fn fetch_identity(&self, tokens: &UpstreamTokens) -> Result<UpstreamIdentity> {
        if self.kind == ProviderKind::Federated {
            return Err(BridgeError::Unsupported(format!(
                "provider '{}' does not expose an identity endpoint",
                self.id
            )));
        }
        self.identities
            .get(&tokens.access_token)
            .cloned()
            .ok_or_else(|| BridgeError::Identity("unknown access token".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_grant_redeemable_once() {
        let provider = MockProvider::new("google", ProviderKind::Direct)
            .with_grant("code-1", UpstreamTokens::new("at-1"));

        let tokens = provider.exchange_code("code-1").await.unwrap();
        assert_eq!(tokens.access_token, "at-1");
        assert!(provider.exchange_code("code-1").await.is_err());
        assert_eq!(provider.exchange_count(), 2);
    }

    #[tokio::test]
    async fn test_identity_lookup() {
        let provider = MockProvider::new("google", ProviderKind::Direct)
            .with_identity("at-1", UpstreamIdentity::new("g-1", "alice@example.com"));

        let identity = provider.fetch_identity(&UpstreamTokens::new("at-1")).await.unwrap();
        assert_eq!(identity.username, "alice@example.com");
        assert!(provider.fetch_identity(&UpstreamTokens::new("other")).await.is_err());
    }

    #[tokio::test]
    async fn test_timeout_code() {
        let provider = MockProvider::new("fence", ProviderKind::Federated);
        assert!(matches!(
            provider.exchange_code("TIMEOUT-1").await,
            Err(BridgeError::Timeout)
        ));
    }

    #[tokio::test]
    async fn test_clones_share_grants() {
        let provider = MockProvider::new("fence", ProviderKind::Federated);
        let handle = provider.clone();

        handle.add_grant("code-1", UpstreamTokens::new("at-1"));
        assert!(provider.exchange_code("code-1").await.is_ok());
        assert_eq!(handle.exchange_count(), 1);
    }
}
