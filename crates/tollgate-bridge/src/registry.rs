//! Provider registry - routes logins to upstream identity providers

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use tollgate_core::BrokerConfig;

use crate::error::{BridgeError, Result};
use crate::providers::{FederatedBrokerProvider, GoogleProvider};
use crate::types::{ProviderKind, UpstreamIdentity, UpstreamTokens};

/// Trait for upstream identity providers
///
/// A provider builds the URL the browser is sent to, and redeems the
/// authorization code the browser comes back with.
#[async_trait]
pub trait UpstreamProvider: Send + Sync {
    /// Provider id as used in `/login/<id>` routes
    fn id(&self) -> &str;

    /// Whether the provider is a direct IdP or another broker
    fn kind(&self) -> ProviderKind;

    /// Client id this broker is registered under at the provider
    fn client_id(&self) -> &str;

    /// URL of the provider's authorization endpoint carrying `state`
    fn authorization_url(&self, state: &str) -> Result<String>;

    /// Redeem an authorization code. Called at most once per code.
    async fn exchange_code(&self, code: &str) -> Result<UpstreamTokens>;

    /// Look up the user's identity with the tokens from [`exchange_code`].
    ///
    /// Federated providers return an ID token instead, which the broker
    /// validates itself.
    ///
    /// [`exchange_code`]: UpstreamProvider::exchange_code
    async fn fetch_identity(&self, _tokens: &UpstreamTokens) -> Result<UpstreamIdentity> {
        Err(BridgeError::Unsupported(format!(
            "provider '{}' does not expose an identity endpoint",
            self.id()
        )))
    }

    /// Get a description of this provider (for logging)
    fn description(&self) -> &str {
        "upstream provider"
    }
}

/// Registry of enabled upstream providers, keyed by provider id
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn UpstreamProvider>>,
}

impl ProviderRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    /// Build the providers that are both configured and enabled
    pub fn from_config(config: &BrokerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.upstream_timeout())
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        let mut registry = Self::new();
        let oidc = &config.openid_connect;

        if config.is_provider_enabled("google") {
            if oidc.google.client_id.is_empty() {
                warn!("Google login enabled but OPENID_CONNECT.google.client_id is empty");
            } else {
                registry.register(GoogleProvider::new(oidc.google.clone(), client.clone()));
            }
        }

        if config.is_provider_enabled("fence") {
            if oidc.fence.api_base_url.is_empty() {
                warn!("fence login enabled but OPENID_CONNECT.fence.api_base_url is empty");
            } else {
                registry.register(FederatedBrokerProvider::new(
                    "fence",
                    oidc.fence.clone(),
                    client.clone(),
                ));
            }
        }

        Ok(registry)
    }

    /// Register a provider under its id
    pub fn register<P: UpstreamProvider + 'static>(&mut self, provider: P) {
        info!(
            provider = provider.id(),
            kind = %provider.kind(),
            description = provider.description(),
            "Registered upstream provider"
        );
        self.providers.insert(provider.id().to_string(), Arc::new(provider));
    }

    /// Get a provider by id
    pub fn get(&self, id: &str) -> Result<Arc<dyn UpstreamProvider>> {
        self.providers.get(id).cloned().ok_or_else(|| {
            warn!(provider = %id, "No upstream provider registered");
            BridgeError::UnknownProvider(id.to_string())
        })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.providers.contains_key(id)
    }

    /// List registered provider ids
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating a ProviderRegistry with providers
pub struct ProviderRegistryBuilder {
    registry: ProviderRegistry,
}

impl ProviderRegistryBuilder {
    pub fn new() -> Self {
        Self {
            registry: ProviderRegistry::new(),
        }
    }

    pub fn with_provider<P: UpstreamProvider + 'static>(mut self, provider: P) -> Self {
        self.registry.register(provider);
        self
    }

    pub fn build(self) -> ProviderRegistry {
        self.registry
    }
}

impl Default for ProviderRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MockProvider;

    #[test]
    fn test_registration() {
        let registry = ProviderRegistryBuilder::new()
            .with_provider(MockProvider::new("fence", ProviderKind::Federated))
            .build();

        assert!(registry.contains("fence"));
        assert!(!registry.contains("google"));
        assert_eq!(registry.ids(), vec!["fence"]);
    }

    #[test]
    fn test_unknown_provider() {
        let registry = ProviderRegistry::new();
        assert!(matches!(
            registry.get("orcid"),
            Err(BridgeError::UnknownProvider(id)) if id == "orcid"
        ));
    }

    #[test]
    fn test_from_config_builds_enabled_providers() {
        let config = BrokerConfig::from_yaml_str(
            r#"
OIDC_ISSUER: "https://upstream.example/user"
ENABLED_IDENTITY_PROVIDERS:
  default: fence
  providers:
    fence:
      name: Upstream
    google:
      name: Google
OPENID_CONNECT:
  fence:
    api_base_url: "https://upstream.example/user"
    client_id: "downstream"
    client_secret: "secret"
"#,
        )
        .unwrap();

        let registry = ProviderRegistry::from_config(&config).unwrap();
        // google has no client id configured
        assert_eq!(registry.ids(), vec!["fence"]);
        assert_eq!(registry.get("fence").unwrap().kind(), ProviderKind::Federated);
    }

    #[tokio::test]
    async fn test_default_identity_lookup_unsupported() {
        let provider = MockProvider::new("fence", ProviderKind::Federated);
        let err = provider.fetch_identity(&UpstreamTokens::new("t")).await.unwrap_err();
        assert!(matches!(err, BridgeError::Unsupported(_)));
    }
}
