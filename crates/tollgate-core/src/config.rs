//! Typed broker configuration
//!
//! The resolved configuration tree produced by [`crate::resolve`] is
//! deserialized into [`BrokerConfig`] once at startup. The result is meant to
//! be wrapped in an `Arc` and shared; nothing mutates it afterwards.

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::ConfigError;
use crate::resolve::{resolve, ResolveWarning};

/// The built-in default configuration document
pub const DEFAULT_CONFIG: &str = include_str!("../config-default.yaml");

/// Fully resolved broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct BrokerConfig {
    /// Public base URL; also this broker's token issuer
    pub base_url: String,

    /// Scheme and authority of `base_url`
    #[serde(default)]
    pub root_url: String,

    /// Issuer of a trusted upstream broker, empty when none
    #[serde(default)]
    pub oidc_issuer: String,

    pub enabled_identity_providers: EnabledProviders,

    pub openid_connect: OpenIdConnect,

    #[serde(default)]
    pub oauth_clients: BTreeMap<String, OAuthClientConfig>,

    pub default_login_url: String,

    #[serde(default)]
    pub logout_redirect_url: String,

    pub enable_csrf_protection: bool,

    pub session_cookie_secure: bool,

    pub session_timeout: u64,

    pub authorization_session_timeout: u64,

    pub access_token_expires_in: u64,

    pub refresh_token_expires_in: u64,

    pub id_token_expires_in: u64,

    pub upstream_timeout: u64,

    pub key_cache_ttl: u64,

    #[serde(default)]
    pub keys_dir: String,

    #[serde(default)]
    pub db: String,

    /// Open section for deployment-specific settings
    #[serde(default)]
    pub extensions: HashMap<String, Value>,
}

/// Identity providers users may log in with
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnabledProviders {
    pub default: String,
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderEntry {
    #[serde(default)]
    pub name: String,
}

/// Client settings for the upstream providers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenIdConnect {
    pub google: GoogleClientConfig,
    pub fence: FenceClientConfig,
}

/// Google, a direct (single-hop) provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleClientConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
    pub authorize_url: String,
    pub token_url: String,
    pub userinfo_url: String,
    pub scope: String,
}

/// Another broker acting as the upstream identity provider (two-hop flow)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FenceClientConfig {
    pub api_base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub client_kwargs: ClientKwargs,
    pub authorize_url: String,
    pub access_token_url: String,
    pub jwks_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientKwargs {
    pub redirect_uri: String,
    pub scope: String,
}

/// A downstream OAuth client registered with this broker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthClientConfig {
    pub client_secret: String,
    pub redirect_uris: Vec<String>,
    #[serde(default = "default_client_scopes")]
    pub allowed_scopes: Vec<String>,
    #[serde(default)]
    pub name: Option<String>,
}

fn default_client_scopes() -> Vec<String> {
    vec!["openid".to_string(), "user".to_string()]
}

impl BrokerConfig {
    /// Load the configuration file at `path` over the built-in defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "Loading configuration");
        Self::from_yaml_str(&contents)
    }

    /// Resolve a provided YAML document over the built-in defaults
    pub fn from_yaml_str(provided: &str) -> Result<Self, ConfigError> {
        let default: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;
        let provided: Value = serde_yaml::from_str(provided)?;
        Self::from_trees(&default, &provided)
    }

    /// Resolve two configuration trees and build the typed configuration
    pub fn from_trees(default: &Value, provided: &Value) -> Result<Self, ConfigError> {
        let resolved = resolve(default, provided)?;
        for warning in &resolved.warnings {
            match warning {
                ResolveWarning::UnknownKey { path } => {
                    warn!(key = %path, "Ignoring unknown configuration key");
                }
                ResolveWarning::LiteralFallback { path, .. } => {
                    warn!(key = %path, "Configuration value kept as literal string");
                }
            }
        }

        let mut config: BrokerConfig = serde_yaml::from_value(resolved.tree)?;
        config.finish()?;
        Ok(config)
    }

    /// Normalise URLs, derive `ROOT_URL` and check cross-field constraints
    fn finish(&mut self) -> Result<(), ConfigError> {
        self.base_url = self.base_url.trim_end_matches('/').to_string();
        let base = url::Url::parse(&self.base_url)
            .map_err(|e| ConfigError::Invalid(format!("BASE_URL '{}': {}", self.base_url, e)))?;

        if self.root_url.is_empty() {
            self.root_url = base.origin().ascii_serialization();
        }
        self.oidc_issuer = self.oidc_issuer.trim_end_matches('/').to_string();

        let providers = &self.enabled_identity_providers;
        if !providers.providers.is_empty() && !providers.providers.contains_key(&providers.default) {
            return Err(ConfigError::Invalid(format!(
                "default identity provider '{}' is not enabled",
                providers.default
            )));
        }

        if providers.providers.contains_key("fence") && self.oidc_issuer.is_empty() {
            return Err(ConfigError::Invalid(
                "fence login is enabled but OIDC_ISSUER is not set".into(),
            ));
        }

        for (client_id, client) in &self.oauth_clients {
            if client.redirect_uris.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "client '{}' has no redirect_uris",
                    client_id
                )));
            }
        }

        Ok(())
    }

    /// Issuers whose tokens this broker accepts: itself, then the upstream broker if any
    pub fn trusted_issuers(&self) -> Vec<String> {
        let mut issuers = vec![self.base_url.clone()];
        if let Some(remote) = self.remote_issuer() {
            issuers.push(remote.to_string());
        }
        issuers
    }

    /// The configured upstream issuer, if any
    pub fn remote_issuer(&self) -> Option<&str> {
        if self.oidc_issuer.is_empty() || self.oidc_issuer == self.base_url {
            None
        } else {
            Some(&self.oidc_issuer)
        }
    }

    /// Key endpoint of the upstream issuer
    pub fn remote_jwks_url(&self) -> Option<String> {
        let issuer = self.remote_issuer()?;
        let configured = &self.openid_connect.fence.jwks_url;
        if !self.openid_connect.fence.api_base_url.is_empty() && !configured.is_empty() {
            Some(configured.clone())
        } else {
            Some(format!("{}/jwt/keys", issuer))
        }
    }

    /// Whether a provider id may be used for login
    pub fn is_provider_enabled(&self, provider: &str) -> bool {
        self.enabled_identity_providers.providers.contains_key(provider)
    }

    pub fn default_provider(&self) -> &str {
        &self.enabled_identity_providers.default
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout)
    }

    pub fn key_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.key_cache_ttl)
    }
}
