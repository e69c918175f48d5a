//! Shared test harness: a client-side broker federating to a mocked upstream
//! broker (`fence`) and a mocked Google.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tollgate_bridge::providers::MockProvider;
use tollgate_bridge::{
    KeyMaterial, ProviderKind, ProviderRegistryBuilder, RemoteKey, RemoteKeySource, UpstreamIdentity, UpstreamTokens,
};
use tollgate_broker::core::{AuthorizeRequest, TokenResponse};
use tollgate_broker::{AppState, BrokerStore, KeyRegistry, MemoryStore, OAuthClient};
use tollgate_core::{BrokerConfig, Claims, ClaimsBuilder, KeyPair, Purpose};

pub const BROKER_ISSUER: &str = "https://client-broker.example/user";
pub const UPSTREAM_ISSUER: &str = "https://upstream.example/user";
pub const UPSTREAM_CLIENT_ID: &str = "client-broker";
pub const UPSTREAM_KID: &str = "upstream-key-1";
pub const CLIENT_ID: &str = "portal";
pub const CLIENT_SECRET: &str = "portal-secret";
pub const REDIRECT_URI: &str = "https://portal.example/callback";
/// Access token the Google mock resolves to `alice@gmail.com`
pub const GOOGLE_ACCESS_TOKEN: &str = "google-at";

const CONFIG: &str = r#"
BASE_URL: https://client-broker.example/user
OIDC_ISSUER: https://upstream.example/user
ENABLED_IDENTITY_PROVIDERS:
  default: fence
  providers:
    fence:
      name: Upstream broker
    google:
      name: Google
OAUTH_CLIENTS:
  portal:
    client_secret: portal-secret
    redirect_uris:
      - https://portal.example/callback
SESSION_COOKIE_SECURE: false
"#;

// =============================================================================
// Remote keys
// =============================================================================

/// Serves a fixed key set for the upstream issuer and counts fetches
pub struct StaticKeySource {
    keys: Vec<RemoteKey>,
    fetches: AtomicUsize,
    delay: Duration,
}

impl StaticKeySource {
    pub fn new(keys: &[&KeyPair]) -> Self {
        Self {
            keys: keys
                .iter()
                .map(|k| RemoteKey {
                    kid: k.kid().to_string(),
                    material: KeyMaterial::Pem(k.public_key_pem().to_string()),
                })
                .collect(),
            fetches: AtomicUsize::new(0),
            delay: Duration::from_millis(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteKeySource for StaticKeySource {
    async fn fetch_keys(&self, _issuer: &str) -> tollgate_bridge::Result<Vec<RemoteKey>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.keys.clone())
    }
}

// =============================================================================
// Harness
// =============================================================================

pub struct Harness {
    pub config: Arc<BrokerConfig>,
    pub state: Arc<AppState>,
    pub store: Arc<MemoryStore>,
    pub fence: MockProvider,
    pub google: MockProvider,
    pub upstream_key: KeyPair,
    pub key_source: Arc<StaticKeySource>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(CONFIG).await
    }

    pub async fn with_config(yaml: &str) -> Self {
        let config = Arc::new(BrokerConfig::from_yaml_str(yaml).expect("test config should resolve"));

        let upstream_key = KeyPair::generate(UPSTREAM_KID).unwrap();
        let key_source = Arc::new(StaticKeySource::new(&[&upstream_key]).with_delay(Duration::from_millis(20)));

        let registry = KeyRegistry::new(
            config.base_url.clone(),
            KeyPair::generate("broker-key-1").unwrap(),
            key_source.clone(),
        )
        .with_remote_issuer(UPSTREAM_ISSUER);

        let fence = MockProvider::new("fence", ProviderKind::Federated)
            .with_client_id(UPSTREAM_CLIENT_ID)
            .with_authorize_url(format!("{}/oauth2/authorize", UPSTREAM_ISSUER));
        let google = MockProvider::new("google", ProviderKind::Direct)
            .with_identity(GOOGLE_ACCESS_TOKEN, UpstreamIdentity::new("google-123", "alice@gmail.com"));
        let providers = ProviderRegistryBuilder::new()
            .with_provider(fence.clone())
            .with_provider(google.clone())
            .build();

        let store = Arc::new(MemoryStore::new());
        for (client_id, client) in &config.oauth_clients {
            store
                .upsert_client(OAuthClient::from_config(client_id, client))
                .await
                .unwrap();
        }

        let state = Arc::new(AppState::new(
            config.clone(),
            Arc::new(registry),
            store.clone(),
            Arc::new(providers),
        ));

        Self {
            config,
            state,
            store,
            fence,
            google,
            upstream_key,
            key_source,
        }
    }

    /// ID token the upstream broker would return for `username`
    pub fn upstream_id_token(&self, username: &str) -> String {
        let claims = ClaimsBuilder::new(UPSTREAM_ISSUER, "upstream-42", Purpose::Id)
            .audience([UPSTREAM_CLIENT_ID])
            .context(json!({"user": {"name": username}}))
            .build();
        self.upstream_key.sign(&claims).unwrap()
    }

    /// Make `code` redeemable once at the upstream broker
    pub fn upstream_code(&self, code: &str, username: &str) {
        self.fence.add_grant(
            code,
            UpstreamTokens::new(format!("upstream-at-{}", code)).with_id_token(self.upstream_id_token(username)),
        );
    }

    /// Run authorize, the upstream hop and the callback; returns the client redirect
    pub async fn login_via_fence(&self, username: &str, code: &str) -> String {
        let coordinator = &self.state.coordinator;

        let login = coordinator
            .authorize(&authorize_request(), None, Some("csrf-1"))
            .await
            .unwrap();
        let state = query_param(&login, "state").unwrap();
        coordinator.begin_login("fence", &state).await.unwrap();

        self.upstream_code(code, username);
        coordinator
            .complete_login("fence", &state, code, Some("csrf-1"))
            .await
            .unwrap()
            .redirect
    }

    /// Full login followed by the client's code exchange
    pub async fn tokens_for(&self, username: &str, upstream_code: &str) -> TokenResponse {
        let redirect = self.login_via_fence(username, upstream_code).await;
        let code = query_param(&redirect, "code").unwrap();
        self.state
            .coordinator
            .exchange_code(CLIENT_ID, CLIENT_SECRET, &code, REDIRECT_URI)
            .await
            .unwrap()
    }

    /// Validate an ID token minted for the test client
    pub async fn id_claims(&self, id_token: &str) -> Claims {
        self.state
            .validator
            .validate(id_token, Some(&[CLIENT_ID][..]), Some(Purpose::Id))
            .await
            .unwrap()
    }
}

pub fn authorize_request() -> AuthorizeRequest {
    AuthorizeRequest {
        client_id: CLIENT_ID.into(),
        redirect_uri: REDIRECT_URI.into(),
        response_type: "code".into(),
        scope: "openid user".into(),
        state: Some("client-state".into()),
        idp: None,
        confirm: None,
    }
}

pub fn query_param(url: &str, name: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()?
        .query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}
