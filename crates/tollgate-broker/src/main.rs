//! Tollgate Server Binary
//!
//! Runs the broker HTTP server.

use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use tollgate_bridge::{HttpKeySource, ProviderRegistry};
use tollgate_core::{load_key_dir, BrokerConfig, KeyPair};

use tollgate_broker::storage::{open_store, spawn_pruner};
use tollgate_broker::{create_router, AppState, KeyRegistry, OAuthClient};

const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    // Initialize logging
    let log_level = env::var("TOLLGATE_LOG_LEVEL")
        .unwrap_or_else(|_| "info".into())
        .parse()
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    // Configuration
    let port: u16 = env::var("TOLLGATE_PORT")
        .unwrap_or_else(|_| "8080".into())
        .parse()
        .expect("TOLLGATE_PORT must be a valid port number");

    let config = match env::var("TOLLGATE_CONFIG") {
        Ok(path) => BrokerConfig::load(&path).expect("Failed to load configuration"),
        Err(_) => {
            warn!("TOLLGATE_CONFIG not set, running with the built-in defaults");
            BrokerConfig::from_yaml_str("{}").expect("Built-in configuration is invalid")
        }
    };
    let config = Arc::new(config);

    // Signing keys
    let mut keys = if config.keys_dir.is_empty() {
        Vec::new()
    } else {
        load_key_dir(&config.keys_dir).expect("Failed to load signing keys")
    };
    if keys.is_empty() {
        warn!("No signing keys configured, generating an ephemeral key");
        let kid = format!("tollgate-{}", uuid::Uuid::new_v4());
        keys.push(KeyPair::generate(kid).expect("Failed to generate signing key"));
    }
    let mut keys = keys.into_iter();
    let signing_key = keys.next().expect("at least one signing key");

    // Remote issuer keys
    let mut key_source = HttpKeySource::new(config.upstream_timeout()).expect("Failed to build HTTP client");
    if let (Some(issuer), Some(jwks_url)) = (config.remote_issuer(), config.remote_jwks_url()) {
        key_source = key_source.with_endpoint(issuer, jwks_url);
    }

    let mut registry = KeyRegistry::new(config.base_url.clone(), signing_key, Arc::new(key_source))
        .with_cache_ttl(config.key_cache_ttl());
    for key in keys {
        registry = registry.with_local_key(key);
    }
    if let Some(issuer) = config.remote_issuer() {
        registry = registry.with_remote_issuer(issuer);
    }

    // Initialize storage
    let store = open_store(&config.db).await.expect("Failed to open storage");
    for (client_id, client) in &config.oauth_clients {
        store
            .upsert_client(OAuthClient::from_config(client_id, client))
            .await
            .expect("Failed to register OAuth client");
    }

    spawn_pruner(
        store.clone(),
        PRUNE_INTERVAL,
        chrono::Duration::seconds(config.authorization_session_timeout as i64),
    );

    // Upstream providers
    let providers = ProviderRegistry::from_config(&config).expect("Failed to build upstream providers");

    info!(
        issuer = %config.base_url,
        kid = %registry.signing_key().kid(),
        providers = ?providers.ids(),
        port = port,
        "Starting Tollgate broker"
    );

    // Create application state
    let state = Arc::new(AppState::new(
        config.clone(),
        Arc::new(registry),
        store,
        Arc::new(providers),
    ));

    // Build router
    let app = create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    info!(addr = %addr, "Tollgate listening");

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
