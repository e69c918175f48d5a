//! Storage abstraction for the broker
//!
//! This module provides a trait-based abstraction over the broker's shared
//! state, with an in-memory (default) and a PostgreSQL backend.
//!
//! Multi-instance deployments need the persistent backend so that:
//! - Revocations are visible to every instance immediately
//! - A login that starts on one instance can finish on another
//! - Authorization codes are single-use across instances

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt::Debug;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use tollgate_core::{OAuthClientConfig, Purpose};

use crate::core::FlowState;

/// Error type for storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Unsupported backend: {0}")]
    Unsupported(String),
}

// =============================================================================
// Backend selection
// =============================================================================

/// Which store the broker runs on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Memory,
    Postgres(String),
}

/// Pick the backend for a `DB` setting.
///
/// A configured database is never silently replaced by the in-memory store:
/// revocations and codes would stop being shared between instances.
pub fn select_backend(db: &str, postgres_enabled: bool) -> Result<Backend, StorageError> {
    if db.is_empty() {
        return Ok(Backend::Memory);
    }
    if !postgres_enabled {
        return Err(StorageError::Unsupported(
            "DB is set but this build lacks the `postgres` feature".into(),
        ));
    }
    Ok(Backend::Postgres(db.to_string()))
}

/// Open the store selected by the `DB` setting
pub async fn open_store(db: &str) -> Result<Arc<dyn BrokerStore>, StorageError> {
    match select_backend(db, cfg!(feature = "postgres"))? {
        Backend::Memory => {
            warn!("DB not set, using in-memory storage; state is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        #[cfg(feature = "postgres")]
        Backend::Postgres(url) => Ok(Arc::new(PostgresStore::new(&url).await?)),
        #[cfg(not(feature = "postgres"))]
        Backend::Postgres(_) => Err(StorageError::Unsupported("postgres".into())),
    }
}

/// A revoked token
#[derive(Debug, Clone, PartialEq)]
pub struct BlacklistEntry {
    /// `jti` of the revoked token
    pub token_id: String,
    pub purpose: Purpose,
    /// Expiry of the revoked token; the entry is useless afterwards
    pub expires_at: DateTime<Utc>,
}

/// State kept between an authorize request and the upstream callback
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizationSession {
    /// Opaque value carried through the upstream redirect
    pub state_token: String,
    /// The browser's CSRF cookie when the session was created
    pub csrf_token: Option<String>,
    pub client_id: String,
    pub redirect_uri: String,
    pub requested_scope: Vec<String>,
    /// `state` sent by the client, echoed back on its redirect
    pub client_state: Option<String>,
    /// Upstream provider selected for this login
    pub provider: String,
    pub flow_state: FlowState,
    /// Provider-specific data recorded on the way out
    pub hop_metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A single-use authorization code handed to a client
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizationGrant {
    pub code: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: Vec<String>,
    pub user_id: Uuid,
    pub username: String,
    pub provider: String,
    pub flow_state: FlowState,
    pub created_at: DateTime<Utc>,
}

/// An authenticated browser, identified by the `session` cookie
#[derive(Debug, Clone, PartialEq)]
pub struct BrowserSession {
    pub session_id: String,
    pub user_id: Uuid,
    pub username: String,
    pub provider: String,
    pub expires_at: DateTime<Utc>,
}

/// Rows removed by one [`BrokerStore::prune_expired`] pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneStats {
    pub blacklist: usize,
    pub sessions: usize,
    pub grants: usize,
    pub browser_sessions: usize,
}

impl PruneStats {
    pub fn total(&self) -> usize {
        self.blacklist + self.sessions + self.grants + self.browser_sessions
    }
}

/// A local user account
#[derive(Debug, Clone, PartialEq)]
pub struct UserAccount {
    pub id: Uuid,
    pub username: String,
    /// Provider the account first logged in with
    pub provider: String,
    pub created_at: DateTime<Utc>,
}

/// An external account linked to a local user
#[derive(Debug, Clone, PartialEq)]
pub struct LinkedIdentity {
    /// Provider namespace, e.g. `google`
    pub provider: String,
    /// Account id at that provider
    pub account_id: String,
    /// When the link stops being valid
    pub expires_at: DateTime<Utc>,
}

/// A downstream OAuth client
#[derive(Debug, Clone, PartialEq)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uris: Vec<String>,
    pub allowed_scopes: Vec<String>,
    pub name: Option<String>,
}

impl OAuthClient {
    pub fn from_config(client_id: &str, config: &OAuthClientConfig) -> Self {
        Self {
            client_id: client_id.to_string(),
            client_secret: config.client_secret.clone(),
            redirect_uris: config.redirect_uris.clone(),
            allowed_scopes: config.allowed_scopes.clone(),
            name: config.name.clone(),
        }
    }
}

/// Storage backend trait for broker state
///
/// Implementations must be thread-safe and support concurrent access.
/// `take_*` methods remove and return in one atomic step.
#[async_trait]
pub trait BrokerStore: Send + Sync + Debug {
    // =========================================================================
    // Revocation
    // =========================================================================

    /// Add or replace a blacklist entry
    async fn add_blacklist_entry(&self, entry: BlacklistEntry) -> Result<(), StorageError>;

    /// Check if a token id is blacklisted
    async fn is_blacklisted(&self, token_id: &str) -> Result<bool, StorageError>;

    /// Delete entries whose token expired before `now`, returning how many
    async fn prune_blacklist(&self, now: DateTime<Utc>) -> Result<usize, StorageError>;

    /// Delete everything that can no longer be used: blacklist entries and
    /// browser sessions past `now`, authorization sessions and codes created
    /// before `issued_before`
    async fn prune_expired(
        &self,
        now: DateTime<Utc>,
        issued_before: DateTime<Utc>,
    ) -> Result<PruneStats, StorageError>;

    // =========================================================================
    // Authorization sessions
    // =========================================================================

    /// Insert or replace a session keyed by its state token
    async fn put_session(&self, session: AuthorizationSession) -> Result<(), StorageError>;

    async fn get_session(&self, state_token: &str) -> Result<Option<AuthorizationSession>, StorageError>;

    /// Remove and return a session
    async fn take_session(&self, state_token: &str) -> Result<Option<AuthorizationSession>, StorageError>;

    // =========================================================================
    // Authorization codes
    // =========================================================================

    async fn put_grant(&self, grant: AuthorizationGrant) -> Result<(), StorageError>;

    /// Remove and return a grant
    async fn take_grant(&self, code: &str) -> Result<Option<AuthorizationGrant>, StorageError>;

    // =========================================================================
    // Browser sessions
    // =========================================================================

    async fn put_browser_session(&self, session: BrowserSession) -> Result<(), StorageError>;

    async fn get_browser_session(&self, session_id: &str) -> Result<Option<BrowserSession>, StorageError>;

    async fn delete_browser_session(&self, session_id: &str) -> Result<bool, StorageError>;

    // =========================================================================
    // Users and linked identities
    // =========================================================================

    /// Find the user by username, creating it on first login
    async fn upsert_user(&self, username: &str, provider: &str) -> Result<UserAccount, StorageError>;

    async fn get_user(&self, id: Uuid) -> Result<Option<UserAccount>, StorageError>;

    /// Link an external account, replacing any link for the same provider
    async fn link_identity(&self, user_id: Uuid, identity: LinkedIdentity) -> Result<(), StorageError>;

    async fn linked_identities(&self, user_id: Uuid) -> Result<Vec<LinkedIdentity>, StorageError>;

    // =========================================================================
    // OAuth clients
    // =========================================================================

    async fn upsert_client(&self, client: OAuthClient) -> Result<(), StorageError>;

    async fn get_client(&self, client_id: &str) -> Result<Option<OAuthClient>, StorageError>;
}

// =============================================================================
// Background pruning
// =============================================================================

/// Periodically drop expired rows from `store`.
///
/// Authorization sessions and codes older than `session_ttl` are removed
/// along with expired blacklist entries and browser sessions.
pub fn spawn_pruner(
    store: Arc<dyn BrokerStore>,
    every: std::time::Duration,
    session_ttl: chrono::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let now = Utc::now();
            match store.prune_expired(now, now - session_ttl).await {
                Ok(stats) if stats.total() > 0 => info!(
                    blacklist = stats.blacklist,
                    sessions = stats.sessions,
                    grants = stats.grants,
                    browser_sessions = stats.browser_sessions,
                    "Pruned expired state"
                ),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Failed to prune expired state"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_empty_db_selects_memory() {
        assert_eq!(select_backend("", false).unwrap(), Backend::Memory);
        assert_eq!(select_backend("", true).unwrap(), Backend::Memory);
    }

    #[test]
    fn test_db_without_postgres_is_refused() {
        let err = select_backend("postgres://db/tollgate", false).unwrap_err();
        assert!(matches!(err, StorageError::Unsupported(_)));
    }

    #[test]
    fn test_db_with_postgres_selects_postgres() {
        assert_eq!(
            select_backend("postgres://db/tollgate", true).unwrap(),
            Backend::Postgres("postgres://db/tollgate".into())
        );
    }

    #[cfg(not(feature = "postgres"))]
    #[tokio::test]
    async fn test_open_store_refuses_db_without_postgres() {
        let err = open_store("postgres://db/tollgate").await.unwrap_err();
        assert!(matches!(err, StorageError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_pruner_removes_expired_state() {
        let store = Arc::new(MemoryStore::new());
        store
            .put_browser_session(BrowserSession {
                session_id: "gone".into(),
                user_id: Uuid::new_v4(),
                username: "alice".into(),
                provider: "fence".into(),
                expires_at: Utc::now() - Duration::seconds(1),
            })
            .await
            .unwrap();

        let handle = spawn_pruner(store.clone(), std::time::Duration::from_millis(10), Duration::seconds(60));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        handle.abort();

        assert!(store.get_browser_session("gone").await.unwrap().is_none());
    }
}
