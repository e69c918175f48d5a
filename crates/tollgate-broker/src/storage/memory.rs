//! In-memory storage backend
//!
//! Default storage implementation using in-memory hashmaps.
//! Suitable for development and single-instance deployments.
//! Data is lost on restart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use super::{
    AuthorizationGrant, AuthorizationSession, BlacklistEntry, BrokerStore, BrowserSession,
    LinkedIdentity, OAuthClient, PruneStats, StorageError, UserAccount,
};

/// In-memory broker store implementation
#[derive(Debug, Default)]
pub struct MemoryStore {
    blacklist: RwLock<HashMap<String, BlacklistEntry>>,
    sessions: RwLock<HashMap<String, AuthorizationSession>>,
    grants: RwLock<HashMap<String, AuthorizationGrant>>,
    browser_sessions: RwLock<HashMap<String, BrowserSession>>,
    users: RwLock<HashMap<Uuid, UserAccount>>,
    links: RwLock<HashMap<Uuid, Vec<LinkedIdentity>>>,
    clients: RwLock<HashMap<String, OAuthClient>>,
}

impl MemoryStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BrokerStore for MemoryStore {
    // =========================================================================
    // Revocation
    // =========================================================================

    async fn add_blacklist_entry(&self, entry: BlacklistEntry) -> Result<(), StorageError> {
        let mut blacklist = self.blacklist.write().await;
        blacklist.insert(entry.token_id.clone(), entry);
        Ok(())
    }

    async fn is_blacklisted(&self, token_id: &str) -> Result<bool, StorageError> {
        Ok(self.blacklist.read().await.contains_key(token_id))
    }

    async fn prune_blacklist(&self, now: DateTime<Utc>) -> Result<usize, StorageError> {
        let mut blacklist = self.blacklist.write().await;
        let before = blacklist.len();
        blacklist.retain(|_, entry| entry.expires_at >= now);
        Ok(before - blacklist.len())
    }

    async fn prune_expired(
        &self,
        now: DateTime<Utc>,
        issued_before: DateTime<Utc>,
    ) -> Result<PruneStats, StorageError> {
        let blacklist = self.prune_blacklist(now).await?;

        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.created_at >= issued_before);
        let sessions = before - sessions.len();

        let mut grants = self.grants.write().await;
        let before = grants.len();
        grants.retain(|_, g| g.created_at >= issued_before);
        let grants = before - grants.len();

        let mut browser_sessions = self.browser_sessions.write().await;
        let before = browser_sessions.len();
        browser_sessions.retain(|_, s| s.expires_at >= now);
        let browser_sessions = before - browser_sessions.len();

        Ok(PruneStats { blacklist, sessions, grants, browser_sessions })
    }

    // =========================================================================
    // Authorization sessions
    // =========================================================================

    async fn put_session(&self, session: AuthorizationSession) -> Result<(), StorageError> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.state_token.clone(), session);
        Ok(())
    }

    async fn get_session(&self, state_token: &str) -> Result<Option<AuthorizationSession>, StorageError> {
        Ok(self.sessions.read().await.get(state_token).cloned())
    }

    async fn take_session(&self, state_token: &str) -> Result<Option<AuthorizationSession>, StorageError> {
        Ok(self.sessions.write().await.remove(state_token))
    }

    // =========================================================================
    // Authorization codes
    // =========================================================================

    async fn put_grant(&self, grant: AuthorizationGrant) -> Result<(), StorageError> {
        let mut grants = self.grants.write().await;
        grants.insert(grant.code.clone(), grant);
        Ok(())
    }

    async fn take_grant(&self, code: &str) -> Result<Option<AuthorizationGrant>, StorageError> {
        Ok(self.grants.write().await.remove(code))
    }

    // =========================================================================
    // Browser sessions
    // =========================================================================

    async fn put_browser_session(&self, session: BrowserSession) -> Result<(), StorageError> {
        let mut sessions = self.browser_sessions.write().await;
        sessions.insert(session.session_id.clone(), session);
        Ok(())
    }

    async fn get_browser_session(&self, session_id: &str) -> Result<Option<BrowserSession>, StorageError> {
        Ok(self.browser_sessions.read().await.get(session_id).cloned())
    }

    async fn delete_browser_session(&self, session_id: &str) -> Result<bool, StorageError> {
        Ok(self.browser_sessions.write().await.remove(session_id).is_some())
    }

    // =========================================================================
    // Users and linked identities
    // =========================================================================

    async fn upsert_user(&self, username: &str, provider: &str) -> Result<UserAccount, StorageError> {
        let mut users = self.users.write().await;
        if let Some(existing) = users.values().find(|u| u.username == username) {
            return Ok(existing.clone());
        }

        let user = UserAccount {
            id: Uuid::new_v4(),
            username: username.to_string(),
            provider: provider.to_string(),
            created_at: Utc::now(),
        };
        info!(user_id = %user.id, username = %username, provider = %provider, "Created user");
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<UserAccount>, StorageError> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn link_identity(&self, user_id: Uuid, identity: LinkedIdentity) -> Result<(), StorageError> {
        if !self.users.read().await.contains_key(&user_id) {
            return Err(StorageError::NotFound(format!("user {}", user_id)));
        }

        let mut links = self.links.write().await;
        let entries = links.entry(user_id).or_default();
        entries.retain(|l| l.provider != identity.provider);
        info!(user_id = %user_id, provider = %identity.provider, "Linked external identity");
        entries.push(identity);
        Ok(())
    }

    async fn linked_identities(&self, user_id: Uuid) -> Result<Vec<LinkedIdentity>, StorageError> {
        Ok(self.links.read().await.get(&user_id).cloned().unwrap_or_default())
    }

    // =========================================================================
    // OAuth clients
    // =========================================================================

    async fn upsert_client(&self, client: OAuthClient) -> Result<(), StorageError> {
        let mut clients = self.clients.write().await;
        info!(client_id = %client.client_id, "Registered OAuth client");
        clients.insert(client.client_id.clone(), client);
        Ok(())
    }

    async fn get_client(&self, client_id: &str) -> Result<Option<OAuthClient>, StorageError> {
        Ok(self.clients.read().await.get(client_id).cloned())
    }
}
