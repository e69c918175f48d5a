//! Revocation registry
//!
//! Revoked refresh tokens and API keys are recorded by `jti` in the shared
//! store, so a revocation on one instance is honoured by every instance.

use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use tollgate_core::Purpose;

use crate::storage::{BlacklistEntry, BrokerStore, StorageError};

/// Revocation registry backed by a [`BrokerStore`]
#[derive(Debug, Clone)]
pub struct Blacklist {
    store: Arc<dyn BrokerStore>,
}

impl Blacklist {
    pub fn new(store: Arc<dyn BrokerStore>) -> Self {
        Self { store }
    }

    /// Revoke `token_id` until `exp` (seconds since epoch).
    ///
    /// An `exp` outside the representable range revokes the token for good.
    pub async fn revoke(&self, token_id: &str, purpose: Purpose, exp: i64) -> Result<(), StorageError> {
        let expires_at = Utc
            .timestamp_opt(exp, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        self.store
            .add_blacklist_entry(BlacklistEntry {
                token_id: token_id.to_string(),
                purpose,
                expires_at,
            })
            .await?;

        info!(jti = %token_id, purpose = %purpose, expires_at = %expires_at, "Token revoked");
        Ok(())
    }

    pub async fn is_revoked(&self, token_id: &str) -> Result<bool, StorageError> {
        self.store.is_blacklisted(token_id).await
    }

    /// Drop entries for tokens that expired before `now`
    pub async fn prune(&self, now: DateTime<Utc>) -> Result<usize, StorageError> {
        let removed = self.store.prune_blacklist(now).await?;
        debug!(removed, "Pruned blacklist");
        Ok(removed)
    }
}
