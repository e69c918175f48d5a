//! Token minting

use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use tollgate_core::{BrokerConfig, Claims, ClaimsBuilder, Purpose, Result};

use crate::keys::KeyRegistry;

/// A signed token together with the claims it carries
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: Claims,
}

/// Mints access, ID and refresh tokens signed with the broker's current key
#[derive(Clone)]
pub struct TokenIssuer {
    registry: Arc<KeyRegistry>,
    config: Arc<BrokerConfig>,
}

impl TokenIssuer {
    pub fn new(registry: Arc<KeyRegistry>, config: Arc<BrokerConfig>) -> Self {
        Self { registry, config }
    }

    /// Access token; the audience is the granted scope
    pub fn access_token(&self, sub: &str, username: &str, client_id: &str, scope: &[String]) -> Result<IssuedToken> {
        let claims = ClaimsBuilder::new(self.registry.issuer(), sub, Purpose::Access)
            .audience(scope.iter().cloned())
            .lifetime(self.config.access_token_expires_in as i64)
            .authorized_party(client_id)
            .scope(scope.to_vec())
            .context(json!({"user": {"name": username}}))
            .build();
        self.sign(claims)
    }

    /// ID token for `client_id`; `context` carries the user's linked accounts
    pub fn id_token(&self, sub: &str, client_id: &str, context: Value) -> Result<IssuedToken> {
        let claims = ClaimsBuilder::new(self.registry.issuer(), sub, Purpose::Id)
            .audience([client_id])
            .lifetime(self.config.id_token_expires_in as i64)
            .authorized_party(client_id)
            .context(context)
            .build();
        self.sign(claims)
    }

    /// Refresh token; bound to `client_id` through `azp`
    pub fn refresh_token(&self, sub: &str, username: &str, client_id: &str, scope: &[String]) -> Result<IssuedToken> {
        let claims = ClaimsBuilder::new(self.registry.issuer(), sub, Purpose::Refresh)
            .audience(scope.iter().cloned())
            .lifetime(self.config.refresh_token_expires_in as i64)
            .authorized_party(client_id)
            .scope(scope.to_vec())
            .context(json!({"user": {"name": username}}))
            .build();
        self.sign(claims)
    }

    fn sign(&self, claims: Claims) -> Result<IssuedToken> {
        let token = self.registry.sign(&claims)?;
        info!(
            jti = %claims.jti,
            sub = %claims.sub,
            pur = %claims.pur,
            kid = %self.registry.signing_key().kid(),
            "Issued token"
        );
        Ok(IssuedToken { token, claims })
    }
}
