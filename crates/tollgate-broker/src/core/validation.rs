//! Token validation
//!
//! A token is accepted only if every step passes, in order:
//!
//! 1. The header names an accepted algorithm and a key id, and the
//!    (unverified) issuer is trusted
//! 2. The key is resolved through the [`KeyRegistry`]
//! 3. Signature, issuer, audience and expiry verify
//! 4. The purpose claim is present and matches the expected purpose
//! 5. Revocable purposes are not blacklisted
//!
//! Any failure is a rejection. No partially validated claims are returned.

use jsonwebtoken::{decode, decode_header, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use tollgate_core::{Claims, Purpose};

use super::blacklist::Blacklist;
use crate::keys::{KeyRegistry, KeyResolutionError};

/// Audience required when the caller names none
pub const DEFAULT_AUDIENCE: &str = "openid";

/// Algorithms the broker accepts
const ACCEPTED_ALGORITHMS: [Algorithm; 2] = [Algorithm::EdDSA, Algorithm::RS256];

/// Why a token was rejected
#[derive(Error, Debug)]
pub enum TokenValidationError {
    #[error("Malformed token: {0}")]
    Malformed(String),

    #[error("Untrusted issuer: {0}")]
    UntrustedIssuer(String),

    #[error("Key resolution failed: {0}")]
    KeyResolution(#[from] KeyResolutionError),

    #[error("Invalid signature")]
    BadSignature,

    #[error("Token expired")]
    Expired,

    #[error("Audience mismatch")]
    AudienceMismatch,

    #[error("Token has no purpose claim")]
    MissingPurpose,

    #[error("Expected purpose '{expected}', got '{actual}'")]
    PurposeMismatch { expected: Purpose, actual: String },

    #[error("Token has been revoked")]
    Blacklisted,

    #[error("Revocation check failed: {0}")]
    Store(String),
}

impl TokenValidationError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            TokenValidationError::Malformed(_) => "INVALID_TOKEN",
            TokenValidationError::UntrustedIssuer(_) => "UNTRUSTED_ISSUER",
            TokenValidationError::KeyResolution(_) => "UNKNOWN_KEY",
            TokenValidationError::BadSignature => "INVALID_SIGNATURE",
            TokenValidationError::Expired => "TOKEN_EXPIRED",
            TokenValidationError::AudienceMismatch => "AUDIENCE_MISMATCH",
            TokenValidationError::MissingPurpose => "MISSING_PURPOSE",
            TokenValidationError::PurposeMismatch { .. } => "PURPOSE_MISMATCH",
            TokenValidationError::Blacklisted => "TOKEN_BLACKLISTED",
            TokenValidationError::Store(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<jsonwebtoken::errors::Error> for TokenValidationError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => TokenValidationError::Expired,
            ErrorKind::InvalidSignature => TokenValidationError::BadSignature,
            ErrorKind::InvalidAudience => TokenValidationError::AudienceMismatch,
            ErrorKind::InvalidIssuer => TokenValidationError::UntrustedIssuer("issuer not accepted".into()),
            _ => TokenValidationError::Malformed(err.to_string()),
        }
    }
}

/// Only the issuer is read before the signature is checked
#[derive(Deserialize)]
struct UnverifiedClaims {
    #[serde(default)]
    iss: String,
}

/// Validates tokens issued by this broker or a trusted remote issuer
pub struct TokenValidator {
    registry: Arc<KeyRegistry>,
    blacklist: Blacklist,
    trusted_issuers: Vec<String>,
}

impl TokenValidator {
    pub fn new(registry: Arc<KeyRegistry>, blacklist: Blacklist) -> Self {
        let trusted_issuers = registry.trusted_issuers();
        Self {
            registry,
            blacklist,
            trusted_issuers,
        }
    }

    pub fn blacklist(&self) -> &Blacklist {
        &self.blacklist
    }

    /// Validate `token`.
    ///
    /// `expected_audience` defaults to `["openid"]`; at least one of its
    /// entries must appear in `aud`. When `expected_purpose` is given the
    /// `pur` claim must equal it exactly.
    pub async fn validate(
        &self,
        token: &str,
        expected_audience: Option<&[&str]>,
        expected_purpose: Option<Purpose>,
    ) -> Result<Claims, TokenValidationError> {
        let (alg, kid, issuer) = self.inspect(token)?;

        let key = self.registry.get_key(&kid, &issuer).await.map_err(|e| {
            warn!(kid = %kid, issuer = %issuer, error = %e, "Token key could not be resolved");
            e
        })?;
        let decoding_key = key.decoding_key(alg)?;

        let claims = self.verify(token, alg, &decoding_key, expected_audience)?;
        check_purpose(&claims, expected_purpose)?;
        self.check_revocation(&claims).await?;

        debug!(jti = %claims.jti, iss = %claims.iss, pur = %claims.pur, "Token validated");
        Ok(claims)
    }

    /// Read the algorithm, key id and issuer without verifying anything
    fn inspect(&self, token: &str) -> Result<(Algorithm, String, String), TokenValidationError> {
        let header = decode_header(token)?;
        if !ACCEPTED_ALGORITHMS.contains(&header.alg) {
            return Err(TokenValidationError::Malformed(format!(
                "algorithm {:?} not accepted",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| TokenValidationError::Malformed("missing kid header".into()))?;

        let mut peek = Validation::new(header.alg);
        peek.insecure_disable_signature_validation();
        peek.validate_exp = false;
        peek.validate_aud = false;
        peek.required_spec_claims.clear();
        let unverified = decode::<UnverifiedClaims>(token, &DecodingKey::from_secret(&[]), &peek)?;

        let issuer = unverified.claims.iss;
        if !self.trusted_issuers.contains(&issuer) {
            warn!(issuer = %issuer, kid = %kid, "Rejected token from untrusted issuer");
            return Err(TokenValidationError::UntrustedIssuer(issuer));
        }

        Ok((header.alg, kid, issuer))
    }

    fn verify(
        &self,
        token: &str,
        alg: Algorithm,
        key: &DecodingKey,
        expected_audience: Option<&[&str]>,
    ) -> Result<Claims, TokenValidationError> {
        let mut validation = Validation::new(alg);
        validation.leeway = 0;
        validation.set_issuer(&self.trusted_issuers);
        validation.set_audience(expected_audience.unwrap_or(&[DEFAULT_AUDIENCE]));
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);

        let data = decode::<Claims>(token, key, &validation)?;
        Ok(data.claims)
    }

    async fn check_revocation(&self, claims: &Claims) -> Result<(), TokenValidationError> {
        let Some(purpose) = claims.purpose() else {
            return Ok(());
        };
        if !purpose.is_revocable() {
            return Ok(());
        }
        if claims.jti.is_empty() {
            return Err(TokenValidationError::Malformed(format!(
                "{} token without jti",
                purpose
            )));
        }

        match self.blacklist.is_revoked(&claims.jti).await {
            Ok(false) => Ok(()),
            Ok(true) => {
                warn!(jti = %claims.jti, purpose = %purpose, "Rejected revoked token");
                Err(TokenValidationError::Blacklisted)
            }
            Err(e) => {
                warn!(jti = %claims.jti, error = %e, "Blacklist lookup failed, rejecting token");
                Err(TokenValidationError::Store(e.to_string()))
            }
        }
    }
}

fn check_purpose(claims: &Claims, expected: Option<Purpose>) -> Result<(), TokenValidationError> {
    if claims.pur.is_empty() {
        warn!(jti = %claims.jti, "Rejected token without purpose");
        return Err(TokenValidationError::MissingPurpose);
    }
    match expected {
        Some(expected) if claims.pur != expected.as_str() => {
            warn!(expected = %expected, actual = %claims.pur, "Rejected token with wrong purpose");
            Err(TokenValidationError::PurposeMismatch {
                expected,
                actual: claims.pur.clone(),
            })
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tollgate_bridge::RemoteKey;
    use tollgate_core::{ClaimsBuilder, KeyPair};

    use crate::storage::MemoryStore;

    const ISSUER: &str = "https://broker.example/user";

    struct NoRemoteKeys;

    #[async_trait]
    impl tollgate_bridge::RemoteKeySource for NoRemoteKeys {
        async fn fetch_keys(&self, _issuer: &str) -> tollgate_bridge::Result<Vec<RemoteKey>> {
            Ok(Vec::new())
        }
    }

    fn create_validator() -> TokenValidator {
        let registry = KeyRegistry::new(ISSUER, KeyPair::generate("key-1").unwrap(), Arc::new(NoRemoteKeys));
        let blacklist = Blacklist::new(Arc::new(MemoryStore::new()));
        TokenValidator::new(Arc::new(registry), blacklist)
    }

    fn sign(validator: &TokenValidator, claims: &Claims) -> String {
        validator.registry.sign(claims).unwrap()
    }

    #[tokio::test]
    async fn test_accepts_valid_token() {
        let validator = create_validator();
        let claims = ClaimsBuilder::new(ISSUER, "1", Purpose::Access)
            .audience(["openid", "user"])
            .build();

        let validated = validator
            .validate(&sign(&validator, &claims), None, Some(Purpose::Access))
            .await
            .unwrap();
        assert_eq!(validated.jti, claims.jti);
    }

    #[tokio::test]
    async fn test_missing_purpose_distinct_from_mismatch() {
        let validator = create_validator();

        let mut claims = ClaimsBuilder::new(ISSUER, "1", Purpose::Access)
            .audience(["openid"])
            .build();
        claims.pur = String::new();
        let err = validator
            .validate(&sign(&validator, &claims), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, TokenValidationError::MissingPurpose));

        let claims = ClaimsBuilder::new(ISSUER, "1", Purpose::Access)
            .audience(["openid"])
            .build();
        let err = validator
            .validate(&sign(&validator, &claims), None, Some(Purpose::Refresh))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "PURPOSE_MISMATCH");
    }

    #[tokio::test]
    async fn test_garbage_is_malformed() {
        let validator = create_validator();
        let err = validator.validate("not.a.token", None, None).await.unwrap_err();
        assert!(matches!(err, TokenValidationError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_untrusted_issuer() {
        let validator = create_validator();
        let claims = ClaimsBuilder::new("https://elsewhere.example", "1", Purpose::Access)
            .audience(["openid"])
            .build();

        let err = validator
            .validate(&sign(&validator, &claims), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, TokenValidationError::UntrustedIssuer(_)));
    }

    #[tokio::test]
    async fn test_foreign_key_fails_signature() {
        let validator = create_validator();
        let claims = ClaimsBuilder::new(ISSUER, "1", Purpose::Access)
            .audience(["openid"])
            .build();
        // Same kid, different key
        let forged = KeyPair::generate("key-1").unwrap().sign(&claims).unwrap();

        let err = validator.validate(&forged, None, None).await.unwrap_err();
        assert!(matches!(err, TokenValidationError::BadSignature));
    }

    #[tokio::test]
    async fn test_store_failure_is_not_a_pass() {
        use chrono::{DateTime, Utc};
        use uuid::Uuid;

        use crate::storage::*;

        /// Store whose blacklist lookups always fail
        #[derive(Debug)]
        struct BrokenStore;

        #[async_trait]
        impl BrokerStore for BrokenStore {
            async fn add_blacklist_entry(&self, _: BlacklistEntry) -> Result<(), StorageError> {
                Err(StorageError::Connection("down".into()))
            }
            async fn is_blacklisted(&self, _: &str) -> Result<bool, StorageError> {
                Err(StorageError::Connection("down".into()))
            }
            async fn prune_blacklist(&self, _: DateTime<Utc>) -> Result<usize, StorageError> {
                Ok(0)
            }
            async fn prune_expired(&self, _: DateTime<Utc>, _: DateTime<Utc>) -> Result<PruneStats, StorageError> {
                Err(StorageError::Connection("down".into()))
            }
            async fn put_session(&self, _: AuthorizationSession) -> Result<(), StorageError> {
                Ok(())
            }
            async fn get_session(&self, _: &str) -> Result<Option<AuthorizationSession>, StorageError> {
                Ok(None)
            }
            async fn take_session(&self, _: &str) -> Result<Option<AuthorizationSession>, StorageError> {
                Ok(None)
            }
            async fn put_grant(&self, _: AuthorizationGrant) -> Result<(), StorageError> {
                Ok(())
            }
            async fn take_grant(&self, _: &str) -> Result<Option<AuthorizationGrant>, StorageError> {
                Ok(None)
            }
            async fn put_browser_session(&self, _: BrowserSession) -> Result<(), StorageError> {
                Ok(())
            }
            async fn get_browser_session(&self, _: &str) -> Result<Option<BrowserSession>, StorageError> {
                Ok(None)
            }
            async fn delete_browser_session(&self, _: &str) -> Result<bool, StorageError> {
                Ok(false)
            }
            async fn upsert_user(&self, _: &str, _: &str) -> Result<UserAccount, StorageError> {
                Err(StorageError::Connection("down".into()))
            }
            async fn get_user(&self, _: Uuid) -> Result<Option<UserAccount>, StorageError> {
                Ok(None)
            }
            async fn link_identity(&self, _: Uuid, _: LinkedIdentity) -> Result<(), StorageError> {
                Ok(())
            }
            async fn linked_identities(&self, _: Uuid) -> Result<Vec<LinkedIdentity>, StorageError> {
                Ok(Vec::new())
            }
            async fn upsert_client(&self, _: OAuthClient) -> Result<(), StorageError> {
                Ok(())
            }
            async fn get_client(&self, _: &str) -> Result<Option<OAuthClient>, StorageError> {
                Ok(None)
            }
        }

        let registry = KeyRegistry::new(ISSUER, KeyPair::generate("key-1").unwrap(), Arc::new(NoRemoteKeys));
        let validator = TokenValidator::new(Arc::new(registry), Blacklist::new(Arc::new(BrokenStore)));
        let claims = ClaimsBuilder::new(ISSUER, "1", Purpose::Refresh)
            .audience(["openid"])
            .build();

        let err = validator
            .validate(&sign(&validator, &claims), None, Some(Purpose::Refresh))
            .await
            .unwrap_err();
        assert!(matches!(err, TokenValidationError::Store(_)));
    }
}
