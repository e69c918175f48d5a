//! Key Registry for the broker
//!
//! Resolves the public key that verifies a token, given its key id and
//! (unverified) issuer:
//! - Tokens issued by this broker are verified with the local keypairs,
//!   without any network round-trip
//! - Tokens from a trusted remote issuer are verified with keys fetched from
//!   that issuer's key endpoint and cached per `(issuer, kid)`
//! - Any other issuer is rejected before a fetch is attempted
//!
//! An issuer's key set is fetched at most once per refresh cooldown, so
//! tokens carrying made-up key ids cannot drive repeated fetches.

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey};
use moka::future::Cache;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use tollgate_bridge::{KeyMaterial, RemoteKeySource};
use tollgate_core::{Claims, KeyPair};

/// Errors resolving a verification key
#[derive(Error, Debug, Clone, PartialEq)]
pub enum KeyResolutionError {
    /// The issuer is neither this broker nor a trusted remote issuer
    #[error("Unknown issuer: {0}")]
    UnknownIssuer(String),

    /// The issuer publishes no key with this id
    #[error("Unknown key '{kid}' for issuer {issuer}")]
    UnknownKey { kid: String, issuer: String },

    /// The issuer's key endpoint could not be read
    #[error("Failed to fetch keys: {0}")]
    Fetch(String),

    /// The key material cannot be used with the token's algorithm
    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

/// Minimum time between two fetches of one issuer's key set
const REFRESH_COOLDOWN: Duration = Duration::from_secs(30);

type KeySet = HashMap<String, Arc<PublicKeyEntry>>;

/// A public key known to the registry
#[derive(Debug, Clone)]
pub struct PublicKeyEntry {
    pub key_id: String,
    pub issuer: String,
    pub material: KeyMaterial,
    pub fetched_at: DateTime<Utc>,
}

impl PublicKeyEntry {
    /// Build a verification key for `alg` from this entry's material
    pub fn decoding_key(&self, alg: Algorithm) -> Result<DecodingKey, KeyResolutionError> {
        let invalid = |e: jsonwebtoken::errors::Error| KeyResolutionError::InvalidKey(e.to_string());

        match (&self.material, alg) {
            (KeyMaterial::Pem(pem), Algorithm::EdDSA) => {
                DecodingKey::from_ed_pem(pem.as_bytes()).map_err(invalid)
            }
            (KeyMaterial::Pem(pem), Algorithm::RS256) => {
                DecodingKey::from_rsa_pem(pem.as_bytes()).map_err(invalid)
            }
            (KeyMaterial::Jwk(jwk), Algorithm::RS256) if jwk.kty == "RSA" => {
                let n = jwk.n.as_deref().ok_or_else(|| {
                    KeyResolutionError::InvalidKey("RSA JWK missing modulus".into())
                })?;
                let e = jwk.e.as_deref().ok_or_else(|| {
                    KeyResolutionError::InvalidKey("RSA JWK missing exponent".into())
                })?;
                DecodingKey::from_rsa_components(n, e).map_err(invalid)
            }
            (KeyMaterial::Jwk(jwk), Algorithm::EdDSA) if jwk.kty == "OKP" => {
                let x = jwk.x.as_deref().ok_or_else(|| {
                    KeyResolutionError::InvalidKey("OKP JWK missing public key".into())
                })?;
                DecodingKey::from_ed_components(x).map_err(invalid)
            }
            (_, alg) => Err(KeyResolutionError::InvalidKey(format!(
                "key '{}' cannot verify {:?}",
                self.key_id, alg
            ))),
        }
    }
}

/// Key Registry for the broker
pub struct KeyRegistry {
    /// This broker's issuer (BASE_URL)
    issuer: String,

    /// Local signing keys; the first one signs new tokens
    signing_keys: Vec<KeyPair>,

    /// Public entries of the local keys (kid -> entry)
    local_entries: HashMap<String, Arc<PublicKeyEntry>>,

    /// Remote issuers whose keys may be fetched
    remote_issuers: HashSet<String>,

    /// Fetches remote issuers' key sets
    source: Arc<dyn RemoteKeySource>,

    /// Remote keys keyed by (issuer, kid)
    cache: Cache<(String, String), Arc<PublicKeyEntry>>,

    /// Last key set fetched per issuer, kept for the refresh cooldown
    key_sets: Cache<String, Arc<KeySet>>,
}

impl KeyRegistry {
    /// Create a registry for `issuer` that signs with `signing_key`
    pub fn new(issuer: impl Into<String>, signing_key: KeyPair, source: Arc<dyn RemoteKeySource>) -> Self {
        let issuer = issuer.into();
        info!(issuer = %issuer, kid = %signing_key.kid(), "Key registry initialized with signing key");

        let mut registry = Self {
            issuer,
            signing_keys: Vec::new(),
            local_entries: HashMap::new(),
            remote_issuers: HashSet::new(),
            source,
            cache: Cache::builder()
                .time_to_live(Duration::from_secs(3600))
                .max_capacity(1000)
                .build(),
            key_sets: Cache::builder().time_to_live(REFRESH_COOLDOWN).build(),
        };
        registry.add_local_key(signing_key);
        registry
    }

    /// Also accept tokens signed by an older local key
    pub fn with_local_key(mut self, key: KeyPair) -> Self {
        self.add_local_key(key);
        self
    }

    /// Trust tokens from a remote issuer
    pub fn with_remote_issuer(mut self, issuer: impl Into<String>) -> Self {
        let issuer = issuer.into();
        info!(issuer = %issuer, "Trusting remote issuer");
        self.remote_issuers.insert(issuer);
        self
    }

    /// Set how long fetched remote keys are cached
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache = Cache::builder().time_to_live(ttl).max_capacity(1000).build();
        self
    }

    /// Set how long an issuer's key set is reused before a miss refetches it
    pub fn with_refresh_cooldown(mut self, cooldown: Duration) -> Self {
        self.key_sets = Cache::builder().time_to_live(cooldown).build();
        self
    }

    fn add_local_key(&mut self, key: KeyPair) {
        let entry = PublicKeyEntry {
            key_id: key.kid().to_string(),
            issuer: self.issuer.clone(),
            material: KeyMaterial::Pem(key.public_key_pem().to_string()),
            fetched_at: Utc::now(),
        };
        self.local_entries.insert(entry.key_id.clone(), Arc::new(entry));
        self.signing_keys.push(key);
    }

    /// This broker's issuer
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// The key new tokens are signed with
    pub fn signing_key(&self) -> &KeyPair {
        // `new` always registers one key.
        &self.signing_keys[0]
    }

    /// Sign claims with the current signing key
    pub fn sign(&self, claims: &Claims) -> tollgate_core::Result<String> {
        self.signing_key().sign(claims)
    }

    /// `(kid, public PEM)` of every local key, for publishing
    pub fn public_keys(&self) -> Vec<(String, String)> {
        self.signing_keys
            .iter()
            .map(|k| (k.kid().to_string(), k.public_key_pem().to_string()))
            .collect()
    }

    /// Whether tokens from `issuer` can be resolved at all
    pub fn is_known_issuer(&self, issuer: &str) -> bool {
        issuer == self.issuer || self.remote_issuers.contains(issuer)
    }

    /// This broker's issuer followed by the trusted remote issuers
    pub fn trusted_issuers(&self) -> Vec<String> {
        let mut remote: Vec<String> = self.remote_issuers.iter().cloned().collect();
        remote.sort();
        std::iter::once(self.issuer.clone()).chain(remote).collect()
    }

    /// Resolve the key `kid` of `issuer`.
    ///
    /// Self-issued keys come from the local store. Remote keys come from the
    /// cache; on a miss the issuer's key set is fetched, at most once per
    /// refresh cooldown, and concurrent misses share that fetch.
    pub async fn get_key(&self, kid: &str, issuer: &str) -> Result<Arc<PublicKeyEntry>, KeyResolutionError> {
        if issuer == self.issuer {
            return self.local_entries.get(kid).cloned().ok_or_else(|| {
                KeyResolutionError::UnknownKey {
                    kid: kid.to_string(),
                    issuer: issuer.to_string(),
                }
            });
        }

        if !self.remote_issuers.contains(issuer) {
            warn!(issuer = %issuer, "Refusing key lookup for untrusted issuer");
            return Err(KeyResolutionError::UnknownIssuer(issuer.to_string()));
        }

        let cache_key = (issuer.to_string(), kid.to_string());
        self.cache
            .try_get_with(cache_key, self.refresh(issuer, kid))
            .await
            .map_err(|e| (*e).clone())
    }

    /// Look `kid` up in `issuer`'s current key set
    async fn refresh(&self, issuer: &str, kid: &str) -> Result<Arc<PublicKeyEntry>, KeyResolutionError> {
        let key_set = self
            .key_sets
            .try_get_with(issuer.to_string(), self.fetch_key_set(issuer, kid))
            .await
            .map_err(|e| (*e).clone())?;

        key_set.get(kid).cloned().ok_or_else(|| {
            debug!(issuer = %issuer, kid = %kid, "Key not in issuer's current key set");
            KeyResolutionError::UnknownKey {
                kid: kid.to_string(),
                issuer: issuer.to_string(),
            }
        })
    }

    /// Fetch `issuer`'s key set and cache every key in it
    async fn fetch_key_set(&self, issuer: &str, kid: &str) -> Result<Arc<KeySet>, KeyResolutionError> {
        debug!(issuer = %issuer, kid = %kid, "Key cache miss, fetching issuer keys");

        let keys = self.source.fetch_keys(issuer).await.map_err(|e| {
            warn!(issuer = %issuer, error = %e, "Failed to fetch issuer keys");
            KeyResolutionError::Fetch(e.to_string())
        })?;

        let fetched_at = Utc::now();
        let mut key_set = KeySet::new();
        for key in keys {
            let entry = Arc::new(PublicKeyEntry {
                key_id: key.kid,
                issuer: issuer.to_string(),
                material: key.material,
                fetched_at,
            });
            if entry.key_id != kid {
                self.cache
                    .insert((issuer.to_string(), entry.key_id.clone()), entry.clone())
                    .await;
            }
            key_set.insert(entry.key_id.clone(), entry);
        }

        Ok(Arc::new(key_set))
    }
}
