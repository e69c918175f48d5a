//! Remote key sources
//!
//! Fetches the public signing keys of a trusted remote issuer. Two document
//! formats are understood:
//!
//! - the broker format, `{"keys": [{"<kid>": "<pem>"}]}` (or `[["<kid>", "<pem>"]]`)
//! - a standard JWKS, `{"keys": [{"kid": "...", "kty": "RSA", ...}]}`

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{BridgeError, Result};

/// Individual JWK (JSON Web Key)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key ID
    pub kid: Option<String>,
    /// Key type
    pub kty: String,
    /// Algorithm
    #[serde(default)]
    pub alg: Option<String>,
    /// RSA modulus (for RSA keys)
    #[serde(default)]
    pub n: Option<String>,
    /// RSA exponent (for RSA keys)
    #[serde(default)]
    pub e: Option<String>,
    /// Curve (for OKP/EC keys)
    #[serde(default)]
    pub crv: Option<String>,
    /// Public key (OKP) or x coordinate (EC)
    #[serde(default)]
    pub x: Option<String>,
}

/// Public key material as published by an issuer
#[derive(Debug, Clone, PartialEq)]
pub enum KeyMaterial {
    /// SPKI PEM document
    Pem(String),
    /// JSON Web Key
    Jwk(Jwk),
}

/// One key published by a remote issuer
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteKey {
    pub kid: String,
    pub material: KeyMaterial,
}

/// Source of remote issuers' public keys
#[async_trait]
pub trait RemoteKeySource: Send + Sync {
    /// Fetch every key currently published by `issuer`
    async fn fetch_keys(&self, issuer: &str) -> Result<Vec<RemoteKey>>;
}

/// Key source that GETs each issuer's key endpoint over HTTP
pub struct HttpKeySource {
    endpoints: HashMap<String, String>,
    http_client: reqwest::Client,
}

impl HttpKeySource {
    /// Create a key source whose requests time out after `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoints: HashMap::new(),
            http_client,
        })
    }

    /// Register the key endpoint of an issuer
    pub fn with_endpoint(mut self, issuer: impl Into<String>, url: impl Into<String>) -> Self {
        self.endpoints.insert(issuer.into(), url.into());
        self
    }

    async fn get(&self, url: &str) -> Result<serde_json::Value> {
        let response = self.http_client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BridgeError::KeyFetch(format!(
                "{} returned status {}",
                url,
                status.as_u16()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| BridgeError::InvalidKeySet(e.to_string()))
    }
}

#[async_trait]
impl RemoteKeySource for HttpKeySource {
    async fn fetch_keys(&self, issuer: &str) -> Result<Vec<RemoteKey>> {
        let url = self.endpoints.get(issuer).ok_or_else(|| {
            BridgeError::KeyFetch(format!("no key endpoint configured for issuer {}", issuer))
        })?;

        debug!(issuer = %issuer, url = %url, "Fetching issuer keys");

        // Retry once, and only when no response came back.
        let document = match self.get(url).await {
            Err(e) if e.is_transport() => {
                warn!(issuer = %issuer, error = %e, "Key fetch failed, retrying once");
                self.get(url).await?
            }
            other => other?,
        };

        parse_key_set(&document)
    }
}

/// Parse a key set document in either supported format
pub fn parse_key_set(document: &serde_json::Value) -> Result<Vec<RemoteKey>> {
    let entries = document
        .get("keys")
        .and_then(|k| k.as_array())
        .ok_or_else(|| BridgeError::InvalidKeySet("missing 'keys' array".into()))?;

    let mut keys = Vec::new();
    for entry in entries {
        match entry {
            serde_json::Value::Object(map) if map.contains_key("kty") => {
                let jwk: Jwk = serde_json::from_value(entry.clone())?;
                let kid = jwk
                    .kid
                    .clone()
                    .ok_or_else(|| BridgeError::InvalidKeySet("JWK without kid".into()))?;
                keys.push(RemoteKey {
                    kid,
                    material: KeyMaterial::Jwk(jwk),
                });
            }
            serde_json::Value::Object(map) => {
                for (kid, pem) in map {
                    let pem = pem.as_str().ok_or_else(|| {
                        BridgeError::InvalidKeySet(format!("key '{}' is not a PEM string", kid))
                    })?;
                    keys.push(RemoteKey {
                        kid: kid.clone(),
                        material: KeyMaterial::Pem(pem.to_string()),
                    });
                }
            }
            serde_json::Value::Array(pair) => match pair.as_slice() {
                [serde_json::Value::String(kid), serde_json::Value::String(pem)] => {
                    keys.push(RemoteKey {
                        kid: kid.clone(),
                        material: KeyMaterial::Pem(pem.clone()),
                    });
                }
                _ => {
                    return Err(BridgeError::InvalidKeySet(
                        "expected [kid, pem] pair".into(),
                    ))
                }
            },
            _ => return Err(BridgeError::InvalidKeySet("unrecognised key entry".into())),
        }
    }

    Ok(keys)
}
