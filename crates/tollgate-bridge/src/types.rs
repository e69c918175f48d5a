//! Types exchanged with upstream identity providers

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// How a provider participates in the authorization flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Single hop: the provider authenticates the user itself (e.g. Google)
    Direct,
    /// Second hop: the provider is another broker whose ID token must be validated
    Federated,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Direct => write!(f, "direct"),
            ProviderKind::Federated => write!(f, "federated"),
        }
    }
}

/// Token endpoint response from an upstream provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpstreamTokens {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

impl UpstreamTokens {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: Some("Bearer".into()),
            ..Default::default()
        }
    }

    pub fn with_id_token(mut self, id_token: impl Into<String>) -> Self {
        self.id_token = Some(id_token.into());
        self
    }
}

/// An identity asserted by a direct provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamIdentity {
    /// Stable account id at the provider
    pub subject: String,
    /// Username the broker will use locally (usually the email)
    pub username: String,
    /// Remaining claims returned by the provider
    #[serde(default)]
    pub claims: HashMap<String, serde_json::Value>,
}

impl UpstreamIdentity {
    pub fn new(subject: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            username: username.into(),
            claims: HashMap::new(),
        }
    }
}
