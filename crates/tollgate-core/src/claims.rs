//! Token claims model
//!
//! Every token minted or accepted by the broker carries a purpose (`pur`)
//! claim. Tokens with a revocable purpose are checked against the blacklist
//! by their token id (`jti`).

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Intended use of a token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    Access,
    Refresh,
    Id,
    ApiKey,
}

impl Purpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::Access => "access",
            Purpose::Refresh => "refresh",
            Purpose::Id => "id",
            Purpose::ApiKey => "api_key",
        }
    }

    /// Whether tokens of this purpose can be blacklisted before they expire
    pub fn is_revocable(&self) -> bool {
        matches!(self, Purpose::Refresh | Purpose::ApiKey)
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Purpose {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "access" => Ok(Purpose::Access),
            "refresh" => Ok(Purpose::Refresh),
            "id" => Ok(Purpose::Id),
            "api_key" => Ok(Purpose::ApiKey),
            other => Err(format!("unknown token purpose: {}", other)),
        }
    }
}

/// JWT claims as issued and validated by the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Issuer
    pub iss: String,

    /// Subject
    #[serde(default)]
    pub sub: String,

    /// Audience; accepts either a single string or an array on the wire
    #[serde(default, deserialize_with = "string_or_seq")]
    pub aud: Vec<String>,

    /// Purpose; empty when the claim is absent
    #[serde(default)]
    pub pur: String,

    /// Token id
    #[serde(default)]
    pub jti: String,

    /// Expiration (seconds since epoch)
    pub exp: i64,

    /// Issued at (seconds since epoch)
    #[serde(default)]
    pub iat: i64,

    /// Authorized party
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azp: Option<String>,

    /// Granted scopes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scope: Vec<String>,

    /// Identity context, including linked accounts
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub context: serde_json::Value,
}

impl Claims {
    /// The parsed purpose, if the claim is present and known
    pub fn purpose(&self) -> Option<Purpose> {
        self.pur.parse().ok()
    }

    /// `context.user.name`, if present
    pub fn username(&self) -> Option<&str> {
        self.context
            .get("user")
            .and_then(|user| user.get("name"))
            .and_then(|name| name.as_str())
    }
}

fn string_or_seq<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

/// Builder for [`Claims`]
///
/// Fills in `jti` (UUIDv4), `iat` (now) and `exp` (now + lifetime).
#[derive(Debug, Clone)]
pub struct ClaimsBuilder {
    iss: String,
    sub: String,
    pur: Purpose,
    aud: Vec<String>,
    lifetime_secs: i64,
    azp: Option<String>,
    scope: Vec<String>,
    context: serde_json::Value,
}

impl ClaimsBuilder {
    pub fn new(iss: impl Into<String>, sub: impl Into<String>, pur: Purpose) -> Self {
        Self {
            iss: iss.into(),
            sub: sub.into(),
            pur,
            aud: Vec::new(),
            lifetime_secs: 3600,
            azp: None,
            scope: Vec::new(),
            context: serde_json::Value::Null,
        }
    }

    pub fn audience<I, S>(mut self, aud: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aud = aud.into_iter().map(Into::into).collect();
        self
    }

    /// Lifetime in seconds; negative values produce an already-expired token
    pub fn lifetime(mut self, secs: i64) -> Self {
        self.lifetime_secs = secs;
        self
    }

    pub fn authorized_party(mut self, azp: impl Into<String>) -> Self {
        self.azp = Some(azp.into());
        self
    }

    pub fn scope(mut self, scope: Vec<String>) -> Self {
        self.scope = scope;
        self
    }

    pub fn context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    pub fn build(self) -> Claims {
        let iat = Utc::now().timestamp();
        Claims {
            iss: self.iss,
            sub: self.sub,
            aud: self.aud,
            pur: self.pur.as_str().to_string(),
            jti: uuid::Uuid::new_v4().to_string(),
            exp: iat + self.lifetime_secs,
            iat,
            azp: self.azp,
            scope: self.scope,
            context: self.context,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_purpose_parse_and_revocable() {
        assert_eq!("api_key".parse::<Purpose>().unwrap(), Purpose::ApiKey);
        assert!("session".parse::<Purpose>().is_err());
        assert!(Purpose::Refresh.is_revocable());
        assert!(Purpose::ApiKey.is_revocable());
        assert!(!Purpose::Access.is_revocable());
        assert!(!Purpose::Id.is_revocable());
    }

    #[test]
    fn test_audience_accepts_string() {
        let claims: Claims = serde_json::from_value(json!({
            "iss": "https://a", "aud": "openid", "exp": 10, "pur": "id"
        }))
        .unwrap();
        assert_eq!(claims.aud, vec!["openid"]);
        assert_eq!(claims.purpose(), Some(Purpose::Id));
    }

    #[test]
    fn test_missing_purpose_is_empty() {
        let claims: Claims = serde_json::from_value(json!({
            "iss": "https://a", "aud": ["openid"], "exp": 10
        }))
        .unwrap();
        assert!(claims.pur.is_empty());
        assert_eq!(claims.purpose(), None);
    }

    #[test]
    fn test_builder_fills_identity_fields() {
        let claims = ClaimsBuilder::new("https://a", "42", Purpose::Access)
            .audience(["openid", "user"])
            .lifetime(60)
            .context(json!({"user": {"name": "alice"}}))
            .build();

        assert_eq!(claims.pur, "access");
        assert_eq!(claims.exp - claims.iat, 60);
        assert_eq!(claims.username(), Some("alice"));
        assert!(uuid::Uuid::parse_str(&claims.jti).is_ok());

        let other = ClaimsBuilder::new("https://a", "42", Purpose::Access).build();
        assert_ne!(claims.jti, other.jti);
    }
}
