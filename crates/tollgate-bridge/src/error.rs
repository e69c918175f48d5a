//! Error types for upstream provider and key endpoint calls

use thiserror::Error;

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors that can occur while talking to an upstream identity provider
#[derive(Error, Debug)]
pub enum BridgeError {
    /// No provider registered under this id
    #[error("Unknown identity provider: {0}")]
    UnknownProvider(String),

    /// The upstream refused or failed the code exchange
    #[error("Code exchange failed: {0}")]
    TokenExchange(String),

    /// The upstream did not return a usable identity
    #[error("Identity lookup failed: {0}")]
    Identity(String),

    /// Failed to fetch a key set from an issuer
    #[error("Failed to fetch keys: {0}")]
    KeyFetch(String),

    /// A key set document could not be understood
    #[error("Invalid key set: {0}")]
    InvalidKeySet(String),

    /// The upstream did not answer in time
    #[error("Upstream request timed out")]
    Timeout,

    /// Transport-level HTTP failure
    #[error("HTTP error: {0}")]
    Http(String),

    /// The provider does not support this operation
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Provider settings are incomplete or malformed
    #[error("Provider misconfigured: {0}")]
    Configuration(String),
}

impl BridgeError {
    /// Whether the failure happened before any response was received
    pub fn is_transport(&self) -> bool {
        matches!(self, BridgeError::Timeout | BridgeError::Http(_))
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BridgeError::Timeout
        } else {
            BridgeError::Http(err.to_string())
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::InvalidKeySet(err.to_string())
    }
}

impl From<url::ParseError> for BridgeError {
    fn from(err: url::ParseError) -> Self {
        BridgeError::Configuration(err.to_string())
    }
}
