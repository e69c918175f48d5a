//! Error types for the Tollgate core

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised while loading or resolving configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("Failed to read configuration from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration document is not valid YAML or has the wrong shape
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// A template in the configuration tree is malformed
    #[error("Malformed template at {path}: {message}")]
    Template { path: String, message: String },

    /// The resolved configuration is semantically invalid
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

/// Errors that can occur in the Tollgate core
#[derive(Error, Debug)]
pub enum CoreError {
    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Key material could not be parsed, encoded or used
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Token signing failed
    #[error("Failed to sign token: {0}")]
    Signing(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Filesystem error while loading keys
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ed25519_dalek::pkcs8::Error> for CoreError {
    fn from(err: ed25519_dalek::pkcs8::Error) -> Self {
        CoreError::Crypto(err.to_string())
    }
}

impl From<ed25519_dalek::pkcs8::spki::Error> for CoreError {
    fn from(err: ed25519_dalek::pkcs8::spki::Error) -> Self {
        CoreError::Crypto(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for CoreError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        CoreError::Signing(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Serialization(err.to_string())
    }
}
