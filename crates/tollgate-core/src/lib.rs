//! # Tollgate Core
//!
//! Shared building blocks of the Tollgate identity broker:
//!
//! - **Configuration**: scoped resolution of the default and deployment
//!   configuration trees ([`resolve`]) into a typed, immutable
//!   [`BrokerConfig`]
//! - **Claims**: the token claims model and the purpose (`pur`) taxonomy
//! - **Keys**: Ed25519 signing keys and token signing

pub mod claims;
pub mod config;
pub mod crypto;
pub mod error;
pub mod resolve;

pub use claims::{Claims, ClaimsBuilder, Purpose};
pub use config::{BrokerConfig, OAuthClientConfig};
pub use crypto::{load_key_dir, KeyPair};
pub use error::{ConfigError, CoreError, Result};
pub use resolve::{resolve, ResolveWarning, Resolved};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
