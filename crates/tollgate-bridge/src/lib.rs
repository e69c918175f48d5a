//! Tollgate Bridge
//!
//! Everything the broker sends over the network to other identity systems:
//!
//! - **Providers**: upstream identity providers behind the [`UpstreamProvider`]
//!   trait, either direct (Google) or another broker (two-hop federation)
//! - **Keys**: fetching public signing keys of trusted remote issuers
//!
//! ## Usage
//!
//! ```ignore
//! use tollgate_bridge::{ProviderRegistry, HttpKeySource};
//!
//! let providers = ProviderRegistry::from_config(&config)?;
//! let fence = providers.get("fence")?;
//! let redirect = fence.authorization_url(&state)?;
//!
//! let keys = HttpKeySource::new(config.upstream_timeout())?
//!     .with_endpoint(issuer, jwks_url);
//! ```

pub mod error;
pub mod keys;
pub mod providers;
pub mod registry;
pub mod types;

pub use error::{BridgeError, Result};
pub use keys::{HttpKeySource, Jwk, KeyMaterial, RemoteKey, RemoteKeySource};
pub use registry::{ProviderRegistry, ProviderRegistryBuilder, UpstreamProvider};
pub use types::{ProviderKind, UpstreamIdentity, UpstreamTokens};
