//! Tollgate Broker
//!
//! Multi-tenant OAuth2/OIDC identity broker. The broker:
//! - Validates tokens from itself and from trusted upstream brokers
//! - Revokes refresh tokens and API keys
//! - Federates authorization-code logins to Google or another broker
//! - Mints access, ID and refresh tokens carrying the user's linked accounts
//!
//! ## API Endpoints
//!
//! - `GET /health` - Liveness check
//! - `GET|POST /oauth2/authorize` - Start an authorization-code login
//! - `POST /oauth2/token` - Redeem a code or a refresh token
//! - `POST /oauth2/revoke` - Revoke a refresh token or API key
//! - `GET /login/{provider}` - Redirect to the upstream provider
//! - `GET /login/{provider}/login` - Upstream callback
//! - `GET /jwt/keys` - Public signing keys
//! - `GET /user` - The user behind a bearer access token
//! - `GET /logout` - End the browser session

pub mod api;
pub mod core;
pub mod keys;
pub mod storage;

pub use api::create_router;
pub use api::handlers::AppState;
pub use core::{AuthorizationFlowCoordinator, Blacklist, TokenIssuer, TokenValidationError, TokenValidator};
pub use keys::{KeyRegistry, KeyResolutionError};
pub use storage::{BrokerStore, MemoryStore, OAuthClient};
#[cfg(feature = "postgres")]
pub use storage::PostgresStore;
