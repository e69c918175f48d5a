//! API module for the broker

pub mod csrf;
pub mod error;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use handlers::AppState;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check endpoint
///
/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        // OAuth2 endpoints
        .route(
            "/oauth2/authorize",
            get(handlers::authorize_get).post(handlers::authorize_post),
        )
        .route("/oauth2/token", post(handlers::token))
        .route("/oauth2/revoke", post(handlers::revoke))
        // Upstream login
        .route("/login/{provider}", get(handlers::login))
        .route("/login/{provider}/login", get(handlers::login_callback))
        // Keys and sessions
        .route("/jwt/keys", get(handlers::jwt_keys))
        .route("/user", get(handlers::current_user))
        .route("/logout", get(handlers::logout))
        // Middleware
        .layer(middleware::from_fn_with_state(state.clone(), csrf::guard))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
