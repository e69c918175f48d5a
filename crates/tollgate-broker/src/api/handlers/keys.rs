//! Public key publication

use axum::{extract::State, Json};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::AppState;

/// Response of GET /jwt/keys: one `{kid: pem}` object per key
#[derive(Debug, Serialize)]
pub struct KeysResponse {
    pub keys: Vec<BTreeMap<String, String>>,
}

/// GET /jwt/keys
pub async fn jwt_keys(State(state): State<Arc<AppState>>) -> Json<KeysResponse> {
    let keys = state
        .registry
        .public_keys()
        .into_iter()
        .map(|(kid, pem)| BTreeMap::from([(kid, pem)]))
        .collect();

    Json(KeysResponse { keys })
}
