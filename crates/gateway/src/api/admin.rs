//! Health and development-only telemetry endpoints.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json};
use serde_json::json;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::state::AppState;

/// `GET /health` — build info and configured-capability readiness.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "name": "groundline",
        "version": env!("CARGO_PKG_VERSION"),
        "ready": {
            "llm": !state.config.llm.base_url.is_empty(),
            "search": !state.config.search.endpoint.is_empty(),
            "web": !state.config.web.endpoint.is_empty(),
        },
    }))
}

/// Constant-time bearer comparison against the startup-hashed token.
fn admin_authorized(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(expected_hash) = &state.admin_token_hash else {
        // No token configured: development mode, endpoint is open
        // (it is only mounted when expose_admin is set).
        return true;
    };
    let Some(presented) = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    else {
        return false;
    };
    let presented_hash = Sha256::digest(presented.as_bytes());
    presented_hash.as_slice().ct_eq(expected_hash).into()
}

/// `GET /admin/telemetry` — current ring + aggregates. Development
/// only; mounted behind `server.expose_admin`.
pub async fn telemetry(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if !admin_authorized(&state, &headers) {
        return (
            axum::http::StatusCode::FORBIDDEN,
            Json(json!({ "error": "forbidden" })),
        )
            .into_response();
    }
    Json(json!({
        "aggregates": state.telemetry.aggregates(),
        "records": state.telemetry.records(),
    }))
    .into_response()
}
