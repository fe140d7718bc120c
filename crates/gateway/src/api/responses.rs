//! Pass-throughs to the LLM gateway's server-stored-response
//! management.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct IncludeQuery {
    #[serde(default)]
    pub include: Option<String>,
}

fn upstream_error(e: gl_domain::Error) -> axum::response::Response {
    let status = match e.kind {
        gl_domain::ErrorKind::Upstream4xx => axum::http::StatusCode::NOT_FOUND,
        _ => axum::http::StatusCode::BAD_GATEWAY,
    };
    (
        status,
        Json(json!({
            "error": e.kind.as_str(),
            "correlation_id": e.correlation_id,
        })),
    )
        .into_response()
}

/// `GET /responses/:id?include=…`
pub async fn get_response(
    State(state): State<AppState>,
    Path(response_id): Path<String>,
    Query(query): Query<IncludeQuery>,
) -> impl IntoResponse {
    match state
        .llm
        .get_response(&response_id, query.include.as_deref())
        .await
    {
        Ok(body) => Json(body).into_response(),
        Err(e) => upstream_error(e),
    }
}

/// `DELETE /responses/:id`
pub async fn delete_response(
    State(state): State<AppState>,
    Path(response_id): Path<String>,
) -> impl IntoResponse {
    match state.llm.delete_response(&response_id).await {
        Ok(body) => Json(body).into_response(),
        Err(e) => upstream_error(e),
    }
}

/// `GET /responses/:id/input_items`
pub async fn list_input_items(
    State(state): State<AppState>,
    Path(response_id): Path<String>,
) -> impl IntoResponse {
    match state.llm.list_input_items(&response_id).await {
        Ok(body) => Json(body).into_response(),
        Err(e) => upstream_error(e),
    }
}
