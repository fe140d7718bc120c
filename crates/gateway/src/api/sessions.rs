//! Session inspection endpoints.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    #[serde(default, rename = "includeMemory")]
    pub include_memory: bool,
}

/// `GET /sessions` — list stored session summaries.
pub async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    let sessions: Vec<serde_json::Value> = state
        .sessions
        .list()
        .into_iter()
        .map(|(id, messages, version)| {
            json!({ "session_id": id, "messages": messages, "version": version })
        })
        .collect();
    Json(json!({ "sessions": sessions }))
}

/// `GET /sessions/:id?includeMemory=bool` — stored transcript and,
/// optionally, the memory snapshot. 404 if unknown.
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<SessionQuery>,
) -> impl IntoResponse {
    let Some(session) = state.sessions.get(&session_id) else {
        return (
            axum::http::StatusCode::NOT_FOUND,
            Json(json!({ "error": "unknown session" })),
        )
            .into_response();
    };

    let mut body = json!({
        "session_id": session.session_id,
        "version": session.version,
        "created_at": session.created_at,
        "updated_at": session.updated_at,
        "messages": session.messages,
    });
    if query.include_memory {
        body["memory"] = json!({
            "summary_bullets": session
                .summary_bullets
                .iter()
                .map(|b| b.text.clone())
                .collect::<Vec<_>>(),
            "salience": session.salience,
            "last_memory_turn": session.last_memory_turn,
        });
    }
    Json(body).into_response()
}
