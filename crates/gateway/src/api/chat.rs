//! Chat endpoints — the primary interface for running turns.
//!
//! - `POST /chat`        — synchronous: returns the full answer
//! - `POST /chat/stream` — SSE: streams the §event set, ends with `done`

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json};
use futures_util::stream::Stream;
use serde::Deserialize;
use serde_json::json;

use gl_domain::events::{EventKind, TurnEvent};

use crate::api::sanitize::sanitize_messages;
use crate::runtime::{run_session, TurnMode, TurnRequest};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request shape
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ChatBody {
    /// Raw messages; validated and sanitized before use.
    pub messages: serde_json::Value,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub feature_overrides: Option<std::collections::BTreeMap<String, serde_json::Value>>,
}

fn bad_request(error: String) -> axum::response::Response {
    (
        axum::http::StatusCode::BAD_REQUEST,
        Json(json!({ "error": error })),
    )
        .into_response()
}

fn prepare(
    state: &AppState,
    body: &ChatBody,
    mode: TurnMode,
) -> Result<TurnRequest, String> {
    let messages = sanitize_messages(&body.messages, &state.config.tuning)?;
    Ok(TurnRequest {
        session_id: body.session_id.clone(),
        messages,
        feature_overrides: body.feature_overrides.clone(),
        mode,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /chat (synchronous)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat(
    State(state): State<AppState>,
    Json(body): Json<ChatBody>,
) -> impl IntoResponse {
    let request = match prepare(&state, &body, TurnMode::Sync) {
        Ok(r) => r,
        Err(e) => return bad_request(e),
    };

    let lock_key = request.session_id.clone().unwrap_or_default();
    let _permit = if !lock_key.is_empty() {
        match state.session_locks.try_acquire(&lock_key) {
            Ok(p) => Some(p),
            Err(busy) => {
                return (
                    axum::http::StatusCode::TOO_MANY_REQUESTS,
                    Json(json!({ "error": busy.to_string() })),
                )
                    .into_response();
            }
        }
    } else {
        None
    };

    let (_turn_id, mut rx) = run_session(state.clone(), request);

    // Drain the event stream; only the terminal events matter here.
    let mut complete: Option<serde_json::Value> = None;
    let mut error: Option<serde_json::Value> = None;
    while let Some(TurnEvent { event, data }) = rx.recv().await {
        match event {
            EventKind::Complete => complete = Some(data),
            EventKind::Error => error = Some(data),
            _ => {}
        }
    }

    match (complete, error) {
        (Some(data), _) => Json(data).into_response(),
        (None, Some(err)) => (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            // Production bodies are generic; correlation id only.
            Json(json!({
                "error": "internal error",
                "correlation_id": err.get("correlation_id"),
            })),
        )
            .into_response(),
        (None, None) => (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "internal error" })),
        )
            .into_response(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /chat/stream (SSE)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat_stream(
    State(state): State<AppState>,
    Json(body): Json<ChatBody>,
) -> impl IntoResponse {
    let request = match prepare(&state, &body, TurnMode::Stream) {
        Ok(r) => r,
        Err(e) => {
            let stream = futures_util::stream::once(async move {
                Ok::<_, std::convert::Infallible>(
                    Event::default()
                        .event("error")
                        .data(json!({ "error": e }).to_string()),
                )
            });
            return Sse::new(stream)
                .keep_alive(KeepAlive::default())
                .into_response();
        }
    };

    let (_turn_id, rx) = run_session(state.clone(), request);
    Sse::new(make_sse_stream(rx))
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn make_sse_stream(
    mut rx: tokio::sync::mpsc::Receiver<TurnEvent>,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        while let Some(turn_event) = rx.recv().await {
            let name = turn_event.event.as_str();
            let data = serde_json::to_string(&turn_event.data).unwrap_or_default();
            yield Ok(Event::default().event(name).data(data));
            if turn_event.event == EventKind::Done {
                break;
            }
        }
    }
}
