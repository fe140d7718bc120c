//! HTTP surface: route table and handlers.

pub mod admin;
pub mod chat;
pub mod responses;
pub mod sanitize;
pub mod sessions;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the router. Admin telemetry is mounted only when
/// `server.expose_admin` is set.
pub fn router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/health", get(admin::health))
        .route("/chat", post(chat::chat))
        .route("/chat/stream", post(chat::chat_stream))
        .route("/sessions", get(sessions::list_sessions))
        .route("/sessions/:id", get(sessions::get_session))
        .route(
            "/responses/:id",
            get(responses::get_response).delete(responses::delete_response),
        )
        .route(
            "/responses/:id/input_items",
            get(responses::list_input_items),
        );

    if state.config.server.expose_admin {
        router = router.route("/admin/telemetry", get(admin::telemetry));
    }

    router.with_state(state)
}
