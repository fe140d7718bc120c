//! Shared application state passed to all API handlers.

use std::sync::Arc;

use gl_contextpack::ContextBudgeter;
use gl_domain::config::Config;
use gl_providers::traits::LlmGateway;
use gl_retrieval::academic::AcademicSearch;
use gl_retrieval::search::SearchGateway;
use gl_retrieval::web::WebSearchGateway;
use gl_sessions::SessionStore;

use crate::runtime::cancel::CancelMap;
use crate::runtime::session_lock::SessionLockMap;
use crate::telemetry::TelemetryStore;

/// Shared application state.
///
/// The three outbound capabilities (LLM, index search, web search) are
/// trait objects so tests and alternative deployments can inject their
/// own implementations.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,

    // ── Outbound capabilities ─────────────────────────────────────
    pub llm: Arc<dyn LlmGateway>,
    pub search: Arc<dyn SearchGateway>,
    pub web: Arc<dyn WebSearchGateway>,
    pub academic: Arc<AcademicSearch>,

    // ── Pipeline services ─────────────────────────────────────────
    pub budgeter: Arc<ContextBudgeter>,
    pub sessions: Arc<SessionStore>,
    pub telemetry: Arc<TelemetryStore>,

    // ── Turn coordination ─────────────────────────────────────────
    pub session_locks: Arc<SessionLockMap>,
    pub cancel_map: Arc<CancelMap>,

    // ── Security (startup-computed) ───────────────────────────────
    /// SHA-256 of the admin bearer token. `None` = development mode,
    /// admin endpoints (if exposed) answer without auth.
    pub admin_token_hash: Option<Vec<u8>>,
}
