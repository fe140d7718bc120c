//! Per-session conversational state.

use crate::message::Message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One rolling-summary bullet, optionally carrying its embedding so
/// semantic selection does not re-embed on every turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryBullet {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl SummaryBullet {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            embedding: None,
        }
    }
}

/// The durable state of one session.
///
/// Owned by the session store; the orchestrator borrows a snapshot for
/// the duration of one turn and writes back at the end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub summary_bullets: Vec<SummaryBullet>,
    /// Pinned user preferences and critical facts; always budgeted
    /// last for reduction.
    #[serde(default)]
    pub salience: Vec<String>,
    /// Index of the last turn folded into the rolling summary.
    #[serde(default)]
    pub last_memory_turn: usize,
    /// Persisted per-session feature overrides.
    #[serde(default)]
    pub feature_overrides: std::collections::BTreeMap<String, serde_json::Value>,
    /// Server-stored response id of the previous turn, for chaining.
    #[serde(default)]
    pub last_response_id: Option<String>,
    /// Bumped on every write-back.
    #[serde(default)]
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            messages: Vec::new(),
            summary_bullets: Vec::new(),
            salience: Vec::new(),
            last_memory_turn: 0,
            feature_overrides: std::collections::BTreeMap::new(),
            last_response_id: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}
