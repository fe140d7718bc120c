//! Per-turn cancellation tokens.
//!
//! Every running turn registers a token keyed by session id. Callers
//! cancel through the map; the pipeline checks the token at every
//! suspension point and aborts cleanly without writing partial state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// A cancellation token checked by the pipeline between stages.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Error out when cancellation was requested; used with `?` at
    /// suspension points.
    pub fn check(&self) -> gl_domain::Result<()> {
        if self.is_cancelled() {
            Err(gl_domain::Error::cancelled("turn cancelled by caller"))
        } else {
            Ok(())
        }
    }
}

/// Active cancellation tokens per session id.
#[derive(Default)]
pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a fresh token for a session's turn.
    pub fn register(&self, session_id: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens
            .lock()
            .insert(session_id.to_owned(), token.clone());
        token
    }

    /// Cancel the running turn for a session. Returns whether a token
    /// was registered.
    pub fn cancel(&self, session_id: &str) -> bool {
        match self.tokens.lock().get(session_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove the token when a turn finishes.
    pub fn remove(&self, session_id: &str) {
        self.tokens.lock().remove(session_id);
    }
}
