//! Durable session-state store.
//!
//! Persists sessions in `sessions.json` under the configured state
//! path. The orchestrator takes a snapshot at turn start and writes
//! back at turn end; write-back bumps the version counter. Readers may
//! observe the previous turn's state while a turn is in flight — the
//! per-session turn lock in the gateway serializes writers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::RwLock;

use gl_domain::error::{Error, Result};
use gl_domain::session::SessionState;

/// Session store backed by a JSON file.
pub struct SessionStore {
    sessions_path: PathBuf,
    sessions: RwLock<HashMap<String, SessionState>>,
}

impl SessionStore {
    /// Load or create the store at `state_path/sessions.json`.
    pub fn new(state_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_path).map_err(Error::from)?;

        let sessions_path = state_path.join("sessions.json");
        let sessions = if sessions_path.exists() {
            let raw = std::fs::read_to_string(&sessions_path).map_err(Error::from)?;
            serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "sessions.json unreadable; starting empty");
                HashMap::new()
            })
        } else {
            HashMap::new()
        };

        tracing::info!(
            sessions = sessions.len(),
            path = %sessions_path.display(),
            "session store loaded"
        );

        Ok(Self {
            sessions_path,
            sessions: RwLock::new(sessions),
        })
    }

    /// Snapshot a session for one turn, creating it if unknown.
    /// Returns `(state, is_new)`.
    pub fn snapshot_or_create(&self, session_id: &str) -> (SessionState, bool) {
        {
            let sessions = self.sessions.read();
            if let Some(state) = sessions.get(session_id) {
                return (state.clone(), false);
            }
        }

        let state = SessionState::new(session_id);
        let mut sessions = self.sessions.write();
        // Double-check under the write lock.
        let entry = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| state.clone());
        let is_new = entry.version == 0 && entry.messages.is_empty();
        (entry.clone(), is_new)
    }

    /// Snapshot without creating.
    pub fn get(&self, session_id: &str) -> Option<SessionState> {
        self.sessions.read().get(session_id).cloned()
    }

    /// Write back the state produced by a completed turn. Bumps the
    /// version; the stored value always reflects whole turns.
    pub fn write_back(&self, mut state: SessionState) {
        state.version += 1;
        state.updated_at = Utc::now();
        let mut sessions = self.sessions.write();
        sessions.insert(state.session_id.clone(), state);
    }

    /// List session summaries (id, message count, version).
    pub fn list(&self) -> Vec<(String, usize, u64)> {
        self.sessions
            .read()
            .values()
            .map(|s| (s.session_id.clone(), s.messages.len(), s.version))
            .collect()
    }

    /// Persist the current state to disk.
    pub fn flush(&self) -> Result<()> {
        let json = {
            let sessions = self.sessions.read();
            serde_json::to_string_pretty(&*sessions)?
        };
        std::fs::write(&self.sessions_path, json).map_err(Error::from)?;
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use gl_domain::message::Message;

    #[test]
    fn snapshot_creates_new_session_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();

        let (state, is_new) = store.snapshot_or_create("s-1");
        assert!(is_new);
        assert_eq!(state.version, 0);

        let (_, is_new) = store.snapshot_or_create("s-1");
        assert!(is_new, "still new until a turn writes back");
    }

    #[test]
    fn write_back_bumps_version() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();

        let (mut state, _) = store.snapshot_or_create("s-1");
        state.messages.push(Message::user("q"));
        store.write_back(state);

        let stored = store.get("s-1").unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.messages.len(), 1);

        let (_, is_new) = store.snapshot_or_create("s-1");
        assert!(!is_new);
    }

    #[test]
    fn readers_see_previous_turn_until_write_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();

        let (mut in_flight, _) = store.snapshot_or_create("s-1");
        in_flight.messages.push(Message::user("pending"));

        // The snapshot is private to the turn; readers still see empty.
        assert!(store.get("s-1").unwrap().messages.is_empty());

        store.write_back(in_flight);
        assert_eq!(store.get("s-1").unwrap().messages.len(), 1);
    }

    #[test]
    fn flush_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SessionStore::new(dir.path()).unwrap();
            let (mut state, _) = store.snapshot_or_create("persisted");
            state.messages.push(Message::user("hello"));
            state.salience.push("prefers metric units".into());
            store.write_back(state);
            store.flush().unwrap();
        }

        let reloaded = SessionStore::new(dir.path()).unwrap();
        let state = reloaded.get("persisted").unwrap();
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.salience, vec!["prefers metric units"]);
        assert_eq!(state.version, 1);
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sessions.json"), "{not json").unwrap();
        let store = SessionStore::new(dir.path()).unwrap();
        assert!(store.list().is_empty());
    }
}
