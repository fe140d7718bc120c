//! Per-session turn serialization: one writer per session id.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Error returned when a turn is already in progress for the session.
#[derive(Debug)]
pub struct SessionBusy;

impl std::fmt::Display for SessionBusy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session is busy — a turn is already in progress")
    }
}

impl std::error::Error for SessionBusy {}

/// One `Semaphore(1)` per session id. Holding the permit is holding
/// the session's write slot; it releases on drop. A second request for
/// a busy session is rejected immediately rather than queued — clients
/// retry, queues grow.
#[derive(Default)]
pub struct SessionLockMap {
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl SessionLockMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, session_id: &str) -> Result<OwnedSemaphorePermit, SessionBusy> {
        let sem = {
            let mut locks = self.locks.lock();
            locks
                .entry(session_id.to_owned())
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };
        sem.try_acquire_owned().map_err(|_| SessionBusy)
    }

    /// Drop semaphores that are not currently held.
    pub fn prune_idle(&self) {
        self.locks
            .lock()
            .retain(|_, sem| sem.available_permits() == 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_on_same_session_is_busy() {
        let map = SessionLockMap::new();
        let permit = map.try_acquire("s1").unwrap();
        assert!(map.try_acquire("s1").is_err());
        drop(permit);
        assert!(map.try_acquire("s1").is_ok());
    }

    #[tokio::test]
    async fn different_sessions_are_independent() {
        let map = SessionLockMap::new();
        let _p1 = map.try_acquire("s1").unwrap();
        let _p2 = map.try_acquire("s2").unwrap();
    }

    #[tokio::test]
    async fn prune_keeps_held_locks() {
        let map = SessionLockMap::new();
        let _held = map.try_acquire("busy").unwrap();
        let released = map.try_acquire("idle").unwrap();
        drop(released);

        map.prune_idle();
        assert!(map.try_acquire("busy").is_err());
        assert!(map.try_acquire("idle").is_ok());
    }
}
