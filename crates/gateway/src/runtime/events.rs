//! The event sender threaded through the pipeline.
//!
//! Wraps a bounded mpsc channel (back-pressure: if the consumer stalls,
//! `emit` suspends) and mirrors every event into the turn's telemetry
//! record.

use chrono::{DateTime, Utc};
use gl_domain::events::{EventKind, TurnEvent, TurnStage};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

/// One event as captured for the turn record.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RecordedEvent {
    pub event: EventKind,
    pub data: serde_json::Value,
    pub t: DateTime<Utc>,
}

/// Emits events to the caller's sink and records them for telemetry.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<TurnEvent>,
    recorded: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl EventSender {
    /// Build a sender plus the receiving half for the caller.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<TurnEvent>) {
        let (tx, rx) = mpsc::channel(buffer);
        (
            Self {
                tx,
                recorded: Arc::new(Mutex::new(Vec::new())),
            },
            rx,
        )
    }

    /// Emit one event. Send failures mean the consumer went away; the
    /// pipeline keeps running so the turn can still be recorded.
    pub async fn emit(&self, event: EventKind, data: serde_json::Value) {
        self.recorded.lock().push(RecordedEvent {
            event,
            data: data.clone(),
            t: Utc::now(),
        });
        if self.tx.send(TurnEvent::new(event, data)).await.is_err() {
            tracing::debug!(event = event.as_str(), "event consumer dropped");
        }
    }

    /// Emit a `status` stage transition.
    pub async fn status(&self, stage: TurnStage) {
        self.emit(
            EventKind::Status,
            serde_json::json!({ "stage": stage.as_str() }),
        )
        .await;
    }

    /// Snapshot the recorded events for the turn record.
    pub fn recorded(&self) -> Vec<RecordedEvent> {
        self.recorded.lock().clone()
    }
}
