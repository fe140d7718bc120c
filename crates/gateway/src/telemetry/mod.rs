//! In-memory telemetry: a bounded ring of redacted turn records plus
//! queryable aggregates.

pub mod redaction;

use crate::runtime::events::RecordedEvent;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Completed,
    Refused,
    Failed,
    Cancelled,
}

/// The telemetry fingerprint of one turn. Sealed at completion and
/// redacted before it enters the ring.
#[derive(Debug, Clone, Serialize)]
pub struct TurnRecord {
    pub turn_id: String,
    pub session_id: String,
    pub mode: &'static str,
    pub question: String,
    pub answer: String,
    pub route: Option<String>,
    pub plan: serde_json::Value,
    pub context_budget: serde_json::Value,
    pub retrieval_summary: serde_json::Value,
    pub critic_history: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adaptive_stats: Option<serde_json::Value>,
    pub summary_selection_mode: Option<String>,
    pub coverage: Option<f64>,
    pub events: Vec<RecordedEvent>,
    pub status: TurnStatus,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Queryable aggregates over the retained records.
#[derive(Debug, Clone, Serialize)]
pub struct Aggregates {
    pub turns: usize,
    pub by_route: BTreeMap<String, usize>,
    pub by_mode: BTreeMap<String, usize>,
    pub by_summary_selection: BTreeMap<String, usize>,
    pub average_coverage: Option<f64>,
    pub error_rate: f64,
}

/// Bounded in-memory ring of turn records. Single-writer lock; readers
/// receive snapshot clones.
pub struct TelemetryStore {
    ring: Mutex<VecDeque<TurnRecord>>,
    capacity: usize,
}

impl TelemetryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            capacity: capacity.max(1),
        }
    }

    /// Redact and retain a sealed turn record.
    pub fn record(&self, mut record: TurnRecord) {
        record.question = redaction::redact(&record.question);
        record.answer = redaction::redact(&record.answer);
        for event in &mut record.events {
            redaction::redact_value(&mut event.data);
        }
        redaction::redact_value(&mut record.plan);
        redaction::redact_value(&mut record.critic_history);

        let mut ring = self.ring.lock();
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(record);
    }

    /// Snapshot of the retained records, oldest first.
    pub fn records(&self) -> Vec<TurnRecord> {
        self.ring.lock().iter().cloned().collect()
    }

    pub fn aggregates(&self) -> Aggregates {
        let ring = self.ring.lock();
        let mut by_route: BTreeMap<String, usize> = BTreeMap::new();
        let mut by_mode: BTreeMap<String, usize> = BTreeMap::new();
        let mut by_summary_selection: BTreeMap<String, usize> = BTreeMap::new();
        let mut coverage_sum = 0.0;
        let mut coverage_n = 0usize;
        let mut errors = 0usize;

        for record in ring.iter() {
            if let Some(route) = &record.route {
                *by_route.entry(route.clone()).or_default() += 1;
            }
            *by_mode.entry(record.mode.to_string()).or_default() += 1;
            if let Some(mode) = &record.summary_selection_mode {
                *by_summary_selection.entry(mode.clone()).or_default() += 1;
            }
            if let Some(c) = record.coverage {
                coverage_sum += c;
                coverage_n += 1;
            }
            if record.status == TurnStatus::Failed {
                errors += 1;
            }
        }

        Aggregates {
            turns: ring.len(),
            by_route,
            by_mode,
            by_summary_selection,
            average_coverage: (coverage_n > 0).then(|| coverage_sum / coverage_n as f64),
            error_rate: if ring.is_empty() {
                0.0
            } else {
                errors as f64 / ring.len() as f64
            },
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, status: TurnStatus, coverage: Option<f64>) -> TurnRecord {
        TurnRecord {
            turn_id: id.into(),
            session_id: "s".into(),
            mode: "sync",
            question: format!("q from a@b.com about {id}"),
            answer: "a".into(),
            route: Some("research".into()),
            plan: serde_json::json!({}),
            context_budget: serde_json::json!({}),
            retrieval_summary: serde_json::json!({}),
            critic_history: serde_json::json!([]),
            adaptive_stats: None,
            summary_selection_mode: Some("recency".into()),
            coverage,
            events: Vec::new(),
            status,
        }
    }

    #[test]
    fn ring_is_bounded() {
        let store = TelemetryStore::new(2);
        for i in 0..5 {
            store.record(record(&format!("t{i}"), TurnStatus::Completed, None));
        }
        let records = store.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].turn_id, "t3");
        assert_eq!(records[1].turn_id, "t4");
    }

    #[test]
    fn records_are_redacted_on_write() {
        let store = TelemetryStore::new(4);
        store.record(record("t1", TurnStatus::Completed, None));
        let stored = &store.records()[0];
        assert!(stored.question.contains("[EMAIL]"));
        assert!(!stored.question.contains("a@b.com"));
    }

    #[test]
    fn aggregates_count_and_average() {
        let store = TelemetryStore::new(10);
        store.record(record("t1", TurnStatus::Completed, Some(0.8)));
        store.record(record("t2", TurnStatus::Failed, Some(0.4)));
        store.record(record("t3", TurnStatus::Refused, None));

        let agg = store.aggregates();
        assert_eq!(agg.turns, 3);
        assert_eq!(agg.by_route["research"], 3);
        assert_eq!(agg.by_mode["sync"], 3);
        assert!((agg.average_coverage.unwrap() - 0.6).abs() < 1e-9);
        assert!((agg.error_rate - 1.0 / 3.0).abs() < 1e-9);
    }
}
