//! Retrieval-quality and adaptive-reformulation value types.

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Quality vector
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The quality tuple computed from a retrieval result set, driving the
/// adaptive reformulation loop. All axes are in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QualityVector {
    /// How much of the query the results cover.
    pub coverage: f64,
    /// 1 − mean pairwise cosine similarity between reference embeddings.
    pub diversity: f64,
    /// Mean domain/source authority.
    pub authority: f64,
    /// Decayed age of the result set.
    pub freshness: f64,
}

/// What pushed the adaptive loop into reformulating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdaptiveTrigger {
    Coverage,
    Diversity,
    Both,
}

impl QualityVector {
    /// Which threshold(s) this quality vector violates, if any.
    /// Boundary values are acceptable: a value exactly at a threshold
    /// does not trigger.
    pub fn trigger(&self, min_coverage: f64, min_diversity: f64) -> Option<AdaptiveTrigger> {
        let low_coverage = self.coverage < min_coverage;
        let low_diversity = self.diversity < min_diversity;
        match (low_coverage, low_diversity) {
            (true, true) => Some(AdaptiveTrigger::Both),
            (true, false) => Some(AdaptiveTrigger::Coverage),
            (false, true) => Some(AdaptiveTrigger::Diversity),
            (false, false) => None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adaptive stats
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One attempt inside the adaptive reformulation loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptStat {
    pub attempt: usize,
    pub query: String,
    pub quality: QualityVector,
    pub latency_ms: u64,
}

/// Thresholds the adaptive loop was configured with.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AdaptiveThresholds {
    pub min_coverage: f64,
    pub min_diversity: f64,
}

/// Telemetry fingerprint of one adaptive-retrieval run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveStats {
    pub attempts: usize,
    pub triggered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_reason: Option<AdaptiveTrigger>,
    pub thresholds: AdaptiveThresholds,
    pub initial_quality: QualityVector,
    pub final_quality: QualityVector,
    pub reformulations: Vec<String>,
    pub per_attempt: Vec<AttemptStat>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Activity
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One step in the per-turn activity trail shown to the UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityStep {
    /// Step kind, e.g. `vector_search`, `web_search`,
    /// `confidence_escalation`, `retrieval_fallback`.
    pub kind: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl ActivityStep {
    pub fn new(kind: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            description: description.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_reports_which_axis_is_low() {
        let q = QualityVector {
            coverage: 0.2,
            diversity: 0.25,
            authority: 0.5,
            freshness: 0.5,
        };
        assert_eq!(q.trigger(0.4, 0.3), Some(AdaptiveTrigger::Both));
        assert_eq!(q.trigger(0.4, 0.2), Some(AdaptiveTrigger::Coverage));
        assert_eq!(q.trigger(0.1, 0.3), Some(AdaptiveTrigger::Diversity));
        assert_eq!(q.trigger(0.1, 0.2), None);
    }

    #[test]
    fn value_exactly_at_threshold_does_not_trigger() {
        let q = QualityVector {
            coverage: 0.4,
            diversity: 0.3,
            ..Default::default()
        };
        assert_eq!(q.trigger(0.4, 0.3), None);
    }
}
