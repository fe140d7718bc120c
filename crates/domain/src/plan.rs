//! Intent classification and retrieval planning value types.

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Intent & route
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The closed intent set for the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Faq,
    Research,
    Factual,
    Conversational,
}

impl Intent {
    pub fn as_str(self) -> &'static str {
        match self {
            Intent::Faq => "faq",
            Intent::Research => "research",
            Intent::Factual => "factual",
            Intent::Conversational => "conversational",
        }
    }
}

/// Retrieval strategy attached to a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStrategy {
    /// Hybrid keyword+vector search with reranking.
    Hybrid,
    /// Summary-first lazy retrieval.
    Lazy,
    /// No retrieval (purely conversational turns).
    None,
}

/// Static per-intent route configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    pub model: String,
    pub retrieval_strategy: RetrievalStrategy,
}

/// Output of the intent classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentClassification {
    pub intent: Intent,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plan
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Action of a single plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    VectorSearch,
    WebSearch,
    Both,
    None,
}

/// One retrieval step proposed by the planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub action: PlanAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k: Option<usize>,
}

/// The planner's output for one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanSummary {
    /// Planner self-confidence in `[0, 1]`.
    pub confidence: f64,
    pub steps: Vec<PlanStep>,
}

impl PlanSummary {
    /// Safe default when planning fails or returns an invalid object:
    /// a single vector-search step at middling confidence.
    pub fn fallback() -> Self {
        Self {
            confidence: 0.5,
            steps: vec![PlanStep {
                action: PlanAction::VectorSearch,
                query: None,
                k: None,
            }],
        }
    }

    /// Whether any step requests the given action (directly or via `Both`).
    pub fn requests(&self, action: PlanAction) -> bool {
        self.steps.iter().any(|s| {
            s.action == action
                || (s.action == PlanAction::Both
                    && matches!(action, PlanAction::VectorSearch | PlanAction::WebSearch))
        })
    }
}
