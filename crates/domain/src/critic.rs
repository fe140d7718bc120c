//! Critic and CRAG self-grading value types.

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Critic
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriticAction {
    Accept,
    Revise,
}

/// The critic's verdict on one synthesized answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriticReport {
    pub grounded: bool,
    /// Estimated share of the answer supported by references, in `[0, 1]`.
    pub coverage: f64,
    #[serde(default)]
    pub issues: Vec<String>,
    pub action: CriticAction,
    /// Set when the report was synthesized by error handling rather than
    /// produced by the model.
    #[serde(default)]
    pub forced: bool,
}

impl CriticReport {
    /// The conservative fallback used on any critic failure. Never
    /// defaults to accept.
    pub fn conservative_revise(reason: &str) -> Self {
        Self {
            grounded: false,
            coverage: 0.0,
            issues: vec![format!("critic_error:{reason}")],
            action: CriticAction::Revise,
            forced: true,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CRAG self-grade
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CragConfidence {
    Correct,
    Ambiguous,
    Incorrect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CragAction {
    UseDocuments,
    RefineDocuments,
    WebFallback,
}

/// Per-document relevance judgment in a CRAG evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocRelevance {
    pub doc_index: usize,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevant_sentences: Option<Vec<String>>,
}

/// Corrective-RAG evaluation of a retrieval result set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CragEvaluation {
    pub confidence: CragConfidence,
    pub action: CragAction,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance_scores: Option<Vec<DocRelevance>>,
}
