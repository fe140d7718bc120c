//! The closed set of structured events a turn can emit.
//!
//! The orchestrator never logs through a global; it pushes [`TurnEvent`]
//! envelopes into a caller-supplied sink. In stream mode the sink is the
//! SSE writer; in sync mode the caller drains events and keeps only the
//! final ones it needs.

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event kinds
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Every event name a turn may emit. The SSE `event:` field carries the
/// snake_case form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Features,
    Status,
    Route,
    Plan,
    Context,
    Tool,
    Citations,
    Activity,
    Token,
    Warning,
    Critique,
    Complete,
    Telemetry,
    Trace,
    Done,
    Error,
    RetrievalFallback,
    ConfidenceEscalation,
    AdaptiveRetrieval,
    CragEvaluation,
    CragResult,
    CragAction,
    CragRefinement,
    CragWebFallback,
    AcademicSearch,
    WebContextTrim,
    QualityGateRefusal,
    SummarySelectionStats,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Features => "features",
            EventKind::Status => "status",
            EventKind::Route => "route",
            EventKind::Plan => "plan",
            EventKind::Context => "context",
            EventKind::Tool => "tool",
            EventKind::Citations => "citations",
            EventKind::Activity => "activity",
            EventKind::Token => "token",
            EventKind::Warning => "warning",
            EventKind::Critique => "critique",
            EventKind::Complete => "complete",
            EventKind::Telemetry => "telemetry",
            EventKind::Trace => "trace",
            EventKind::Done => "done",
            EventKind::Error => "error",
            EventKind::RetrievalFallback => "retrieval_fallback",
            EventKind::ConfidenceEscalation => "confidence_escalation",
            EventKind::AdaptiveRetrieval => "adaptive_retrieval",
            EventKind::CragEvaluation => "crag_evaluation",
            EventKind::CragResult => "crag_result",
            EventKind::CragAction => "crag_action",
            EventKind::CragRefinement => "crag_refinement",
            EventKind::CragWebFallback => "crag_web_fallback",
            EventKind::AcademicSearch => "academic_search",
            EventKind::WebContextTrim => "web_context_trim",
            EventKind::QualityGateRefusal => "quality_gate_refusal",
            EventKind::SummarySelectionStats => "summary_selection_stats",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Envelope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One emitted event: a name from the closed set plus a JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnEvent {
    pub event: EventKind,
    pub data: serde_json::Value,
}

impl TurnEvent {
    pub fn new(event: EventKind, data: serde_json::Value) -> Self {
        Self { event, data }
    }
}

/// Pipeline stages reported through `status` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStage {
    Intake,
    Classifying,
    Planning,
    BudgetingContext,
    Retrieving,
    Synthesizing,
    Critiquing,
    Revising,
    Complete,
}

impl TurnStage {
    pub fn as_str(self) -> &'static str {
        match self {
            TurnStage::Intake => "intake",
            TurnStage::Classifying => "classifying",
            TurnStage::Planning => "planning",
            TurnStage::BudgetingContext => "budgeting_context",
            TurnStage::Retrieving => "retrieving",
            TurnStage::Synthesizing => "synthesizing",
            TurnStage::Critiquing => "critiquing",
            TurnStage::Revising => "revising",
            TurnStage::Complete => "complete",
        }
    }
}
