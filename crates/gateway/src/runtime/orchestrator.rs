//! The session orchestrator: the top-level state machine for one turn.
//!
//! Entry point: [`run_session`] spawns the pipeline task and returns a
//! channel of [`TurnEvent`]s. The event order is fixed: `features`
//! first, `status` transitions as the pipeline advances, `token`
//! events during streaming synthesis, then `citations`, `activity`,
//! `complete`, and finally `done`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;
use tracing::Instrument;

use gl_domain::config::FeatureSet;
use gl_domain::error::{Error, ErrorKind, Result};
use gl_domain::events::{EventKind, TurnEvent, TurnStage};
use gl_domain::message::{Message, Role};
use gl_domain::plan::{Intent, PlanSummary, RetrievalStrategy};
use gl_domain::reference::Citation;
use gl_domain::session::{SessionState, SummaryBullet};
use gl_sessions::{derive_session_id, sanitize_session_id};

use crate::runtime::cancel::CancelToken;
use crate::runtime::critic::{CriticLoop, LoopInput};
use crate::runtime::dispatcher::{DispatchInput, Dispatcher};
use crate::runtime::events::EventSender;
use crate::runtime::synthesizer::{extract_citation_indices, Synthesizer};
use crate::runtime::{planner, router};
use crate::state::AppState;
use crate::telemetry::{TurnRecord, TurnStatus};

/// Event channel depth; the pipeline blocks when the consumer stalls.
const EVENT_BUFFER: usize = 64;

/// Hard ceiling on one turn, spanning every stage and revision.
const TURN_DEADLINE: std::time::Duration = std::time::Duration::from_secs(180);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnMode {
    Sync,
    Stream,
}

impl TurnMode {
    pub fn as_str(self) -> &'static str {
        match self {
            TurnMode::Sync => "sync",
            TurnMode::Stream => "stream",
        }
    }
}

/// Input to one turn (already sanitized by the API layer).
pub struct TurnRequest {
    pub session_id: Option<String>,
    pub messages: Vec<Message>,
    pub feature_overrides: Option<BTreeMap<String, serde_json::Value>>,
    pub mode: TurnMode,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// run_session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run one turn. Returns the turn id and the event receiver; the
/// pipeline runs on its own task and finishes with `complete` + `done`
/// (or `error` + `done`).
pub fn run_session(state: AppState, request: TurnRequest) -> (String, mpsc::Receiver<TurnEvent>) {
    let turn_id = uuid::Uuid::new_v4().to_string();
    let (events, rx) = EventSender::channel(EVENT_BUFFER);

    let span = tracing::info_span!("turn", turn_id = %turn_id, mode = request.mode.as_str());
    let task_turn_id = turn_id.clone();
    tokio::spawn(
        async move {
            let question = request
                .messages
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .map(|m| m.content.clone())
                .unwrap_or_default();
            let mode = request.mode;

            let result = run_turn_inner(&state, request, &task_turn_id, &events).await;

            match result {
                Ok(record) => {
                    state.telemetry.record(record);
                }
                Err(e) if e.kind == ErrorKind::Cancelled => {
                    events
                        .emit(
                            EventKind::Error,
                            json!({ "kind": "cancelled", "correlation_id": e.correlation_id }),
                        )
                        .await;
                    events.emit(EventKind::Done, json!({})).await;
                    state.telemetry.record(failure_record(
                        &task_turn_id,
                        mode,
                        &question,
                        TurnStatus::Cancelled,
                        &events,
                    ));
                }
                Err(e) => {
                    tracing::error!(error = %e, "turn failed");
                    events
                        .emit(
                            EventKind::Error,
                            json!({
                                "kind": e.kind.as_str(),
                                "message": "the request could not be completed",
                                "correlation_id": e.correlation_id,
                            }),
                        )
                        .await;
                    events
                        .emit(
                            EventKind::Complete,
                            json!({
                                "answer": "I do not know. (An internal error interrupted this turn)",
                                "citations": [],
                                "activity": [],
                                "metadata": { "error_kind": e.kind.as_str() },
                            }),
                        )
                        .await;
                    events.emit(EventKind::Done, json!({})).await;
                    state.telemetry.record(failure_record(
                        &task_turn_id,
                        mode,
                        &question,
                        TurnStatus::Failed,
                        &events,
                    ));
                }
            }
        }
        .instrument(span),
    );

    (turn_id, rx)
}

fn failure_record(
    turn_id: &str,
    mode: TurnMode,
    question: &str,
    status: TurnStatus,
    events: &EventSender,
) -> TurnRecord {
    TurnRecord {
        turn_id: turn_id.to_string(),
        session_id: String::new(),
        mode: mode.as_str(),
        question: question.to_string(),
        answer: String::new(),
        route: None,
        plan: json!(null),
        context_budget: json!(null),
        retrieval_summary: json!(null),
        critic_history: json!([]),
        adaptive_stats: None,
        summary_selection_mode: None,
        coverage: None,
        events: events.recorded(),
        status,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// The pipeline
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run_turn_inner(
    state: &AppState,
    request: TurnRequest,
    turn_id: &str,
    events: &EventSender,
) -> Result<TurnRecord> {
    // ── Intake ─────────────────────────────────────────────────────
    let question = request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.clone())
        .ok_or_else(|| Error::validation("request contains no user message"))?;

    let session_id = match &request.session_id {
        Some(raw) => sanitize_session_id(raw)?,
        None => derive_session_id(&request.messages, "anonymous"),
    };

    let cancel = state.cancel_map.register(&session_id);
    let result = match tokio::time::timeout(
        TURN_DEADLINE,
        run_pipeline(
            state,
            &request,
            turn_id,
            &session_id,
            &question,
            events,
            &cancel,
        ),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => {
            // The deadline fired: cancel so any stage still polling a
            // token stops, and surface a timeout.
            cancel.cancel();
            Err(Error::timeout(format!(
                "turn exceeded {}s deadline",
                TURN_DEADLINE.as_secs()
            )))
        }
    };
    state.cancel_map.remove(&session_id);
    result
}

#[allow(clippy::too_many_arguments)]
async fn run_pipeline(
    state: &AppState,
    request: &TurnRequest,
    turn_id: &str,
    session_id: &str,
    question: &str,
    events: &EventSender,
    cancel: &CancelToken,
) -> Result<TurnRecord> {
    let config = &state.config;
    let (mut session, is_new) = state.sessions.snapshot_or_create(session_id);
    if is_new {
        tracing::info!(session_id = %session_id, "new session created");
    }

    // Bring the snapshot up to date with this request's messages so
    // budgeting sees the full conversation.
    merge_request_messages(&mut session, &request.messages);

    // ── Features ───────────────────────────────────────────────────
    let features = FeatureSet::resolve(
        &config.features,
        Some(&session.feature_overrides),
        request.feature_overrides.as_ref(),
    );
    events
        .emit(EventKind::Features, json!(features.to_wire()))
        .await;
    events.status(TurnStage::Intake).await;
    cancel.check()?;

    // ── Classify & route ───────────────────────────────────────────
    events.status(TurnStage::Classifying).await;
    let classification = if features.enable_intent_routing {
        router::classify_intent(state.llm.as_ref(), &config.llm.models, question).await
    } else {
        gl_domain::plan::IntentClassification {
            intent: Intent::Research,
            confidence: 1.0,
            reasoning: "intent routing disabled".into(),
        }
    };
    let route = router::route_for(classification.intent, &config.llm.models);
    events
        .emit(
            EventKind::Route,
            json!({
                "intent": classification.intent,
                "confidence": classification.confidence,
                "model": route.model,
                "retrieval_strategy": route.retrieval_strategy,
            }),
        )
        .await;
    cancel.check()?;

    // ── Budget context ─────────────────────────────────────────────
    events.status(TurnStage::BudgetingContext).await;
    let question_embedding = if features.enable_semantic_summary {
        match state.llm.embed(vec![question.to_string()]).await {
            Ok(mut e) if !e.is_empty() => Some(e.remove(0)),
            Ok(_) | Err(_) => {
                tracing::warn!("question embedding failed; summary selection falls back");
                None
            }
        }
    } else {
        None
    };
    let budget = state.budgeter.budget(
        &session,
        question,
        question_embedding.as_deref(),
        None,
        features.enable_semantic_summary,
    );
    events
        .emit(
            EventKind::Context,
            json!({
                "tokens_per_section": budget.tokens_per_section,
                "reduced_sections": budget.reduced_sections,
                "older_messages": budget.older_messages,
            }),
        )
        .await;
    events
        .emit(
            EventKind::SummarySelectionStats,
            serde_json::to_value(&budget.selection_stats).unwrap_or_default(),
        )
        .await;
    cancel.check()?;

    // ── Plan ───────────────────────────────────────────────────────
    events.status(TurnStage::Planning).await;
    let plan: PlanSummary = planner::plan(
        state.llm.as_ref(),
        &config.llm.models,
        classification.intent,
        question,
    )
    .await;
    events
        .emit(
            EventKind::Plan,
            serde_json::to_value(&plan).unwrap_or_default(),
        )
        .await;
    cancel.check()?;

    // ── Dispatch retrieval ─────────────────────────────────────────
    events.status(TurnStage::Retrieving).await;
    let estimator = Arc::clone(&state.budgeter);
    let dispatcher = Dispatcher {
        llm: Arc::clone(&state.llm),
        search: Arc::clone(&state.search),
        web: Arc::clone(&state.web),
        academic: Arc::clone(&state.academic),
        tuning: config.tuning.clone(),
        web_config: config.web.clone(),
        count_tokens: Arc::new(move |text: &str| estimator.estimator().estimate(text)),
    };
    let mut dispatch = dispatcher
        .dispatch(
            DispatchInput {
                question,
                plan: &plan,
                features: &features,
                strategy: route.retrieval_strategy,
            },
            events,
            cancel,
        )
        .await?;
    for step in &dispatch.activity {
        events
            .emit(
                EventKind::Tool,
                json!({ "kind": step.kind, "description": step.description }),
            )
            .await;
    }
    cancel.check()?;

    // ── Synthesize + critique ──────────────────────────────────────
    events.status(TurnStage::Synthesizing).await;
    let synthesizer = Synthesizer::new(Arc::clone(&state.llm));
    let critic_loop = CriticLoop {
        llm: Arc::clone(&state.llm),
        critic_model: config.llm.models.critic.clone(),
        tuning: config.tuning.clone(),
    };
    let previous_response_id = features
        .enable_response_storage
        .then(|| session.last_response_id.clone())
        .flatten();
    let web_context_text = dispatch.web_context.as_ref().map(|w| w.text.clone());
    let loop_outcome = critic_loop
        .run(
            &synthesizer,
            LoopInput {
                question,
                budget: &budget,
                web_context: web_context_text.as_deref(),
                model: &route.model,
                previous_response_id,
                store: features.enable_response_storage,
                user: Some(session_id.to_string()),
                stream: request.mode == TurnMode::Stream,
                critic_enabled: features.enable_critic,
            },
            &mut dispatch.references,
            &mut dispatch.lazy_references,
            events,
            cancel,
        )
        .await?;
    cancel.check()?;

    // ── Citations ──────────────────────────────────────────────────
    let citations = build_citations(&loop_outcome.answer, &mut dispatch.references);
    events
        .emit(
            EventKind::Citations,
            serde_json::to_value(&citations).unwrap_or_default(),
        )
        .await;
    events
        .emit(
            EventKind::Activity,
            serde_json::to_value(&dispatch.activity).unwrap_or_default(),
        )
        .await;

    // ── Write back session state ───────────────────────────────────
    session.messages.push(Message::user(question));
    session
        .messages
        .push(Message::assistant(loop_outcome.answer.clone()));
    let digest = turn_digest(question, &loop_outcome.answer);
    let embedding = if features.enable_semantic_summary || features.enable_semantic_memory {
        state
            .llm
            .embed(vec![digest.clone()])
            .await
            .ok()
            .and_then(|mut e| (!e.is_empty()).then(|| e.remove(0)))
    } else {
        None
    };
    session.summary_bullets.push(SummaryBullet {
        text: digest,
        embedding,
    });
    session.last_memory_turn = session.messages.len();
    if features.enable_response_storage {
        if let Some(id) = &loop_outcome.response_id {
            session.last_response_id = Some(id.clone());
        }
    }
    state.sessions.write_back(session);
    if let Err(e) = state.sessions.flush() {
        tracing::warn!(error = %e, "session flush failed");
    }

    // ── Complete ───────────────────────────────────────────────────
    let last_report = loop_outcome.reports.last();
    let metadata = json!({
        "plan": plan,
        "context_budget": {
            "tokens_per_section": budget.tokens_per_section,
            "reduced_sections": budget.reduced_sections,
        },
        "retrieval": {
            "meta": dispatch.retrieval_meta,
            "references": dispatch.references.len(),
            "web_results": dispatch.web_results.len(),
            "escalated": dispatch.escalated,
            "fallback_exhausted": dispatch.fallback_exhausted,
        },
        "evaluation": {
            "iterations": loop_outcome.iterations,
            "refused": loop_outcome.refused,
            "reports": loop_outcome.reports,
        },
        "web_context": dispatch.web_context,
        "features": features.to_wire(),
        "adaptive": dispatch.adaptive_stats,
        "route": { "intent": classification.intent, "model": route.model },
        "turn_id": turn_id,
        "session_id": session_id,
    });
    events.status(TurnStage::Complete).await;
    events
        .emit(
            EventKind::Complete,
            json!({
                "answer": loop_outcome.answer,
                "citations": citations,
                "activity": dispatch.activity,
                "metadata": metadata,
            }),
        )
        .await;
    events.emit(EventKind::Done, json!({})).await;

    Ok(TurnRecord {
        turn_id: turn_id.to_string(),
        session_id: session_id.to_string(),
        mode: request.mode.as_str(),
        question: question.to_string(),
        answer: loop_outcome.answer,
        route: Some(classification.intent.as_str().to_string()),
        plan: serde_json::to_value(&plan).unwrap_or_default(),
        context_budget: json!(budget.tokens_per_section),
        retrieval_summary: dispatch.retrieval_meta,
        critic_history: serde_json::to_value(&loop_outcome.reports).unwrap_or_default(),
        adaptive_stats: dispatch
            .adaptive_stats
            .as_ref()
            .map(|s| serde_json::to_value(s).unwrap_or_default()),
        summary_selection_mode: Some(
            match budget.selection_stats.mode {
                gl_contextpack::SelectionMode::Semantic => "semantic",
                gl_contextpack::SelectionMode::Recency => "recency",
            }
            .to_string(),
        ),
        coverage: last_report.map(|r| r.coverage),
        events: events.recorded(),
        status: if loop_outcome.refused {
            TurnStatus::Refused
        } else {
            TurnStatus::Completed
        },
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fold the request's messages into the session snapshot without
/// duplicating turns the store already has.
fn merge_request_messages(session: &mut SessionState, messages: &[Message]) {
    // The final user message becomes this turn's question and is
    // appended at write-back; everything before it is history the
    // client may have replayed.
    let history_end = messages
        .iter()
        .rposition(|m| m.role == Role::User)
        .unwrap_or(messages.len());
    if session.messages.len() < history_end {
        session
            .messages
            .extend_from_slice(&messages[session.messages.len()..history_end]);
    }
}

/// Build citations for the subset of references the answer actually
/// cites, and mark the cited references for telemetry (`cited` flag and
/// per-reference citation density).
fn build_citations(
    answer: &str,
    references: &mut [gl_domain::reference::Reference],
) -> Vec<Citation> {
    let indices = extract_citation_indices(answer);
    let total_markers = indices.len().max(1);

    let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
    for n in indices {
        if n >= 1 && n <= references.len() {
            *counts.entry(n).or_default() += 1;
        }
    }

    let mut citations = Vec::with_capacity(counts.len());
    for (&n, &count) in &counts {
        let reference = &mut references[n - 1];
        reference.set_meta("cited", json!(true));
        reference.set_meta(
            "citation_density",
            json!(count as f64 / total_markers as f64),
        );
        citations.push(Citation::from_reference(n, reference));
    }
    citations
}

/// One-line digest of a turn for the rolling summary.
fn turn_digest(question: &str, answer: &str) -> String {
    let q: String = question.chars().take(120).collect();
    let a: String = answer.chars().take(160).collect();
    format!("Q: {q} — A: {a}")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use gl_domain::reference::Reference;

    fn reference(id: &str) -> Reference {
        let mut r = Reference::new(id);
        r.content = Some(format!("content {id}"));
        r
    }

    #[test]
    fn citations_cover_only_cited_references() {
        let mut refs = vec![reference("a"), reference("b"), reference("c")];
        let citations = build_citations("Uses [1] and [3]. And [1] again.", &mut refs);

        assert_eq!(citations.len(), 2);
        assert_eq!(citations[0].index, 1);
        assert_eq!(citations[0].id, "a");
        assert_eq!(citations[1].index, 3);
        assert!(refs[0].meta_bool("cited"));
        assert!(!refs[1].meta_bool("cited"));
        assert!(refs[2].meta_bool("cited"));
    }

    #[test]
    fn citation_density_reflects_marker_share() {
        let mut refs = vec![reference("a"), reference("b")];
        build_citations("[1] then [1] then [2]", &mut refs);
        let density_a = refs[0].metadata["citation_density"].as_f64().unwrap();
        let density_b = refs[1].metadata["citation_density"].as_f64().unwrap();
        assert!((density_a - 2.0 / 3.0).abs() < 1e-9);
        assert!((density_b - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn out_of_range_markers_produce_no_citations() {
        let mut refs = vec![reference("a")];
        let citations = build_citations("Bad [5]", &mut refs);
        assert!(citations.is_empty());
    }

    #[test]
    fn merge_appends_only_unseen_history() {
        let mut session = SessionState::new("s");
        session.messages.push(Message::user("old q"));
        session.messages.push(Message::assistant("old a"));

        let request = vec![
            Message::user("old q"),
            Message::assistant("old a"),
            Message::user("new q"),
        ];
        merge_request_messages(&mut session, &request);
        // The new question is not appended (that happens at
        // write-back); the already-stored turns are not duplicated.
        assert_eq!(session.messages.len(), 2);
    }

    #[test]
    fn merge_fills_missing_history() {
        let mut session = SessionState::new("s");
        let request = vec![
            Message::user("q1"),
            Message::assistant("a1"),
            Message::user("q2"),
        ];
        merge_request_messages(&mut session, &request);
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[1].content, "a1");
    }

    #[test]
    fn turn_digest_is_bounded() {
        let digest = turn_digest(&"q".repeat(500), &"a".repeat(500));
        assert!(digest.len() < 300);
        assert!(digest.starts_with("Q: q"));
    }
}
