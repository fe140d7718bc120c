//! The retrieval dispatcher: decides the retrieval path from the plan,
//! escalates low-confidence plans to dual retrieval, self-grades the
//! result set (CRAG), runs the adaptive reformulation loop, enforces
//! the minimum-document guarantee through an explicit fallback ladder,
//! and assembles the final reference list and web context.

use crate::runtime::cancel::CancelToken;
use crate::runtime::events::EventSender;
use gl_domain::config::{FeatureSet, SafeSearchLevel, Tuning, WebConfig};
use gl_domain::critic::{CragAction, CragEvaluation};
use gl_domain::error::{Error, Result};
use gl_domain::events::EventKind;
use gl_domain::message::Message;
use gl_domain::plan::{PlanAction, PlanSummary, RetrievalStrategy};
use gl_domain::reference::{LazyReference, Reference, WebResult};
use gl_domain::retrieval::{
    ActivityStep, AdaptiveStats, AdaptiveThresholds, AttemptStat, QualityVector,
};
use gl_domain::vecmath::mean_pairwise_similarity;
use gl_providers::traits::{
    complete_structured, CompletionOptions, CompletionRequest, JsonSchemaFormat, LlmGateway,
};
use gl_retrieval::academic::AcademicSearch;
use gl_retrieval::fusion::{apply_semantic_boost, rrf_merge, DEFAULT_RRF_K};
use gl_retrieval::quality::WebQualityFilter;
use gl_retrieval::search::{LazySearchRequest, QueryInput, SearchGateway, SearchOptions};
use gl_retrieval::web::{
    assemble_web_context, WebContext, WebSearchGateway, WebSearchOptions,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Weight of the cosine term when semantic boost is enabled.
const SEMANTIC_BOOST_WEIGHT: f64 = 0.3;

/// Per-document relevance floor used by CRAG refinement.
const CRAG_RELEVANCE_FLOOR: f64 = 0.5;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Input / outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct DispatchInput<'a> {
    pub question: &'a str,
    pub plan: &'a PlanSummary,
    pub features: &'a FeatureSet,
    pub strategy: RetrievalStrategy,
}

/// Everything the synthesizer and critic need from retrieval.
#[derive(Default)]
pub struct DispatchOutcome {
    /// Final ordered reference list: in-corpus first, then web results
    /// (or the RRF-merged list when web reranking is enabled). Citation
    /// indices resolve against this order.
    pub references: Vec<Reference>,
    /// Hydratable state for summary-first references. Indices align
    /// with the leading entries of `references`.
    pub lazy_references: Vec<LazyReference>,
    pub web_results: Vec<WebResult>,
    pub web_context: Option<WebContext>,
    pub adaptive_stats: Option<AdaptiveStats>,
    pub activity: Vec<ActivityStep>,
    pub escalated: bool,
    pub fallback_exhausted: bool,
    pub crag: Option<CragEvaluation>,
    /// Diagnostics for turn metadata: strategy, mode, fallback reason,
    /// upstream correlation ids.
    pub retrieval_meta: serde_json::Value,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Query validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Accepts queries up to and including `max_len` characters.
pub fn validate_query_length(query: &str, max_len: usize) -> Result<()> {
    if query.chars().count() > max_len {
        return Err(Error::validation(format!(
            "query exceeds {max_len} characters"
        )));
    }
    Ok(())
}

/// Choose the retrieval query: the plan's first explicit query when it
/// passes validation, otherwise the question (clamped).
fn effective_query(plan: &PlanSummary, question: &str, max_len: usize) -> String {
    if let Some(query) = plan.steps.iter().find_map(|s| s.query.as_deref()) {
        if validate_query_length(query, max_len).is_ok() {
            return query.to_string();
        }
        tracing::warn!("planner query over length limit; using the question instead");
    }
    question.chars().take(max_len).collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatcher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Dispatcher {
    pub llm: Arc<dyn LlmGateway>,
    pub search: Arc<dyn SearchGateway>,
    pub web: Arc<dyn WebSearchGateway>,
    pub academic: Arc<AcademicSearch>,
    pub tuning: Tuning,
    pub web_config: WebConfig,
    /// Token counter shared with the context budgeter.
    pub count_tokens: Arc<dyn Fn(&str) -> usize + Send + Sync>,
}

/// Result of the fallback ladder.
struct LadderOutcome {
    references: Vec<Reference>,
    lazy_references: Vec<LazyReference>,
    coverage: Option<f64>,
    fallback_exhausted: bool,
    mode: &'static str,
    fallback_reason: Option<&'static str>,
    diagnostics: serde_json::Value,
}

impl Dispatcher {
    pub async fn dispatch(
        &self,
        input: DispatchInput<'_>,
        events: &EventSender,
        cancel: &CancelToken,
    ) -> Result<DispatchOutcome> {
        let mut outcome = DispatchOutcome::default();
        let query = effective_query(input.plan, input.question, self.tuning.max_query_length);

        // ── S1: decide the path from the plan ──────────────────────
        let mut wants_vector = input.plan.requests(PlanAction::VectorSearch);
        let mut wants_web = input.plan.requests(PlanAction::WebSearch);
        if input.plan.steps.is_empty() && input.strategy != RetrievalStrategy::None {
            wants_vector = true;
        }

        // ── S5: confidence escalation ──────────────────────────────
        if input.plan.confidence < self.tuning.confidence_escalation_threshold {
            wants_vector = true;
            wants_web = true;
            outcome.escalated = true;
            events
                .emit(
                    EventKind::ConfidenceEscalation,
                    json!({
                        "plan_confidence": input.plan.confidence,
                        "threshold": self.tuning.confidence_escalation_threshold,
                    }),
                )
                .await;
            outcome.activity.push(ActivityStep::new(
                "confidence_escalation",
                format!(
                    "plan confidence {:.2} below {:.2}; forcing dual retrieval",
                    input.plan.confidence, self.tuning.confidence_escalation_threshold
                ),
            ));
        }

        if input.strategy == RetrievalStrategy::None && !wants_vector && !wants_web {
            outcome.retrieval_meta = json!({ "strategy": "none" });
            return Ok(outcome);
        }

        cancel.check()?;

        // ── S2/S3/S4: retrieval, in parallel when both are wanted ──
        let use_lazy =
            input.features.enable_lazy_retrieval && input.strategy == RetrievalStrategy::Lazy;

        let mut ladder: Option<LadderOutcome> = None;
        let mut web_results: Vec<WebResult> = Vec::new();

        if wants_vector && wants_web {
            // All-settled: one leg failing never discards the other.
            let (vector_leg, web_leg) = tokio::join!(
                self.retrieve_with_ladder(&query, use_lazy, events, cancel),
                self.run_web_search(&query, input.features, events)
            );
            match vector_leg {
                Ok(l) => ladder = Some(l),
                Err(e) => tracing::warn!(error = %e, "vector retrieval leg failed"),
            }
            match web_leg {
                Ok(mut results) => web_results.append(&mut results),
                Err(e) => tracing::warn!(error = %e, "web retrieval leg failed"),
            }
            outcome
                .activity
                .push(ActivityStep::new("parallel_retrieval", "vector + web"));
        } else if wants_vector {
            ladder = Some(
                self.retrieve_with_ladder(&query, use_lazy, events, cancel)
                    .await?,
            );
            outcome
                .activity
                .push(ActivityStep::new("vector_search", query.clone()));
        } else if wants_web {
            web_results = self.run_web_search(&query, input.features, events).await?;
            outcome
                .activity
                .push(ActivityStep::new("web_search", query.clone()));
        }

        let mut references = Vec::new();
        let mut coverage = None;
        if let Some(ladder) = ladder {
            references = ladder.references;
            outcome.lazy_references = ladder.lazy_references;
            coverage = ladder.coverage;
            outcome.fallback_exhausted = ladder.fallback_exhausted;
            outcome.retrieval_meta = json!({
                "strategy": "knowledge_agent",
                "mode": ladder.mode,
                "fallbackReason": ladder.fallback_reason,
                "diagnostics": ladder.diagnostics,
            });
        } else {
            outcome.retrieval_meta = json!({ "strategy": "web_only" });
        }

        cancel.check()?;

        // ── S6: CRAG self-grade ────────────────────────────────────
        if input.features.enable_crag && !references.is_empty() {
            match self.crag_evaluate(input.question, &references, events).await {
                Some(eval) => {
                    match eval.action {
                        CragAction::UseDocuments => {
                            events
                                .emit(EventKind::CragResult, json!({ "kept": references.len() }))
                                .await;
                        }
                        CragAction::RefineDocuments => {
                            let before = references.len();
                            references = refine_references(references, &eval);
                            events
                                .emit(
                                    EventKind::CragRefinement,
                                    json!({ "before": before, "after": references.len() }),
                                )
                                .await;
                            outcome.activity.push(ActivityStep::new(
                                "crag_refinement",
                                format!("kept {} of {before} documents", references.len()),
                            ));
                        }
                        CragAction::WebFallback => {
                            events
                                .emit(
                                    EventKind::CragWebFallback,
                                    json!({ "reasoning": eval.reasoning }),
                                )
                                .await;
                            outcome.activity.push(ActivityStep::new(
                                "crag_web_fallback",
                                "retrieval graded incorrect; forcing web search",
                            ));
                            if web_results.is_empty() {
                                web_results = self
                                    .run_web_search(&query, input.features, events)
                                    .await
                                    .unwrap_or_default();
                            }
                        }
                    }
                    outcome.crag = Some(eval);
                }
                None => {
                    // Grading is advisory; a failed grade keeps the set.
                }
            }
        }

        cancel.check()?;

        // ── S7: adaptive reformulation loop ────────────────────────
        if input.features.enable_adaptive_retrieval && wants_vector {
            let (refined, stats) = self
                .adaptive_loop(&query, references, coverage, events, cancel)
                .await;
            references = refined;
            if stats.triggered {
                outcome.activity.push(ActivityStep::new(
                    "adaptive_retrieval",
                    format!(
                        "{} attempts, {} reformulations",
                        stats.attempts,
                        stats.reformulations.len()
                    ),
                ));
            }
            outcome.adaptive_stats = Some(stats);
        }

        cancel.check()?;

        // ── Academic sources ───────────────────────────────────────
        if self.academic.any_enabled() {
            let academic = self.academic.search_all(&query).await;
            events
                .emit(
                    EventKind::AcademicSearch,
                    json!({
                        "papers": academic.papers.len(),
                        "failures": academic.failures,
                    }),
                )
                .await;
            let offset = web_results.len();
            web_results.extend(academic.papers.into_iter().map(|mut p| {
                p.rank += offset;
                p
            }));
        }

        // ── Web quality filter ─────────────────────────────────────
        if input.features.enable_web_quality_filter && !web_results.is_empty() {
            let corpus_texts: Vec<String> = references
                .iter()
                .filter_map(|r| r.display_text().map(str::to_string))
                .collect();
            let filter = WebQualityFilter::new(&self.web_config, &self.tuning);
            let filtered = filter
                .filter(self.llm.as_ref(), &query, web_results, &corpus_texts)
                .await;
            events
                .emit(
                    EventKind::Telemetry,
                    json!({
                        "type": "web_quality_filter",
                        "kept": filtered.kept.len(),
                        "dropped": filtered.dropped,
                        "degraded": filtered.degraded,
                    }),
                )
                .await;
            web_results = filtered.kept;
        }

        // ── S9: combine ────────────────────────────────────────────
        if !web_results.is_empty() {
            let web_context = assemble_web_context(
                &web_results,
                self.tuning.web_context_max_tokens,
                |text| (self.count_tokens)(text),
            );
            if web_context.trimmed {
                events
                    .emit(
                        EventKind::WebContextTrim,
                        json!({
                            "tokens": web_context.tokens,
                            "max_tokens": self.tuning.web_context_max_tokens,
                        }),
                    )
                    .await;
            }
            outcome.web_context = Some(web_context);

            let web_references: Vec<Reference> =
                web_results.iter().map(WebResult::to_reference).collect();

            if input.features.enable_web_reranking {
                let mut merged = rrf_merge(&[&references, &web_references], DEFAULT_RRF_K);
                if input.features.enable_semantic_boost {
                    self.boost_semantically(&query, &mut merged).await;
                }
                references = merged;
            } else {
                references.extend(web_references);
            }
        }

        outcome.web_results = web_results;
        outcome.references = references;
        Ok(outcome)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // S8: fallback ladder
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Run the staged retrieval ladder until the minimum-document
    /// guarantee is satisfied.
    ///
    /// Stages: primary threshold at base top, primary at 1.5×, relaxed
    /// threshold at 2× (exit on any), pure vector at 2× (exit on any).
    /// A stage whose threshold filters out every result is retried once
    /// without the threshold, explicitly — the unfiltered set is never
    /// passed off as filtered.
    async fn retrieve_with_ladder(
        &self,
        query: &str,
        use_lazy: bool,
        events: &EventSender,
        cancel: &CancelToken,
    ) -> Result<LadderOutcome> {
        let base_top = self.tuning.rag_top_k;
        let min_docs = self.tuning.retrieval_min_docs;
        let stages: [(usize, Option<f64>, usize, bool, bool); 4] = [
            (0, Some(self.tuning.reranker_threshold), base_top, false, false),
            (
                1,
                Some(self.tuning.reranker_threshold),
                base_top + base_top / 2,
                false,
                false,
            ),
            (
                2,
                Some(self.tuning.fallback_reranker_threshold),
                base_top * 2,
                false,
                true,
            ),
            (3, None, base_top * 2, true, true),
        ];

        let mut best: Vec<Reference> = Vec::new();
        let mut best_lazy: Vec<LazyReference> = Vec::new();
        let mut coverage: Option<f64> = None;
        let mut mode: &'static str = "knowledge_agent";
        let mut fallback_reason: Option<&'static str> = None;
        let mut diagnostics = json!({ "fallbackTriggered": false });

        for (stage, threshold, top, pure_vector, exit_on_any) in stages {
            cancel.check()?;

            let result = self
                .run_stage(query, threshold, top, pure_vector, use_lazy && stage == 0)
                .await;

            let (mut references, mut lazy, stage_coverage, exhausted) = match result {
                Ok(r) => r,
                Err(e) => {
                    events
                        .emit(
                            EventKind::RetrievalFallback,
                            json!({
                                "stage": stage,
                                "reason": format!("error:{}", e.kind.as_str()),
                                "docs_found": 0,
                                "threshold": threshold,
                            }),
                        )
                        .await;
                    if stage == 0 {
                        diagnostics = json!({
                            "correlationId": e.correlation_id,
                            "failurePhase": "invocation",
                            "fallbackTriggered": true,
                        });
                        mode = "direct";
                        fallback_reason = Some("knowledge_agent_fallback");
                    }
                    continue;
                }
            };

            if exhausted {
                // Minimum-document guarantee: an explicit unfiltered
                // retry of the same stage, with its own event.
                events
                    .emit(
                        EventKind::RetrievalFallback,
                        json!({
                            "stage": stage,
                            "reason": "threshold_exhausted",
                            "docs_found": 0,
                            "threshold": threshold,
                        }),
                    )
                    .await;
                if let Ok((refs, lz, cov, _)) = self
                    .run_stage(query, None, top, pure_vector, use_lazy && stage == 0)
                    .await
                {
                    references = refs;
                    lazy = lz;
                    if cov.is_some() {
                        coverage = cov;
                    }
                }
            }

            if let Some(c) = stage_coverage {
                coverage = Some(c);
            }

            let enough = references.len() >= min_docs
                || (exit_on_any && !references.is_empty());
            if enough {
                return Ok(LadderOutcome {
                    references,
                    lazy_references: lazy,
                    coverage,
                    fallback_exhausted: false,
                    mode,
                    fallback_reason,
                    diagnostics,
                });
            }

            if references.len() > best.len() {
                best = references;
                best_lazy = lazy;
            }

            events
                .emit(
                    EventKind::RetrievalFallback,
                    json!({
                        "stage": stage + 1,
                        "reason": "insufficient_docs",
                        "docs_found": best.len(),
                        "threshold": threshold,
                    }),
                )
                .await;
        }

        tracing::warn!(
            docs = best.len(),
            min_docs,
            "fallback ladder exhausted; returning best effort"
        );
        Ok(LadderOutcome {
            references: best,
            lazy_references: best_lazy,
            coverage,
            fallback_exhausted: true,
            mode,
            fallback_reason: Some(fallback_reason.unwrap_or("fallback_exhausted")),
            diagnostics,
        })
    }

    /// One ladder stage: returns `(references, lazy, coverage,
    /// threshold_exhausted)`.
    async fn run_stage(
        &self,
        query: &str,
        threshold: Option<f64>,
        top: usize,
        pure_vector: bool,
        lazy: bool,
    ) -> Result<(Vec<Reference>, Vec<LazyReference>, Option<f64>, bool)> {
        if pure_vector {
            let outcome = self
                .search
                .vector_search(
                    QueryInput::Text(query.to_string()),
                    &SearchOptions {
                        top,
                        ..Default::default()
                    },
                )
                .await?;
            return Ok((outcome.references, Vec::new(), outcome.coverage, false));
        }

        if lazy {
            let outcome = self
                .search
                .lazy_hybrid_search(&LazySearchRequest {
                    query: query.to_string(),
                    top,
                    reranker_threshold: threshold,
                    summary_max_chars: self.tuning.lazy_summary_max_chars,
                    prefetch_count: self.tuning.lazy_prefetch_count,
                })
                .await?;
            let references: Vec<Reference> = outcome
                .references
                .iter()
                .map(|l| l.reference().clone())
                .collect();
            return Ok((
                references,
                outcome.references,
                outcome.coverage,
                outcome.threshold_exhausted,
            ));
        }

        let outcome = self
            .search
            .hybrid_search(
                query,
                &SearchOptions {
                    top,
                    reranker_threshold: threshold,
                    ..Default::default()
                },
            )
            .await?;
        Ok((
            outcome.references,
            Vec::new(),
            outcome.coverage,
            outcome.threshold_exhausted,
        ))
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Web search
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn run_web_search(
        &self,
        query: &str,
        features: &FeatureSet,
        events: &EventSender,
    ) -> Result<Vec<WebResult>> {
        let safe_search = if features.enable_web_safe_mode {
            self.web_config.safe_search.max(SafeSearchLevel::Active)
        } else {
            SafeSearchLevel::Off
        };
        let outcome = self
            .web
            .web_search(
                query,
                &WebSearchOptions {
                    count: self.web_config.count,
                    safe_search,
                    recency_days: self.web_config.recency_days,
                    mode: None,
                },
            )
            .await?;
        if outcome.missing_config {
            events
                .emit(
                    EventKind::Telemetry,
                    json!({ "type": "missing_config", "component": "web_search" }),
                )
                .await;
        }
        Ok(outcome.results)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // S6: CRAG
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn crag_evaluate(
        &self,
        question: &str,
        references: &[Reference],
        events: &EventSender,
    ) -> Option<CragEvaluation> {
        let docs: String = references
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let text: String = r
                    .display_text()
                    .unwrap_or_default()
                    .chars()
                    .take(500)
                    .collect();
                format!("[{}] {}\n", i + 1, text)
            })
            .collect();

        let schema = JsonSchemaFormat::strict(
            "crag_evaluation",
            json!({
                "type": "object",
                "properties": {
                    "confidence": {
                        "type": "string",
                        "enum": ["correct", "ambiguous", "incorrect"],
                    },
                    "action": {
                        "type": "string",
                        "enum": ["use_documents", "refine_documents", "web_fallback"],
                    },
                    "reasoning": {"type": "string"},
                    "relevance_scores": {
                        "type": ["array", "null"],
                        "items": {
                            "type": "object",
                            "properties": {
                                "doc_index": {"type": "integer", "minimum": 0},
                                "score": {"type": "number", "minimum": 0, "maximum": 1},
                                "relevant_sentences": {
                                    "type": ["array", "null"],
                                    "items": {"type": "string"},
                                },
                            },
                            "required": ["doc_index", "score"],
                            "additionalProperties": false,
                        },
                    },
                },
                "required": ["confidence", "action", "reasoning"],
                "additionalProperties": false,
            }),
        );

        let req = CompletionRequest {
            input: vec![
                Message::system(
                    "Grade whether the retrieved documents can answer the question. \
                     correct → use_documents, ambiguous → refine_documents, \
                     incorrect → web_fallback. Respond with the JSON object only.",
                ),
                Message::user(format!("Question: {question}\n\nDocuments:\n{docs}")),
            ],
            options: CompletionOptions {
                model: String::new(),
                temperature: Some(0.0),
                max_output_tokens: Some(768),
                json_schema: Some(schema),
                ..Default::default()
            },
        };

        match complete_structured::<CragEvaluation>(self.llm.as_ref(), req).await {
            Ok(eval) => {
                events
                    .emit(
                        EventKind::CragEvaluation,
                        serde_json::to_value(&eval).unwrap_or_default(),
                    )
                    .await;
                events
                    .emit(
                        EventKind::CragAction,
                        json!({ "action": eval.action }),
                    )
                    .await;
                Some(eval)
            }
            Err(e) => {
                tracing::warn!(error = %e, "CRAG evaluation failed; keeping documents");
                None
            }
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // S7: adaptive reformulation
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn adaptive_loop(
        &self,
        query: &str,
        references: Vec<Reference>,
        coverage: Option<f64>,
        events: &EventSender,
        cancel: &CancelToken,
    ) -> (Vec<Reference>, AdaptiveStats) {
        let thresholds = AdaptiveThresholds {
            min_coverage: self.tuning.adaptive_min_coverage,
            min_diversity: self.tuning.adaptive_min_diversity,
        };

        let started = Instant::now();
        let initial_quality = self.quality_of(&references, coverage).await;
        let mut stats = AdaptiveStats {
            attempts: 1,
            triggered: false,
            trigger_reason: None,
            thresholds,
            initial_quality,
            final_quality: initial_quality,
            reformulations: Vec::new(),
            per_attempt: vec![AttemptStat {
                attempt: 1,
                query: query.to_string(),
                quality: initial_quality,
                latency_ms: started.elapsed().as_millis() as u64,
            }],
        };

        let Some(trigger) =
            initial_quality.trigger(thresholds.min_coverage, thresholds.min_diversity)
        else {
            return (references, stats);
        };
        stats.triggered = true;
        stats.trigger_reason = Some(trigger);

        let mut current_query = query.to_string();
        let mut best_references = references;
        let mut best_quality = initial_quality;

        while stats.reformulations.len() < self.tuning.adaptive_max_reformulations {
            if cancel.is_cancelled() {
                break;
            }

            let Some(reformulated) = self.reformulate(&current_query, best_quality).await
            else {
                break;
            };
            stats.reformulations.push(reformulated.clone());
            current_query = reformulated;

            let attempt_start = Instant::now();
            let attempt_refs = match self
                .search
                .hybrid_search(
                    &current_query,
                    &SearchOptions {
                        top: self.tuning.rag_top_k,
                        reranker_threshold: Some(self.tuning.reranker_threshold),
                        ..Default::default()
                    },
                )
                .await
            {
                Ok(o) => o,
                Err(e) => {
                    tracing::warn!(error = %e, "adaptive re-retrieval failed");
                    break;
                }
            };

            let quality = self
                .quality_of(&attempt_refs.references, attempt_refs.coverage)
                .await;
            stats.attempts += 1;
            stats.per_attempt.push(AttemptStat {
                attempt: stats.attempts,
                query: current_query.clone(),
                quality,
                latency_ms: attempt_start.elapsed().as_millis() as u64,
            });

            let improved = quality.coverage > best_quality.coverage
                || (quality.coverage == best_quality.coverage
                    && quality.diversity > best_quality.diversity);
            if improved {
                best_references = attempt_refs.references;
                best_quality = quality;
            }

            if quality
                .trigger(thresholds.min_coverage, thresholds.min_diversity)
                .is_none()
            {
                break;
            }
        }

        stats.final_quality = best_quality;
        events
            .emit(
                EventKind::AdaptiveRetrieval,
                json!({
                    "attempts": stats.attempts,
                    "triggered": stats.triggered,
                    "trigger_reason": stats.trigger_reason,
                    "reformulations_count": stats.reformulations.len(),
                    "initial_quality": stats.initial_quality,
                    "final_quality": stats.final_quality,
                }),
            )
            .await;

        (best_references, stats)
    }

    /// Compute the quality vector for a result set.
    async fn quality_of(&self, references: &[Reference], coverage: Option<f64>) -> QualityVector {
        let coverage = coverage.unwrap_or_else(|| {
            if self.tuning.rag_top_k == 0 {
                0.0
            } else {
                (references.len() as f64 / self.tuning.rag_top_k as f64).min(1.0)
            }
        });

        let texts: Vec<String> = references
            .iter()
            .filter_map(|r| r.display_text().map(|t| t.chars().take(512).collect()))
            .collect();
        let diversity = if texts.len() < 2 {
            // A single document cannot be redundant with itself.
            1.0
        } else {
            match self.llm.embed(texts).await {
                Ok(embeddings) => {
                    1.0 - f64::from(mean_pairwise_similarity(&embeddings)).clamp(0.0, 1.0)
                }
                Err(e) => {
                    tracing::debug!(error = %e, "diversity embeddings failed; assuming diverse");
                    1.0
                }
            }
        };

        let authority = if references.is_empty() {
            0.0
        } else {
            references
                .iter()
                .map(|r| {
                    r.metadata
                        .get("authority")
                        .and_then(|v| v.as_f64())
                        .unwrap_or(0.6)
                })
                .sum::<f64>()
                / references.len() as f64
        };

        // Index chunks carry no age; treat them as current unless the
        // metadata says otherwise.
        let freshness = if references.is_empty() {
            0.0
        } else {
            references
                .iter()
                .map(|r| {
                    r.metadata
                        .get("freshness")
                        .and_then(|v| v.as_f64())
                        .unwrap_or(1.0)
                })
                .sum::<f64>()
                / references.len() as f64
        };

        QualityVector {
            coverage,
            diversity,
            authority,
            freshness,
        }
    }

    /// Ask the LLM for one reformulated query.
    async fn reformulate(&self, query: &str, quality: QualityVector) -> Option<String> {
        #[derive(serde::Deserialize)]
        struct Reformulation {
            query: String,
        }

        let schema = JsonSchemaFormat::strict(
            "query_reformulation",
            json!({
                "type": "object",
                "properties": {"query": {"type": "string", "minLength": 1}},
                "required": ["query"],
                "additionalProperties": false,
            }),
        );
        let req = CompletionRequest {
            input: vec![
                Message::system(
                    "The search query returned low-quality results. Produce exactly one \
                     improved query: more specific, different phrasing, or a narrowed \
                     source. Respond with the JSON object only.",
                ),
                Message::user(format!(
                    "Query: {query}\nCoverage: {:.2}\nDiversity: {:.2}",
                    quality.coverage, quality.diversity
                )),
            ],
            options: CompletionOptions {
                model: String::new(),
                temperature: Some(0.3),
                max_output_tokens: Some(128),
                json_schema: Some(schema),
                ..Default::default()
            },
        };

        match complete_structured::<Reformulation>(self.llm.as_ref(), req).await {
            Ok(r) if !r.query.trim().is_empty() => Some(r.query),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "reformulation failed; ending adaptive loop");
                None
            }
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Semantic boost
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn boost_semantically(&self, query: &str, merged: &mut Vec<Reference>) {
        let mut inputs = vec![query.to_string()];
        let ids: Vec<String> = merged.iter().map(|r| r.id.clone()).collect();
        inputs.extend(
            merged
                .iter()
                .map(|r| r.display_text().unwrap_or_default().to_string()),
        );
        let embeddings = match self.llm.embed(inputs).await {
            Ok(e) if e.len() == ids.len() + 1 => e,
            _ => {
                tracing::debug!("semantic boost embeddings unavailable; skipping");
                return;
            }
        };
        let query_embedding = embeddings[0].clone();
        let by_id: HashMap<String, Vec<f32>> =
            ids.into_iter().zip(embeddings.into_iter().skip(1)).collect();
        apply_semantic_boost(merged, &query_embedding, &by_id, SEMANTIC_BOOST_WEIGHT);
    }
}

/// Apply a CRAG refinement to the reference list.
fn refine_references(references: Vec<Reference>, eval: &CragEvaluation) -> Vec<Reference> {
    let Some(scores) = &eval.relevance_scores else {
        return references;
    };

    let by_index: HashMap<usize, &gl_domain::critic::DocRelevance> =
        scores.iter().map(|s| (s.doc_index, s)).collect();

    references
        .into_iter()
        .enumerate()
        .filter_map(|(i, mut reference)| {
            let Some(relevance) = by_index.get(&i) else {
                return Some(reference);
            };
            if relevance.score < CRAG_RELEVANCE_FLOOR {
                return None;
            }
            if let Some(sentences) = &relevance.relevant_sentences {
                if !sentences.is_empty() {
                    reference.content = Some(sentences.join(" "));
                    reference.set_meta("crag_refined", json!(true));
                }
            }
            Some(reference)
        })
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use gl_domain::critic::{CragConfidence, DocRelevance};

    #[test]
    fn query_length_boundary() {
        let exact = "q".repeat(512);
        assert!(validate_query_length(&exact, 512).is_ok());
        let over = "q".repeat(513);
        assert!(validate_query_length(&over, 512).is_err());
    }

    #[test]
    fn effective_query_prefers_plan_query() {
        let plan = PlanSummary {
            confidence: 0.8,
            steps: vec![gl_domain::plan::PlanStep {
                action: PlanAction::VectorSearch,
                query: Some("refined".into()),
                k: None,
            }],
        };
        assert_eq!(effective_query(&plan, "original question", 512), "refined");
    }

    #[test]
    fn oversized_plan_query_falls_back_to_question() {
        let plan = PlanSummary {
            confidence: 0.8,
            steps: vec![gl_domain::plan::PlanStep {
                action: PlanAction::VectorSearch,
                query: Some("x".repeat(600)),
                k: None,
            }],
        };
        assert_eq!(effective_query(&plan, "the question", 512), "the question");
    }

    fn reference(id: &str, content: &str) -> Reference {
        let mut r = Reference::new(id);
        r.content = Some(content.into());
        r
    }

    fn eval_with_scores(scores: Vec<DocRelevance>) -> CragEvaluation {
        CragEvaluation {
            confidence: CragConfidence::Ambiguous,
            action: CragAction::RefineDocuments,
            reasoning: String::new(),
            relevance_scores: Some(scores),
        }
    }

    #[test]
    fn refinement_drops_low_scored_docs() {
        let refs = vec![reference("a", "ca"), reference("b", "cb")];
        let eval = eval_with_scores(vec![
            DocRelevance {
                doc_index: 0,
                score: 0.9,
                relevant_sentences: None,
            },
            DocRelevance {
                doc_index: 1,
                score: 0.2,
                relevant_sentences: None,
            },
        ]);
        let refined = refine_references(refs, &eval);
        assert_eq!(refined.len(), 1);
        assert_eq!(refined[0].id, "a");
    }

    #[test]
    fn refinement_substitutes_relevant_sentences() {
        let refs = vec![reference("a", "full original content")];
        let eval = eval_with_scores(vec![DocRelevance {
            doc_index: 0,
            score: 0.8,
            relevant_sentences: Some(vec!["Key sentence one.".into(), "Two.".into()]),
        }]);
        let refined = refine_references(refs, &eval);
        assert_eq!(
            refined[0].content.as_deref(),
            Some("Key sentence one. Two.")
        );
        assert!(refined[0].meta_bool("crag_refined"));
    }

    #[test]
    fn score_exactly_at_floor_is_kept() {
        let refs = vec![reference("a", "c")];
        let eval = eval_with_scores(vec![DocRelevance {
            doc_index: 0,
            score: CRAG_RELEVANCE_FLOOR,
            relevant_sentences: None,
        }]);
        assert_eq!(refine_references(refs, &eval).len(), 1);
    }

    #[test]
    fn unscored_docs_are_kept() {
        let refs = vec![reference("a", "ca"), reference("b", "cb")];
        let eval = eval_with_scores(vec![DocRelevance {
            doc_index: 0,
            score: 0.1,
            relevant_sentences: None,
        }]);
        let refined = refine_references(refs, &eval);
        assert_eq!(refined.len(), 1);
        assert_eq!(refined[0].id, "b");
    }
}
