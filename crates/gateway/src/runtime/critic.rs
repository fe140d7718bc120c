//! The critic loop: grounding/coverage evaluation, bounded revision,
//! deduplicated lazy-content hydration, and the final safety gate.

use crate::runtime::cancel::CancelToken;
use crate::runtime::events::EventSender;
use crate::runtime::synthesizer::{SynthesisInput, Synthesizer};
use gl_contextpack::ContextBudget;
use gl_domain::config::Tuning;
use gl_domain::critic::{CriticAction, CriticReport};
use gl_domain::error::Result;
use gl_domain::events::{EventKind, TurnStage};
use gl_domain::message::Message;
use gl_domain::reference::{LazyReference, Reference};
use gl_providers::traits::{
    complete_structured, CompletionOptions, CompletionRequest, JsonSchemaFormat, LlmGateway,
};
use regex::Regex;
use serde_json::json;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

/// Refusal issued by the final safety gate.
pub const GROUNDING_REFUSAL: &str = "I do not know. The available evidence does not \
     provide sufficient grounding to answer this question.";

/// Cap on lazy hydrations per turn.
const MAX_LAZY_LOAD_ATTEMPTS: usize = 3;

fn issue_index_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:\[(\d+)\]|(?:reference|document|doc)\s+(\d+))").unwrap()
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Critic
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn critic_schema() -> JsonSchemaFormat {
    JsonSchemaFormat::strict(
        "critic_report",
        json!({
            "type": "object",
            "properties": {
                "grounded": {"type": "boolean"},
                "coverage": {"type": "number", "minimum": 0, "maximum": 1},
                "action": {"type": "string", "enum": ["accept", "revise"]},
                "issues": {"type": "array", "items": {"type": "string"}},
            },
            "required": ["grounded", "coverage", "action", "issues"],
            "additionalProperties": false,
        }),
    )
}

/// Evaluate one answer. Any failure — transport, parse, schema drift —
/// returns a conservative revise; the critic never defaults to accept.
pub async fn critique(
    llm: &dyn LlmGateway,
    critic_model: &str,
    question: &str,
    answer: &str,
    references: &[Reference],
) -> CriticReport {
    let evidence: String = references
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let text: String = r
                .display_text()
                .unwrap_or_default()
                .chars()
                .take(600)
                .collect();
            format!("[{}] {text}\n", i + 1)
        })
        .collect();

    let req = CompletionRequest {
        input: vec![
            Message::system(
                "You are a strict answer reviewer. Judge whether the answer is \
                 grounded in the evidence and how much of it the evidence covers. \
                 List concrete issues when requesting a revision. Respond with the \
                 JSON object only.",
            ),
            Message::user(format!(
                "Question: {question}\n\nAnswer:\n{answer}\n\nEvidence:\n{evidence}"
            )),
        ],
        options: CompletionOptions {
            model: critic_model.to_string(),
            temperature: Some(0.0),
            max_output_tokens: Some(512),
            json_schema: Some(critic_schema()),
            ..Default::default()
        },
    };

    match complete_structured::<CriticReport>(llm, req).await {
        Ok(report) => report,
        Err(e) => {
            tracing::warn!(error = %e, "critic call failed; conservative revise");
            CriticReport::conservative_revise(&e.message)
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Lazy hydration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Candidate 1-based reference indices mentioned in critic issues.
pub fn hydration_candidates(issues: &[String]) -> Vec<usize> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for issue in issues {
        for cap in issue_index_re().captures_iter(issue) {
            let idx = cap
                .get(1)
                .or_else(|| cap.get(2))
                .and_then(|m| m.as_str().parse::<usize>().ok());
            if let Some(n) = idx {
                if n >= 1 && seen.insert(n) {
                    out.push(n);
                }
            }
        }
    }
    out
}

/// Hydrate the lazy references the critic's issues point at, bounded
/// and deduplicated across iterations so the same chunk is never
/// fetched twice in one turn.
async fn hydrate_from_issues(
    issues: &[String],
    references: &mut [Reference],
    lazy: &mut [LazyReference],
    attempted: &mut HashSet<usize>,
    events: &EventSender,
) -> usize {
    let mut hydrated = 0usize;
    for n in hydration_candidates(issues) {
        if attempted.len() >= MAX_LAZY_LOAD_ATTEMPTS {
            break;
        }
        let idx = n - 1;
        if idx >= lazy.len() || !attempted.insert(idx) {
            continue;
        }
        match lazy[idx].hydrate().await {
            Ok(true) => {
                references[idx] = lazy[idx].reference().clone();
                hydrated += 1;
                events
                    .emit(
                        EventKind::Activity,
                        json!({
                            "kind": "lazy_hydration",
                            "reference": lazy[idx].reference().id,
                        }),
                    )
                    .await;
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(
                    reference = %lazy[idx].reference().id,
                    error = %e,
                    "lazy hydration failed"
                );
            }
        }
    }
    hydrated
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct LoopInput<'a> {
    pub question: &'a str,
    pub budget: &'a ContextBudget,
    pub web_context: Option<&'a str>,
    pub model: &'a str,
    pub previous_response_id: Option<String>,
    pub store: bool,
    pub user: Option<String>,
    pub stream: bool,
    pub critic_enabled: bool,
}

pub struct CriticLoopOutcome {
    pub answer: String,
    pub reports: Vec<CriticReport>,
    /// Total synthesis calls made.
    pub iterations: usize,
    pub refused: bool,
    pub response_id: Option<String>,
}

pub struct CriticLoop {
    pub llm: Arc<dyn LlmGateway>,
    pub critic_model: String,
    pub tuning: Tuning,
}

impl CriticLoop {
    /// Synthesize, critique, and revise until acceptance, the retry
    /// bound, or the final safety gate.
    pub async fn run(
        &self,
        synthesizer: &Synthesizer,
        input: LoopInput<'_>,
        references: &mut Vec<Reference>,
        lazy: &mut Vec<LazyReference>,
        events: &EventSender,
        cancel: &CancelToken,
    ) -> Result<CriticLoopOutcome> {
        let mut reports: Vec<CriticReport> = Vec::new();
        let mut revision_notes: Vec<String> = Vec::new();
        let mut hydration_attempted: HashSet<usize> = HashSet::new();
        let mut iterations = 0usize;
        let mut attempt = 0usize;

        loop {
            cancel.check()?;

            let synth_input = SynthesisInput {
                question: input.question,
                budget: input.budget,
                references,
                web_context: input.web_context,
                revision_notes: &revision_notes,
                model: input.model,
                previous_response_id: input.previous_response_id.clone(),
                store: input.store,
                user: input.user.clone(),
            };
            let result = if input.stream {
                synthesizer.synthesize_stream(&synth_input, events).await?
            } else {
                synthesizer.synthesize_sync(&synth_input).await?
            };
            iterations += 1;

            if !input.critic_enabled {
                return Ok(CriticLoopOutcome {
                    answer: result.answer,
                    reports,
                    iterations,
                    refused: false,
                    response_id: result.response_id,
                });
            }

            cancel.check()?;
            events.status(TurnStage::Critiquing).await;
            let report = critique(
                self.llm.as_ref(),
                &self.critic_model,
                input.question,
                &result.answer,
                references,
            )
            .await;
            events
                .emit(
                    EventKind::Critique,
                    json!({
                        "attempt": attempt,
                        "grounded": report.grounded,
                        "coverage": report.coverage,
                        "action": report.action,
                        "issues": report.issues,
                        "forced": report.forced,
                    }),
                )
                .await;
            reports.push(report.clone());

            // Acceptance: explicit accept, or coverage at/above the
            // accept floor even when the model said revise.
            if report.action == CriticAction::Accept
                || report.coverage >= self.tuning.critic_accept_coverage
            {
                return Ok(CriticLoopOutcome {
                    answer: result.answer,
                    reports,
                    iterations,
                    refused: false,
                    response_id: result.response_id,
                });
            }

            if attempt < self.tuning.critic_max_retries {
                // Revise: hydrate any lazy references the issues point
                // at, then regenerate with the issues as notes.
                let hydrated = hydrate_from_issues(
                    &report.issues,
                    references,
                    lazy,
                    &mut hydration_attempted,
                    events,
                )
                .await;
                if hydrated > 0 {
                    tracing::debug!(hydrated, "expanded lazy references before revision");
                }
                revision_notes = report.issues.clone();
                attempt += 1;
                events.status(TurnStage::Revising).await;
                continue;
            }

            // Final safety gate.
            if !report.grounded || report.coverage < self.tuning.critic_threshold {
                events
                    .emit(
                        EventKind::QualityGateRefusal,
                        json!({
                            "grounded": report.grounded,
                            "coverage": report.coverage,
                            "threshold": self.tuning.critic_threshold,
                        }),
                    )
                    .await;
                return Ok(CriticLoopOutcome {
                    answer: GROUNDING_REFUSAL.to_string(),
                    reports,
                    iterations,
                    refused: true,
                    response_id: result.response_id,
                });
            }

            return Ok(CriticLoopOutcome {
                answer: result.answer,
                reports,
                iterations,
                refused: false,
                response_id: result.response_id,
            });
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use gl_domain::error::Result;
    use gl_domain::stream::BoxStream;
    use gl_providers::traits::{CompletionResponse, LlmEvent};
    use parking_lot::Mutex;

    #[test]
    fn candidates_from_markers_and_words() {
        let issues = vec![
            "Claim in [2] is unsupported".to_string(),
            "reference 3 only has a summary; Document 2 too".to_string(),
        ];
        assert_eq!(hydration_candidates(&issues), vec![2, 3]);
    }

    #[test]
    fn candidates_ignore_zero() {
        let issues = vec!["weird [0] marker".to_string()];
        assert!(hydration_candidates(&issues).is_empty());
    }

    /// LLM fake whose `complete` pops scripted responses.
    struct ScriptedLlm {
        responses: Mutex<Vec<Result<String>>>,
    }

    impl ScriptedLlm {
        fn new(mut responses: Vec<Result<String>>) -> Self {
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
            }
        }
    }

    #[async_trait::async_trait]
    impl LlmGateway for ScriptedLlm {
        async fn complete(&self, _req: CompletionRequest) -> Result<CompletionResponse> {
            let next = self
                .responses
                .lock()
                .pop()
                .unwrap_or(Ok("{}".to_string()));
            next.map(|text| CompletionResponse {
                text,
                usage: None,
                response_id: None,
                reasoning_summary: None,
            })
        }

        async fn complete_stream(
            &self,
            _req: CompletionRequest,
        ) -> Result<BoxStream<'static, Result<LlmEvent>>> {
            unimplemented!("not used")
        }

        async fn embed(&self, _texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
            Ok(Vec::new())
        }

        async fn get_response(
            &self,
            _id: &str,
            _include: Option<&str>,
        ) -> Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }

        async fn delete_response(&self, _id: &str) -> Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }

        async fn list_input_items(&self, _id: &str) -> Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
    }

    #[tokio::test]
    async fn critic_failure_is_conservative_revise() {
        let llm = ScriptedLlm::new(vec![Err(gl_domain::Error::transport("down"))]);
        let report = critique(&llm, "critic-model", "q", "a", &[]).await;
        assert_eq!(report.action, CriticAction::Revise);
        assert!(!report.grounded);
        assert_eq!(report.coverage, 0.0);
        assert!(report.forced);
    }

    #[tokio::test]
    async fn critic_garbage_is_conservative_revise() {
        let llm = ScriptedLlm::new(vec![Ok("<!doctype html>".into())]);
        let report = critique(&llm, "critic-model", "q", "a", &[]).await;
        assert_eq!(report.action, CriticAction::Revise);
        assert!(report.issues[0].starts_with("critic_error:"));
    }

    #[tokio::test]
    async fn critic_valid_report_is_parsed() {
        let llm = ScriptedLlm::new(vec![Ok(r#"{
            "grounded": true, "coverage": 0.93, "action": "accept", "issues": []
        }"#
        .into())]);
        let report = critique(&llm, "critic-model", "q", "a", &[]).await;
        assert_eq!(report.action, CriticAction::Accept);
        assert!(report.grounded);
        assert!(!report.forced);
    }
}
