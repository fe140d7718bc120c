//! Answer synthesis: sectioned prompt assembly, sync/stream
//! generation, and citation validation against the reference list.

use crate::runtime::events::EventSender;
use futures_util::StreamExt;
use gl_contextpack::ContextBudget;
use gl_domain::error::{Error, Result};
use gl_domain::events::EventKind;
use gl_domain::message::Message;
use gl_domain::reference::Reference;
use gl_domain::stream::Usage;
use gl_providers::traits::{CompletionOptions, CompletionRequest, LlmEvent, LlmGateway};
use regex::Regex;
use serde_json::json;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sentinels
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub const NO_CITATIONS_FALLBACK: &str = "I do not know. (No grounded citations available)";
pub const CITATION_FAILED_FALLBACK: &str = "I do not know. (Citation validation failed)";
/// Answers with no references are accepted only when they start with
/// this refusal prefix.
pub const REFUSAL_PREFIX: &str = "I do not know";
const STREAM_CITATION_NOTICE: &str =
    "\n[System Notice: Citation validation failed — the answer was replaced.]";

const SYNTHESIS_SYSTEM_PROMPT: &str = "\
You answer strictly from the provided evidence. Cite every claim with
bracketed reference numbers like [1] that point into the KNOWLEDGE
section. If the evidence does not support an answer, reply exactly:
\"I do not know.\" followed by a short reason.";

fn citation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[(\d+)\]").unwrap())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Citation validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// All `[n]` indices appearing in the answer, in order of appearance.
pub fn extract_citation_indices(answer: &str) -> Vec<usize> {
    citation_re()
        .captures_iter(answer)
        .filter_map(|c| c[1].parse::<usize>().ok())
        .collect()
}

/// Why an answer failed citation validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CitationFailure {
    /// References were supplied but the answer cites none of them.
    NoMarkers,
    /// A marker points outside `1..=len` or at a reference with no
    /// displayable text.
    InvalidMarker,
    /// Markers appear although no references exist.
    MarkersWithoutReferences,
    /// No references, no markers, and the answer is not a refusal.
    UngroundedAssertion,
}

/// Validate an answer's citations; returns the (possibly substituted)
/// answer and the failure, if any.
pub fn apply_citation_validation(
    answer: &str,
    references: &[Reference],
) -> (String, Option<CitationFailure>) {
    let indices = extract_citation_indices(answer);

    if references.is_empty() {
        if !indices.is_empty() {
            return (
                CITATION_FAILED_FALLBACK.to_string(),
                Some(CitationFailure::MarkersWithoutReferences),
            );
        }
        if answer.trim_start().starts_with(REFUSAL_PREFIX) {
            return (answer.to_string(), None);
        }
        return (
            NO_CITATIONS_FALLBACK.to_string(),
            Some(CitationFailure::UngroundedAssertion),
        );
    }

    if indices.is_empty() {
        return (
            NO_CITATIONS_FALLBACK.to_string(),
            Some(CitationFailure::NoMarkers),
        );
    }

    for n in indices {
        let in_range = (1..=references.len()).contains(&n);
        if !in_range || !references[n - 1].has_display_text() {
            return (
                CITATION_FAILED_FALLBACK.to_string(),
                Some(CitationFailure::InvalidMarker),
            );
        }
    }

    (answer.to_string(), None)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Prompt assembly
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SynthesisInput<'a> {
    pub question: &'a str,
    pub budget: &'a ContextBudget,
    pub references: &'a [Reference],
    pub web_context: Option<&'a str>,
    pub revision_notes: &'a [String],
    pub model: &'a str,
    pub previous_response_id: Option<String>,
    pub store: bool,
    pub user: Option<String>,
}

/// Build the sectioned prompt. Reference labels `[n]` match the
/// 1-based positions the UI resolves against.
pub fn build_prompt(input: &SynthesisInput<'_>) -> Vec<Message> {
    let mut messages = vec![Message::system(SYNTHESIS_SYSTEM_PROMPT)];

    let mut context = String::new();
    if !input.budget.salience.is_empty() {
        context.push_str("## PINNED FACTS\n");
        for point in &input.budget.salience {
            context.push_str(&format!("- {point}\n"));
        }
        context.push('\n');
    }
    if !input.budget.summary.is_empty() {
        context.push_str("## CONVERSATION SUMMARY\n");
        for bullet in &input.budget.summary {
            context.push_str(&format!("- {bullet}\n"));
        }
        context.push('\n');
    }
    if !context.is_empty() {
        messages.push(Message::system(context));
    }

    messages.extend(input.budget.history.iter().cloned());

    let mut turn = String::new();
    if !input.references.is_empty() {
        turn.push_str("## KNOWLEDGE\n");
        for (i, reference) in input.references.iter().enumerate() {
            let title = reference.title.as_deref().unwrap_or(&reference.id);
            let text = reference.display_text().unwrap_or_default();
            turn.push_str(&format!("[{}] {title}\n{text}\n\n", i + 1));
        }
    }
    if let Some(web) = input.web_context {
        if !web.is_empty() {
            turn.push_str("## WEB CONTEXT\n");
            turn.push_str(web);
            turn.push('\n');
        }
    }
    if !input.revision_notes.is_empty() {
        turn.push_str("## REVISION NOTES\nA reviewer flagged these issues; fix them:\n");
        for note in input.revision_notes {
            turn.push_str(&format!("- {note}\n"));
        }
        turn.push('\n');
    }
    turn.push_str(&format!("## QUESTION\n{}", input.question));
    messages.push(Message::user(turn));

    messages
}

fn completion_request(input: &SynthesisInput<'_>) -> CompletionRequest {
    CompletionRequest {
        input: build_prompt(input),
        options: CompletionOptions {
            model: input.model.to_string(),
            temperature: Some(0.2),
            previous_response_id: input.previous_response_id.clone(),
            store: input.store,
            user: input.user.clone(),
            ..Default::default()
        },
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Synthesizer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SynthesisResult {
    pub answer: String,
    pub usage: Option<Usage>,
    pub response_id: Option<String>,
    pub citation_failure: Option<CitationFailure>,
}

pub struct Synthesizer {
    pub llm: Arc<dyn LlmGateway>,
}

impl Synthesizer {
    pub fn new(llm: Arc<dyn LlmGateway>) -> Self {
        Self { llm }
    }

    /// Generate and validate an answer in one blocking call.
    pub async fn synthesize_sync(
        &self,
        input: &SynthesisInput<'_>,
    ) -> Result<SynthesisResult> {
        let resp = self.llm.complete(completion_request(input)).await?;
        let (answer, citation_failure) =
            apply_citation_validation(&resp.text, input.references);
        Ok(SynthesisResult {
            answer,
            usage: resp.usage,
            response_id: resp.response_id,
            citation_failure,
        })
    }

    /// Generate while emitting `token` events, then validate.
    ///
    /// A chunk counts as successful only if its extracted text is
    /// non-empty; a stream that ends with zero successful chunks raises
    /// `empty_stream`. On citation failure the substituted answer goes
    /// out through a trailing notice token plus a `warning` event — the
    /// `complete` event the orchestrator emits carries the substituted
    /// answer.
    pub async fn synthesize_stream(
        &self,
        input: &SynthesisInput<'_>,
        events: &EventSender,
    ) -> Result<SynthesisResult> {
        let mut stream = self.llm.complete_stream(completion_request(input)).await?;

        let mut text_buf = String::new();
        let mut successful_chunks = 0usize;
        let mut usage: Option<Usage> = None;
        let mut response_id: Option<String> = None;
        let mut seen_reasoning: HashSet<String> = HashSet::new();

        while let Some(event) = stream.next().await {
            match event? {
                LlmEvent::Delta { text } => {
                    if text.is_empty() {
                        continue;
                    }
                    successful_chunks += 1;
                    text_buf.push_str(&text);
                    events.emit(EventKind::Token, json!({ "text": text })).await;
                }
                LlmEvent::ReasoningSummary {
                    item_id,
                    output_index,
                    summary_index,
                    text,
                } => {
                    // Dedup by exact content, not normalized whitespace.
                    if seen_reasoning.insert(text.clone()) {
                        events
                            .emit(
                                EventKind::Trace,
                                json!({
                                    "type": "reasoning_summary",
                                    "item_id": item_id,
                                    "output_index": output_index,
                                    "summary_index": summary_index,
                                    "text": text,
                                }),
                            )
                            .await;
                    }
                }
                LlmEvent::Completed {
                    text,
                    usage: u,
                    response_id: id,
                } => {
                    if !text.is_empty() {
                        text_buf = text;
                    }
                    usage = u;
                    response_id = id;
                }
                LlmEvent::Failed { message } => {
                    return Err(Error::new(
                        gl_domain::ErrorKind::Upstream5xx,
                        format!("stream failed: {message}"),
                    ));
                }
            }
        }

        if successful_chunks == 0 {
            return Err(Error::new(
                gl_domain::ErrorKind::Internal,
                "empty_stream: no successful chunks before end of stream",
            ));
        }

        let (answer, citation_failure) =
            apply_citation_validation(&text_buf, input.references);
        if citation_failure.is_some() {
            events
                .emit(EventKind::Token, json!({ "text": STREAM_CITATION_NOTICE }))
                .await;
            events
                .emit(
                    EventKind::Warning,
                    json!({ "type": "citation_integrity" }),
                )
                .await;
        }

        Ok(SynthesisResult {
            answer,
            usage,
            response_id,
            citation_failure,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(id: &str, content: Option<&str>) -> Reference {
        let mut r = Reference::new(id);
        r.content = content.map(str::to_string);
        r
    }

    #[test]
    fn extracts_all_markers_in_order() {
        assert_eq!(
            extract_citation_indices("A [1] and [2], also [1]."),
            vec![1, 2, 1]
        );
        assert!(extract_citation_indices("no markers").is_empty());
    }

    #[test]
    fn valid_answer_passes() {
        let refs = vec![reference("a", Some("text"))];
        let (answer, failure) = apply_citation_validation("Grounded. [1]", &refs);
        assert_eq!(answer, "Grounded. [1]");
        assert!(failure.is_none());
    }

    #[test]
    fn missing_markers_substitute_no_citations_fallback() {
        let refs = vec![reference("a", Some("text"))];
        let (answer, failure) = apply_citation_validation("No citations here.", &refs);
        assert_eq!(answer, NO_CITATIONS_FALLBACK);
        assert_eq!(failure, Some(CitationFailure::NoMarkers));
    }

    #[test]
    fn out_of_range_marker_fails() {
        let refs = vec![reference("a", Some("text"))];
        let (answer, failure) = apply_citation_validation("Bad. [2]", &refs);
        assert_eq!(answer, CITATION_FAILED_FALLBACK);
        assert_eq!(failure, Some(CitationFailure::InvalidMarker));
    }

    #[test]
    fn zero_marker_fails() {
        let refs = vec![reference("a", Some("text"))];
        let (_, failure) = apply_citation_validation("Bad. [0]", &refs);
        assert_eq!(failure, Some(CitationFailure::InvalidMarker));
    }

    #[test]
    fn marker_at_empty_reference_fails() {
        let refs = vec![
            reference("a", Some("text")),
            reference("b", None),
        ];
        let (_, failure) = apply_citation_validation("Cites empty. [2]", &refs);
        assert_eq!(failure, Some(CitationFailure::InvalidMarker));
    }

    #[test]
    fn summary_counts_as_displayable_for_lazy_references() {
        let mut lazy = Reference::new("lazy");
        lazy.summary = Some("short summary".into());
        let (answer, failure) = apply_citation_validation("From summary. [1]", &[lazy]);
        assert_eq!(answer, "From summary. [1]");
        assert!(failure.is_none());
    }

    #[test]
    fn empty_refs_with_markers_fail() {
        let (answer, failure) = apply_citation_validation("Phantom. [1]", &[]);
        assert_eq!(answer, CITATION_FAILED_FALLBACK);
        assert_eq!(failure, Some(CitationFailure::MarkersWithoutReferences));
    }

    #[test]
    fn empty_refs_with_refusal_are_accepted() {
        let (answer, failure) =
            apply_citation_validation("I do not know. Nothing retrieved.", &[]);
        assert!(answer.starts_with(REFUSAL_PREFIX));
        assert!(failure.is_none());
    }

    #[test]
    fn empty_refs_with_assertion_are_substituted() {
        let (answer, failure) =
            apply_citation_validation("The moon is made of cheese.", &[]);
        assert_eq!(answer, NO_CITATIONS_FALLBACK);
        assert_eq!(failure, Some(CitationFailure::UngroundedAssertion));
    }

    #[test]
    fn prompt_labels_references_one_based() {
        let budget = empty_budget();
        let refs = vec![
            reference("doc-a", Some("alpha text")),
            reference("doc-b", Some("beta text")),
        ];
        let input = SynthesisInput {
            question: "q?",
            budget: &budget,
            references: &refs,
            web_context: None,
            revision_notes: &[],
            model: "gpt-4o",
            previous_response_id: None,
            store: false,
            user: None,
        };
        let prompt = build_prompt(&input);
        let user_turn = &prompt.last().unwrap().content;
        assert!(user_turn.contains("[1] doc-a"));
        assert!(user_turn.contains("[2] doc-b"));
        assert!(user_turn.contains("## QUESTION\nq?"));
    }

    #[test]
    fn revision_notes_land_in_prompt() {
        let budget = empty_budget();
        let notes = vec!["Add grounding".to_string()];
        let input = SynthesisInput {
            question: "q?",
            budget: &budget,
            references: &[],
            web_context: None,
            revision_notes: &notes,
            model: "gpt-4o",
            previous_response_id: None,
            store: false,
            user: None,
        };
        let prompt = build_prompt(&input);
        assert!(prompt
            .last()
            .unwrap()
            .content
            .contains("## REVISION NOTES"));
        assert!(prompt.last().unwrap().content.contains("Add grounding"));
    }

    fn empty_budget() -> ContextBudget {
        use gl_contextpack::budgeter::ContextBudgeter;
        use gl_domain::config::{ContextConfig, Tuning};
        use gl_domain::session::SessionState;

        let config = ContextConfig {
            tokenizer_model: "no-such-model".into(),
            ..Default::default()
        };
        let budgeter = ContextBudgeter::new(config, &Tuning::default());
        budgeter.budget(&SessionState::new("t"), "q", None, None, false)
    }
}
