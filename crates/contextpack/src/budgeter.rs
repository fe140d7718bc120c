//! Deterministic per-turn context budgeting.
//!
//! Sections are clamped to their individual budgets first, then the
//! total is checked against 90% of the model input window. On
//! exceedance, sections are reduced in fixed priority order:
//! web → summary → history → salience. Salience goes last because its
//! contents are user-pinned.

use crate::history::{self, CompactedHistory};
use crate::summary::{select_bullets, SelectionStats};
use crate::tokens::TokenEstimator;
use gl_domain::config::{ContextConfig, Tuning};
use gl_domain::message::Message;
use gl_domain::session::SessionState;
use std::collections::BTreeMap;

/// Share of the model input window the budgeter may fill.
const INPUT_WINDOW_SHARE: f64 = 0.9;

/// The budgeted context for one turn.
#[derive(Debug)]
pub struct ContextBudget {
    pub history: Vec<Message>,
    pub summary: Vec<String>,
    pub salience: Vec<String>,
    pub web: Option<String>,
    pub tokens_per_section: BTreeMap<&'static str, usize>,
    /// Sections that were reduced to satisfy the total budget, in
    /// reduction order.
    pub reduced_sections: Vec<&'static str>,
    pub selection_stats: SelectionStats,
    /// Messages folded away by history compaction.
    pub older_messages: usize,
}

/// Deterministic context budgeter.
pub struct ContextBudgeter {
    config: ContextConfig,
    max_message_length: usize,
    estimator: TokenEstimator,
}

impl ContextBudgeter {
    pub fn new(config: ContextConfig, tuning: &Tuning) -> Self {
        let estimator = TokenEstimator::new(
            &config.tokenizer_model,
            config.estimate_cache_entries,
        );
        Self {
            config,
            max_message_length: tuning.max_message_length,
            estimator,
        }
    }

    pub fn estimator(&self) -> &TokenEstimator {
        &self.estimator
    }

    /// Budget the context for one turn.
    ///
    /// `question_embedding` enables semantic bullet selection when the
    /// feature is on; pass `None` to use recency (the caller records
    /// the embedding-failure reason through the returned stats).
    pub fn budget(
        &self,
        session: &SessionState,
        _question: &str,
        question_embedding: Option<&[f32]>,
        web_context: Option<String>,
        semantic_summary: bool,
    ) -> ContextBudget {
        // ── Per-section assembly ───────────────────────────────────
        let CompactedHistory {
            mut recent,
            older_count,
            clamped_count,
        } = history::compact_history(
            &session.messages,
            self.config.verbatim_turns,
            self.max_message_length,
        );
        if clamped_count > 0 {
            tracing::debug!(clamped_count, "history messages clamped to max length");
        }

        let (mut summary, selection_stats) = select_bullets(
            &session.summary_bullets,
            question_embedding,
            self.config.summary_bullets,
            semantic_summary,
        );

        let mut salience = session.salience.clone();
        let mut web = web_context;

        // ── Per-section budget clamps ──────────────────────────────
        self.clamp_history(&mut recent, self.config.history_budget);
        self.clamp_texts(&mut summary, self.config.summary_budget);
        self.clamp_salience(&mut salience);
        if let Some(ref mut text) = web {
            self.clamp_web(text, self.config.web_budget);
        }

        // ── Total budget check ─────────────────────────────────────
        let cap = (self.config.model_input_limit as f64 * INPUT_WINDOW_SHARE) as usize;
        let mut reduced_sections = Vec::new();

        loop {
            let total = self.history_tokens(&recent)
                + self.texts_tokens(&summary)
                + self.texts_tokens(&salience)
                + web.as_deref().map(|w| self.estimator.estimate(w)).unwrap_or(0);
            if total <= cap {
                break;
            }

            // Fixed reduction order; salience last because it is
            // user-pinned.
            if web.is_some() {
                web = None;
                push_once(&mut reduced_sections, "web");
            } else if !summary.is_empty() {
                summary.pop();
                push_once(&mut reduced_sections, "summary");
            } else if !recent.is_empty() {
                recent.remove(0);
                push_once(&mut reduced_sections, "history");
            } else if !salience.is_empty() {
                salience.remove(0);
                push_once(&mut reduced_sections, "salience");
            } else {
                break;
            }
        }

        let mut tokens_per_section = BTreeMap::new();
        tokens_per_section.insert("history", self.history_tokens(&recent));
        tokens_per_section.insert("summary", self.texts_tokens(&summary));
        tokens_per_section.insert("salience", self.texts_tokens(&salience));
        tokens_per_section.insert(
            "web",
            web.as_deref().map(|w| self.estimator.estimate(w)).unwrap_or(0),
        );

        ContextBudget {
            history: recent,
            summary,
            salience,
            web,
            tokens_per_section,
            reduced_sections,
            selection_stats,
            older_messages: older_count,
        }
    }

    // ── Section clamps ─────────────────────────────────────────────

    fn history_tokens(&self, messages: &[Message]) -> usize {
        self.estimator
            .estimate_all(messages.iter().map(|m| m.content.as_str()))
    }

    fn texts_tokens(&self, texts: &[String]) -> usize {
        self.estimator.estimate_all(texts.iter().map(String::as_str))
    }

    /// Drop oldest messages until the section fits.
    fn clamp_history(&self, messages: &mut Vec<Message>, budget: usize) {
        while !messages.is_empty() && self.history_tokens(messages) > budget {
            messages.remove(0);
        }
    }

    /// Drop trailing (lowest-ranked) entries until the section fits.
    fn clamp_texts(&self, texts: &mut Vec<String>, budget: usize) {
        while !texts.is_empty() && self.texts_tokens(texts) > budget {
            texts.pop();
        }
    }

    /// Salience is always included unless it alone exceeds its
    /// sub-budget, in which case the oldest points are dropped.
    fn clamp_salience(&self, salience: &mut Vec<String>) {
        while !salience.is_empty()
            && self.texts_tokens(salience) > self.config.salience_budget
        {
            salience.remove(0);
        }
    }

    fn clamp_web(&self, text: &mut String, budget: usize) {
        while !text.is_empty() && self.estimator.estimate(text) > budget {
            // Token→char conversion is approximate; halve until it fits.
            let keep = text.len() / 2;
            let boundary = (0..=keep)
                .rev()
                .find(|&i| text.is_char_boundary(i))
                .unwrap_or(0);
            text.truncate(boundary);
        }
    }
}

fn push_once(sections: &mut Vec<&'static str>, name: &'static str) {
    if !sections.contains(&name) {
        sections.push(name);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
