use serde::{Deserialize, Serialize};

/// Context budgeting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Latest K turns kept verbatim; older turns are represented by
    /// rolling summary bullets.
    #[serde(default = "d_verbatim_turns")]
    pub verbatim_turns: usize,
    /// Top-M summary bullets selected per turn.
    #[serde(default = "d_summary_bullets")]
    pub summary_bullets: usize,
    /// Model input window in tokens. The budgeter caps total context at
    /// 90% of this.
    #[serde(default = "d_model_input_limit")]
    pub model_input_limit: usize,
    /// Per-section token budgets.
    #[serde(default = "d_history_budget")]
    pub history_budget: usize,
    #[serde(default = "d_summary_budget")]
    pub summary_budget: usize,
    #[serde(default = "d_salience_budget")]
    pub salience_budget: usize,
    #[serde(default = "d_web_budget")]
    pub web_budget: usize,
    /// Tokenizer model for estimation; falls back to chars/4 when the
    /// model has no known encoding.
    #[serde(default = "d_tokenizer_model")]
    pub tokenizer_model: String,
    /// Token-estimation cache capacity (entries).
    #[serde(default = "d_estimate_cache_entries")]
    pub estimate_cache_entries: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            verbatim_turns: d_verbatim_turns(),
            summary_bullets: d_summary_bullets(),
            model_input_limit: d_model_input_limit(),
            history_budget: d_history_budget(),
            summary_budget: d_summary_budget(),
            salience_budget: d_salience_budget(),
            web_budget: d_web_budget(),
            tokenizer_model: d_tokenizer_model(),
            estimate_cache_entries: d_estimate_cache_entries(),
        }
    }
}

fn d_verbatim_turns() -> usize {
    8
}

fn d_summary_bullets() -> usize {
    6
}

fn d_model_input_limit() -> usize {
    128_000
}

fn d_history_budget() -> usize {
    24_000
}

fn d_summary_budget() -> usize {
    4_000
}

fn d_salience_budget() -> usize {
    2_000
}

fn d_web_budget() -> usize {
    8_000
}

fn d_tokenizer_model() -> String {
    "gpt-4o".into()
}

fn d_estimate_cache_entries() -> usize {
    4_096
}
