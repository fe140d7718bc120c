use serde::{Deserialize, Serialize};

/// The closed set of tunable thresholds.
///
/// Every knob has a documented default; operators override individual
/// fields under `[tuning]` in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tuning {
    /// Primary reranker score floor. References scoring below it are
    /// dropped. Zero disables the filter.
    #[serde(default = "d_reranker_threshold")]
    pub reranker_threshold: f64,
    /// Relaxed floor used by the fallback ladder.
    #[serde(default = "d_fallback_reranker_threshold")]
    pub fallback_reranker_threshold: f64,
    /// Minimum documents a retrieval step must yield before the
    /// fallback ladder engages.
    #[serde(default = "d_retrieval_min_docs")]
    pub retrieval_min_docs: usize,
    /// Base `top` for retrieval.
    #[serde(default = "d_rag_top_k")]
    pub rag_top_k: usize,
    /// Max characters for a lazy-retrieval summary.
    #[serde(default = "d_lazy_summary_max_chars")]
    pub lazy_summary_max_chars: usize,
    /// How many lazy references get their full content prefetched.
    #[serde(default = "d_lazy_prefetch_count")]
    pub lazy_prefetch_count: usize,
    /// Plans below this confidence force dual retrieval.
    #[serde(default = "d_confidence_escalation_threshold")]
    pub confidence_escalation_threshold: f64,
    /// Max critic revision attempts after the initial synthesis.
    #[serde(default = "d_critic_max_retries")]
    pub critic_max_retries: usize,
    /// Coverage floor for the final safety gate.
    #[serde(default = "d_critic_threshold")]
    pub critic_threshold: f64,
    /// Coverage at or above which a revise verdict is accepted anyway.
    #[serde(default = "d_critic_accept_coverage")]
    pub critic_accept_coverage: f64,
    #[serde(default = "d_adaptive_min_coverage")]
    pub adaptive_min_coverage: f64,
    #[serde(default = "d_adaptive_min_diversity")]
    pub adaptive_min_diversity: f64,
    #[serde(default = "d_adaptive_max_reformulations")]
    pub adaptive_max_reformulations: usize,
    /// Coverage floor below which the search gateway logs a warning.
    #[serde(default = "d_search_min_coverage")]
    pub search_min_coverage: f64,
    #[serde(default = "d_web_min_authority")]
    pub web_min_authority: f64,
    #[serde(default = "d_web_max_redundancy")]
    pub web_max_redundancy: f64,
    #[serde(default = "d_web_min_relevance")]
    pub web_min_relevance: f64,
    /// Assembled web context is trimmed to this many tokens.
    #[serde(default = "d_web_context_max_tokens")]
    pub web_context_max_tokens: usize,
    /// Per-message content clamp (characters).
    #[serde(default = "d_max_message_length")]
    pub max_message_length: usize,
    #[serde(default = "d_max_messages_per_request")]
    pub max_messages_per_request: usize,
    /// Max characters for a retrieval query.
    #[serde(default = "d_max_query_length")]
    pub max_query_length: usize,
    /// Bearer tokens are refreshed this long before expiry.
    #[serde(default = "d_token_expiry_slop_ms")]
    pub token_expiry_slop_ms: u64,
    /// Per-operation outbound timeout.
    #[serde(default = "d_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            reranker_threshold: d_reranker_threshold(),
            fallback_reranker_threshold: d_fallback_reranker_threshold(),
            retrieval_min_docs: d_retrieval_min_docs(),
            rag_top_k: d_rag_top_k(),
            lazy_summary_max_chars: d_lazy_summary_max_chars(),
            lazy_prefetch_count: d_lazy_prefetch_count(),
            confidence_escalation_threshold: d_confidence_escalation_threshold(),
            critic_max_retries: d_critic_max_retries(),
            critic_threshold: d_critic_threshold(),
            critic_accept_coverage: d_critic_accept_coverage(),
            adaptive_min_coverage: d_adaptive_min_coverage(),
            adaptive_min_diversity: d_adaptive_min_diversity(),
            adaptive_max_reformulations: d_adaptive_max_reformulations(),
            search_min_coverage: d_search_min_coverage(),
            web_min_authority: d_web_min_authority(),
            web_max_redundancy: d_web_max_redundancy(),
            web_min_relevance: d_web_min_relevance(),
            web_context_max_tokens: d_web_context_max_tokens(),
            max_message_length: d_max_message_length(),
            max_messages_per_request: d_max_messages_per_request(),
            max_query_length: d_max_query_length(),
            token_expiry_slop_ms: d_token_expiry_slop_ms(),
            request_timeout_ms: d_request_timeout_ms(),
        }
    }
}

fn d_reranker_threshold() -> f64 {
    2.0
}

fn d_fallback_reranker_threshold() -> f64 {
    1.0
}

fn d_retrieval_min_docs() -> usize {
    3
}

fn d_rag_top_k() -> usize {
    5
}

fn d_lazy_summary_max_chars() -> usize {
    300
}

fn d_lazy_prefetch_count() -> usize {
    3
}

fn d_confidence_escalation_threshold() -> f64 {
    0.45
}

fn d_critic_max_retries() -> usize {
    2
}

fn d_critic_threshold() -> f64 {
    0.6
}

fn d_critic_accept_coverage() -> f64 {
    0.8
}

fn d_adaptive_min_coverage() -> f64 {
    0.4
}

fn d_adaptive_min_diversity() -> f64 {
    0.3
}

fn d_adaptive_max_reformulations() -> usize {
    3
}

fn d_search_min_coverage() -> f64 {
    0.5
}

fn d_web_min_authority() -> f64 {
    0.3
}

fn d_web_max_redundancy() -> f64 {
    0.9
}

fn d_web_min_relevance() -> f64 {
    0.3
}

fn d_web_context_max_tokens() -> usize {
    8_000
}

fn d_max_message_length() -> usize {
    8_000
}

fn d_max_messages_per_request() -> usize {
    50
}

fn d_max_query_length() -> usize {
    512
}

fn d_token_expiry_slop_ms() -> u64 {
    120_000
}

fn d_request_timeout_ms() -> u64 {
    30_000
}
