use super::auth::AuthConfig;
use serde::{Deserialize, Serialize};

/// External web search configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    /// Keyword search API endpoint.
    #[serde(default = "d_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub auth: AuthConfig,
    /// Results requested per query.
    #[serde(default = "d_count")]
    pub count: usize,
    /// Restrict results to the last N days when set.
    #[serde(default)]
    pub recency_days: Option<u32>,
    /// Safe-search level used when the safe-mode feature is enabled.
    #[serde(default)]
    pub safe_search: SafeSearchLevel,
    /// Trusted domains for the authority scorecard (suffix match).
    #[serde(default = "d_trusted_domains")]
    pub trusted_domains: Vec<String>,
    #[serde(default)]
    pub academic: AcademicConfig,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            endpoint: d_endpoint(),
            auth: AuthConfig::default(),
            count: d_count(),
            recency_days: None,
            safe_search: SafeSearchLevel::default(),
            trusted_domains: d_trusted_domains(),
            academic: AcademicConfig::default(),
        }
    }
}

/// Safe-search level for the web search API. Ordered by strictness.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum SafeSearchLevel {
    #[default]
    Off,
    Active,
    High,
}

impl SafeSearchLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            SafeSearchLevel::Off => "off",
            SafeSearchLevel::Active => "active",
            SafeSearchLevel::High => "high",
        }
    }
}

/// Structured-paper source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcademicConfig {
    #[serde(default)]
    pub enable_semantic_scholar: bool,
    #[serde(default = "d_semantic_scholar_endpoint")]
    pub semantic_scholar_endpoint: String,
    #[serde(default)]
    pub enable_arxiv: bool,
    #[serde(default = "d_arxiv_endpoint")]
    pub arxiv_endpoint: String,
    #[serde(default = "d_paper_count")]
    pub paper_count: usize,
}

impl Default for AcademicConfig {
    fn default() -> Self {
        Self {
            enable_semantic_scholar: false,
            semantic_scholar_endpoint: d_semantic_scholar_endpoint(),
            enable_arxiv: false,
            arxiv_endpoint: d_arxiv_endpoint(),
            paper_count: d_paper_count(),
        }
    }
}

fn d_endpoint() -> String {
    "https://api.search.brave.com/res/v1/web/search".into()
}

fn d_count() -> usize {
    6
}

fn d_trusted_domains() -> Vec<String> {
    vec![
        ".gov".into(),
        ".edu".into(),
        ".org".into(),
        "wikipedia.org".into(),
        "nature.com".into(),
        "acm.org".into(),
        "ieee.org".into(),
        "arxiv.org".into(),
    ]
}

fn d_semantic_scholar_endpoint() -> String {
    "https://api.semanticscholar.org/graph/v1/paper/search".into()
}

fn d_arxiv_endpoint() -> String {
    "https://export.arxiv.org/api/query".into()
}

fn d_paper_count() -> usize {
    5
}
