use super::auth::AuthConfig;
use serde::{Deserialize, Serialize};

/// Hybrid search index configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Service endpoint (no trailing slash).
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "d_index_name")]
    pub index_name: String,
    #[serde(default = "d_api_version")]
    pub api_version: String,
    #[serde(default)]
    pub auth: AuthConfig,
    /// Semantic ranking configuration name on the index.
    #[serde(default = "d_semantic_configuration")]
    pub semantic_configuration: String,
    /// Vector field name on the index.
    #[serde(default = "d_vector_field")]
    pub vector_field: String,
    /// Fields requested from the index by default.
    #[serde(default = "d_select_fields")]
    pub select_fields: Vec<String>,
    /// Fields the keyword leg searches by default.
    #[serde(default = "d_search_fields")]
    pub search_fields: Vec<String>,
    /// TTL for deduplicating repeated gateway warnings (seconds).
    #[serde(default = "d_warning_ttl_secs")]
    pub warning_ttl_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            index_name: d_index_name(),
            api_version: d_api_version(),
            auth: AuthConfig::default(),
            semantic_configuration: d_semantic_configuration(),
            vector_field: d_vector_field(),
            select_fields: d_select_fields(),
            search_fields: d_search_fields(),
            warning_ttl_secs: d_warning_ttl_secs(),
        }
    }
}

fn d_index_name() -> String {
    "knowledge".into()
}

fn d_api_version() -> String {
    "2024-07-01".into()
}

fn d_semantic_configuration() -> String {
    "default".into()
}

fn d_vector_field() -> String {
    "embedding".into()
}

fn d_select_fields() -> Vec<String> {
    vec![
        "id".into(),
        "title".into(),
        "content".into(),
        "url".into(),
        "page_number".into(),
    ]
}

fn d_search_fields() -> Vec<String> {
    vec!["title".into(), "content".into()]
}

fn d_warning_ttl_secs() -> u64 {
    300
}
