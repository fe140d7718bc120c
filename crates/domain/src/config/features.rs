use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The resolved per-turn feature flags.
///
/// Resolution layers defaults ← persisted ← per-request overrides.
/// Override maps are structurally sanitized: unknown keys and
/// non-boolean values are silently dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureSet {
    pub enable_critic: bool,
    pub enable_lazy_retrieval: bool,
    pub enable_intent_routing: bool,
    pub enable_web_quality_filter: bool,
    pub enable_web_reranking: bool,
    pub enable_semantic_boost: bool,
    pub enable_semantic_summary: bool,
    pub enable_semantic_memory: bool,
    pub enable_query_decomposition: bool,
    pub enable_adaptive_retrieval: bool,
    pub enable_crag: bool,
    pub enable_multi_index_federation: bool,
    pub enable_response_storage: bool,
    pub enable_web_safe_mode: bool,
}

impl Default for FeatureSet {
    fn default() -> Self {
        Self {
            enable_critic: true,
            enable_lazy_retrieval: true,
            enable_intent_routing: true,
            enable_web_quality_filter: true,
            enable_web_reranking: false,
            enable_semantic_boost: false,
            enable_semantic_summary: false,
            enable_semantic_memory: false,
            enable_query_decomposition: false,
            enable_adaptive_retrieval: true,
            enable_crag: true,
            enable_multi_index_federation: false,
            enable_response_storage: true,
            enable_web_safe_mode: false,
        }
    }
}

/// The recognized override key names (wire form, upper snake case).
const FEATURE_KEYS: &[&str] = &[
    "ENABLE_CRITIC",
    "ENABLE_LAZY_RETRIEVAL",
    "ENABLE_INTENT_ROUTING",
    "ENABLE_WEB_QUALITY_FILTER",
    "ENABLE_WEB_RERANKING",
    "ENABLE_SEMANTIC_BOOST",
    "ENABLE_SEMANTIC_SUMMARY",
    "ENABLE_SEMANTIC_MEMORY",
    "ENABLE_QUERY_DECOMPOSITION",
    "ENABLE_ADAPTIVE_RETRIEVAL",
    "ENABLE_CRAG",
    "ENABLE_MULTI_INDEX_FEDERATION",
    "ENABLE_RESPONSE_STORAGE",
    "ENABLE_WEB_SAFE_MODE",
];

impl FeatureSet {
    /// Apply an override map on top of this set. Unknown keys and
    /// non-boolean values are dropped without error.
    pub fn apply_overrides(
        &self,
        overrides: &BTreeMap<String, serde_json::Value>,
    ) -> FeatureSet {
        let mut resolved = self.clone();
        for (key, value) in overrides {
            let Some(flag) = value.as_bool() else {
                tracing::debug!(key = %key, "dropping non-boolean feature override");
                continue;
            };
            match key.as_str() {
                "ENABLE_CRITIC" => resolved.enable_critic = flag,
                "ENABLE_LAZY_RETRIEVAL" => resolved.enable_lazy_retrieval = flag,
                "ENABLE_INTENT_ROUTING" => resolved.enable_intent_routing = flag,
                "ENABLE_WEB_QUALITY_FILTER" => resolved.enable_web_quality_filter = flag,
                "ENABLE_WEB_RERANKING" => resolved.enable_web_reranking = flag,
                "ENABLE_SEMANTIC_BOOST" => resolved.enable_semantic_boost = flag,
                "ENABLE_SEMANTIC_SUMMARY" => resolved.enable_semantic_summary = flag,
                "ENABLE_SEMANTIC_MEMORY" => resolved.enable_semantic_memory = flag,
                "ENABLE_QUERY_DECOMPOSITION" => resolved.enable_query_decomposition = flag,
                "ENABLE_ADAPTIVE_RETRIEVAL" => resolved.enable_adaptive_retrieval = flag,
                "ENABLE_CRAG" => resolved.enable_crag = flag,
                "ENABLE_MULTI_INDEX_FEDERATION" => {
                    resolved.enable_multi_index_federation = flag
                }
                "ENABLE_RESPONSE_STORAGE" => resolved.enable_response_storage = flag,
                "ENABLE_WEB_SAFE_MODE" => resolved.enable_web_safe_mode = flag,
                _ => {
                    tracing::debug!(key = %key, "dropping unknown feature override");
                }
            }
        }
        resolved
    }

    /// Resolve the per-turn set: defaults ← persisted ← request overrides.
    pub fn resolve(
        defaults: &FeatureSet,
        persisted: Option<&BTreeMap<String, serde_json::Value>>,
        request: Option<&BTreeMap<String, serde_json::Value>>,
    ) -> FeatureSet {
        let mut resolved = defaults.clone();
        if let Some(persisted) = persisted {
            resolved = resolved.apply_overrides(persisted);
        }
        if let Some(request) = request {
            resolved = resolved.apply_overrides(request);
        }
        resolved
    }

    /// Wire-form snapshot for the `features` event.
    pub fn to_wire(&self) -> BTreeMap<String, bool> {
        let mut map = BTreeMap::new();
        for key in FEATURE_KEYS {
            map.insert((*key).to_string(), self.get(key));
        }
        map
    }

    fn get(&self, key: &str) -> bool {
        match key {
            "ENABLE_CRITIC" => self.enable_critic,
            "ENABLE_LAZY_RETRIEVAL" => self.enable_lazy_retrieval,
            "ENABLE_INTENT_ROUTING" => self.enable_intent_routing,
            "ENABLE_WEB_QUALITY_FILTER" => self.enable_web_quality_filter,
            "ENABLE_WEB_RERANKING" => self.enable_web_reranking,
            "ENABLE_SEMANTIC_BOOST" => self.enable_semantic_boost,
            "ENABLE_SEMANTIC_SUMMARY" => self.enable_semantic_summary,
            "ENABLE_SEMANTIC_MEMORY" => self.enable_semantic_memory,
            "ENABLE_QUERY_DECOMPOSITION" => self.enable_query_decomposition,
            "ENABLE_ADAPTIVE_RETRIEVAL" => self.enable_adaptive_retrieval,
            "ENABLE_CRAG" => self.enable_crag,
            "ENABLE_MULTI_INDEX_FEDERATION" => self.enable_multi_index_federation,
            "ENABLE_RESPONSE_STORAGE" => self.enable_response_storage,
            "ENABLE_WEB_SAFE_MODE" => self.enable_web_safe_mode,
            _ => false,
        }
    }
}
