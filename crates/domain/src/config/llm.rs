use super::auth::AuthConfig;
use serde::{Deserialize, Serialize};

/// Hosted LLM service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of the Responses-style API (no trailing slash).
    #[serde(default = "d_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub auth: AuthConfig,
    /// Per-role model identifiers.
    #[serde(default)]
    pub models: ModelRoles,
    /// Model-id prefixes that enforce reasoning mode. Sampling
    /// temperature is suppressed for these models.
    #[serde(default = "d_reasoning_prefixes")]
    pub reasoning_model_prefixes: Vec<String>,
    /// Default max output tokens when a call does not specify one.
    #[serde(default = "d_max_output_tokens")]
    pub max_output_tokens: u32,
    /// Embedding vector dimensionality (validation only).
    #[serde(default = "d_embedding_dimensions")]
    pub embedding_dimensions: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: d_base_url(),
            auth: AuthConfig::default(),
            models: ModelRoles::default(),
            reasoning_model_prefixes: d_reasoning_prefixes(),
            max_output_tokens: d_max_output_tokens(),
            embedding_dimensions: d_embedding_dimensions(),
        }
    }
}

/// Which model serves which pipeline role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRoles {
    #[serde(default = "d_router_model")]
    pub router: String,
    #[serde(default = "d_planner_model")]
    pub planner: String,
    #[serde(default = "d_synthesizer_model")]
    pub synthesizer: String,
    #[serde(default = "d_critic_model")]
    pub critic: String,
    #[serde(default = "d_embedding_model")]
    pub embedding: String,
}

impl Default for ModelRoles {
    fn default() -> Self {
        Self {
            router: d_router_model(),
            planner: d_planner_model(),
            synthesizer: d_synthesizer_model(),
            critic: d_critic_model(),
            embedding: d_embedding_model(),
        }
    }
}

impl LlmConfig {
    /// Whether the given model enforces reasoning mode (temperature
    /// must be suppressed).
    pub fn is_reasoning_model(&self, model: &str) -> bool {
        self.reasoning_model_prefixes
            .iter()
            .any(|p| model.starts_with(p.as_str()))
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_base_url() -> String {
    "https://api.openai.com/v1".into()
}

fn d_reasoning_prefixes() -> Vec<String> {
    vec!["o1".into(), "o3".into(), "o4".into(), "gpt-5".into()]
}

fn d_max_output_tokens() -> u32 {
    4096
}

fn d_embedding_dimensions() -> usize {
    1536
}

fn d_router_model() -> String {
    "gpt-4o-mini".into()
}

fn d_planner_model() -> String {
    "gpt-4o-mini".into()
}

fn d_synthesizer_model() -> String {
    "gpt-4o".into()
}

fn d_critic_model() -> String {
    "gpt-4o-mini".into()
}

fn d_embedding_model() -> String {
    "text-embedding-3-small".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasoning_prefix_match() {
        let config = LlmConfig::default();
        assert!(config.is_reasoning_model("o3-mini"));
        assert!(config.is_reasoning_model("gpt-5-turbo"));
        assert!(!config.is_reasoning_model("gpt-4o"));
    }
}
