mod auth;
mod context;
mod features;
mod llm;
mod search;
mod server;
mod telemetry;
mod tuning;
mod web;

pub use auth::*;
pub use context::*;
pub use features::*;
pub use llm::*;
pub use search::*;
pub use server::*;
pub use telemetry::*;
pub use tuning::*;
pub use web::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub features: FeatureSet,
    #[serde(default)]
    pub tuning: Tuning,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Config {
    /// Parse a TOML config document.
    pub fn from_toml(raw: &str) -> crate::Result<Self> {
        toml::from_str(raw)
            .map_err(|e| crate::Error::parse(format!("config TOML: {e}")))
    }

    /// Validate the configuration, returning all issues found.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.llm.base_url.is_empty() {
            issues.push(ConfigIssue::error("llm.base_url", "must not be empty"));
        }
        if self.search.endpoint.is_empty() {
            issues.push(ConfigIssue::warning(
                "search.endpoint",
                "not set; knowledge retrieval will fail at dispatch time",
            ));
        }
        if self.tuning.reranker_threshold < 0.0 {
            issues.push(ConfigIssue::error(
                "tuning.reranker_threshold",
                "must be >= 0",
            ));
        }
        if self.tuning.fallback_reranker_threshold > self.tuning.reranker_threshold {
            issues.push(ConfigIssue::warning(
                "tuning.fallback_reranker_threshold",
                "is stricter than the primary threshold; the fallback ladder will never relax",
            ));
        }
        if self.tuning.retrieval_min_docs == 0 {
            issues.push(ConfigIssue::error(
                "tuning.retrieval_min_docs",
                "must be >= 1",
            ));
        }
        if !(0.0..=1.0).contains(&self.tuning.critic_threshold) {
            issues.push(ConfigIssue::error(
                "tuning.critic_threshold",
                "must be in [0, 1]",
            ));
        }
        if !(0.0..=1.0).contains(&self.tuning.critic_accept_coverage) {
            issues.push(ConfigIssue::error(
                "tuning.critic_accept_coverage",
                "must be in [0, 1]",
            ));
        }
        if self.context.model_input_limit == 0 {
            issues.push(ConfigIssue::error(
                "context.model_input_limit",
                "must be > 0",
            ));
        }
        if self.telemetry.ring_size == 0 {
            issues.push(ConfigIssue::error("telemetry.ring_size", "must be >= 1"));
        }

        issues
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl ConfigIssue {
    fn error(field: &str, message: &str) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: &str, message: &str) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.telemetry.ring_size, 100);
        assert!(config.features.enable_critic);
    }

    #[test]
    fn validate_flags_bad_thresholds() {
        let mut config = Config::default();
        config.llm.base_url = "https://llm.example".into();
        config.tuning.critic_threshold = 1.5;
        let issues = config.validate();
        assert!(issues
            .iter()
            .any(|i| i.field == "tuning.critic_threshold"
                && i.severity == ConfigSeverity::Error));
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let config = Config::from_toml(
            r#"
            [server]
            port = 9090

            [tuning]
            rag_top_k = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.tuning.rag_top_k, 10);
        // Untouched sections keep defaults.
        assert_eq!(config.tuning.retrieval_min_docs, 3);
    }
}
