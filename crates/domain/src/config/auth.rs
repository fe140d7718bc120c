use serde::{Deserialize, Serialize};

/// Credential configuration for an outbound service.
///
/// Resolution is performed by the providers crate; this struct only
/// records where the secret lives. Secrets are never logged.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub mode: AuthMode,
    /// Header name carrying the credential (e.g. "Authorization",
    /// "api-key", "X-Subscription-Token").
    #[serde(default)]
    pub header: Option<String>,
    /// Header value prefix (e.g. "Bearer ").
    #[serde(default)]
    pub prefix: Option<String>,
    /// Env var containing the key.
    #[serde(default)]
    pub env: Option<String>,
    /// Direct key (config-only setups; prefer env or keychain).
    #[serde(default)]
    pub key: Option<String>,
    /// Keychain service name.
    #[serde(default)]
    pub service: Option<String>,
    /// Keychain account name.
    #[serde(default)]
    pub account: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// Static API key resolved once at startup.
    #[default]
    ApiKey,
    /// Short-lived bearer token fetched through a token source and
    /// cached with expiry slop.
    Bearer,
    /// Keychain-stored key.
    Keychain,
    None,
}
