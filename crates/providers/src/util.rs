//! Shared utility functions for outbound adapters.

use gl_domain::config::AuthConfig;
use gl_domain::error::{Error, Result};
use sha2::{Digest, Sha256};

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
///
/// Timeout errors map to the `timeout` kind; everything else maps to
/// `transport`. Both are retry-eligible.
pub fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::timeout(e.to_string())
    } else {
        Error::transport(e.to_string())
    }
}

/// Resolve the API key from an [`AuthConfig`].
///
/// Precedence:
/// 1. `key` field (plaintext — warn)
/// 2. `service` + `account` → OS keychain via `keyring`
/// 3. `env` field (reads environment variable)
/// 4. Fallback for keychain mode: env var `{SERVICE}_{ACCOUNT}` uppercased
/// 5. Error
pub fn resolve_api_key(auth: &AuthConfig) -> Result<String> {
    if let Some(ref key) = auth.key {
        tracing::warn!(
            "API key loaded from plaintext config field 'key' — \
             prefer 'env' or keychain mode instead"
        );
        return Ok(key.clone());
    }

    if let (Some(ref service), Some(ref account)) = (&auth.service, &auth.account) {
        match resolve_from_keychain(service, account) {
            Ok(secret) => return Ok(secret),
            Err(e) => {
                tracing::warn!(
                    service = %service,
                    account = %account,
                    error = %e,
                    "keychain lookup failed, falling through to env"
                );
            }
        }
    }

    if let Some(ref env_var) = auth.env {
        return std::env::var(env_var).map_err(|_| {
            Error::auth(format!(
                "environment variable '{env_var}' not set or not valid UTF-8"
            ))
        });
    }

    if let (Some(ref service), Some(ref account)) = (&auth.service, &auth.account) {
        let fallback_var = keychain_fallback_env_name(service, account);
        if let Ok(val) = std::env::var(&fallback_var) {
            tracing::info!(
                env_var = %fallback_var,
                "API key resolved from keychain headless fallback env var"
            );
            return Ok(val);
        }
    }

    Err(Error::config_missing(
        "no API key configured: set 'key', 'env', or keychain \
         'service'+'account' in the auth config",
    ))
}

/// Try to read a secret from the OS keychain.
fn resolve_from_keychain(service: &str, account: &str) -> Result<String> {
    let entry = keyring::Entry::new(service, account)
        .map_err(|e| Error::auth(format!("keyring entry creation failed: {e}")))?;
    entry
        .get_password()
        .map_err(|e| Error::auth(format!("keyring get_password failed: {e}")))
}

/// Build the headless fallback env var name for a keychain service/account.
pub fn keychain_fallback_env_name(service: &str, account: &str) -> String {
    format!(
        "{}_{}",
        service.to_uppercase().replace('-', "_"),
        account.to_uppercase().replace('-', "_"),
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// User correlation field
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Maximum length of the `user` correlation field on the wire.
const USER_FIELD_MAX_LEN: usize = 64;

/// Sanitize the opaque `user` correlation field attached to LLM calls.
///
/// The value passes through unchanged when it is non-empty, at most 64
/// characters, and contains only `[A-Za-z0-9_.:-]`. Otherwise it is
/// substituted with a deterministic hex hash of the input, so repeated
/// calls with the same raw value always produce the same wire value.
pub fn sanitize_user_field(raw: &str) -> String {
    let acceptable = !raw.is_empty()
        && raw.len() <= USER_FIELD_MAX_LEN
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '-'));
    if acceptable {
        return raw.to_string();
    }

    let digest = Sha256::digest(raw.as_bytes());
    format!("u-{}", &hex::encode(digest)[..32])
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_env_name_basic() {
        assert_eq!(
            keychain_fallback_env_name("groundline", "search-api-key"),
            "GROUNDLINE_SEARCH_API_KEY"
        );
    }

    #[test]
    fn resolve_api_key_plaintext() {
        let auth = AuthConfig {
            key: Some("sk-test-123".into()),
            ..Default::default()
        };
        assert_eq!(resolve_api_key(&auth).unwrap(), "sk-test-123");
    }

    #[test]
    fn resolve_api_key_env_var() {
        let var_name = "GL_TEST_RESOLVE_ENV_KEY_1234";
        std::env::set_var(var_name, "env-secret-value");
        let auth = AuthConfig {
            env: Some(var_name.into()),
            ..Default::default()
        };
        assert_eq!(resolve_api_key(&auth).unwrap(), "env-secret-value");
        std::env::remove_var(var_name);
    }

    #[test]
    fn resolve_api_key_missing_is_config_error() {
        let err = resolve_api_key(&AuthConfig::default()).unwrap_err();
        assert_eq!(err.kind, gl_domain::ErrorKind::ConfigMissing);
    }

    #[test]
    fn clean_user_field_passes_through() {
        assert_eq!(sanitize_user_field("session-42.a:b_c"), "session-42.a:b_c");
    }

    #[test]
    fn long_user_field_is_hashed() {
        let long = "x".repeat(65);
        let out = sanitize_user_field(&long);
        assert!(out.starts_with("u-"));
        assert!(out.len() <= USER_FIELD_MAX_LEN);
    }

    #[test]
    fn disallowed_characters_are_hashed() {
        let out = sanitize_user_field("user with spaces");
        assert!(out.starts_with("u-"));
    }

    #[test]
    fn hashing_is_stable_and_injective_in_practice() {
        let a1 = sanitize_user_field("bad input!");
        let a2 = sanitize_user_field("bad input!");
        let b = sanitize_user_field("other bad input!");
        assert_eq!(a1, a2);
        assert_ne!(a1, b);
    }

    #[test]
    fn empty_user_field_is_substituted() {
        let out = sanitize_user_field("");
        assert!(!out.is_empty());
        assert!(out.starts_with("u-"));
    }

    #[test]
    fn boundary_length_is_accepted() {
        let exact = "a".repeat(USER_FIELD_MAX_LEN);
        assert_eq!(sanitize_user_field(&exact), exact);
        let over = "a".repeat(USER_FIELD_MAX_LEN + 1);
        assert_ne!(sanitize_user_field(&over), over);
    }
}
