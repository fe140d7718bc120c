//! Injected auth header providers and the bearer-token cache.
//!
//! The cache coalesces refreshes: for each cache key at most one token
//! fetch is in flight at any instant; concurrent callers wait on the
//! same per-key async mutex and reuse the freshly stored token. Tokens
//! are never written to disk and never logged.

use gl_domain::config::AuthConfig;
use gl_domain::error::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Header provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Supplies the auth header for an outbound call.
///
/// Concrete implementations are a static API key or a cached bearer
/// token; tests inject trivial fakes.
#[async_trait::async_trait]
pub trait HeaderProvider: Send + Sync {
    /// Returns `(header_name, header_value)`.
    async fn auth_header(&self) -> Result<(String, String)>;
}

/// Static API-key header, resolved once at construction.
pub struct StaticKeyProvider {
    header: String,
    value: String,
}

impl StaticKeyProvider {
    /// Resolve the key from an [`AuthConfig`] and pre-build the header.
    pub fn from_auth_config(auth: &AuthConfig) -> Result<Self> {
        let key = crate::util::resolve_api_key(auth)?;
        let header = auth
            .header
            .clone()
            .unwrap_or_else(|| "Authorization".into());
        let prefix = auth.prefix.clone().unwrap_or_else(|| {
            if header.eq_ignore_ascii_case("authorization") {
                "Bearer ".into()
            } else {
                String::new()
            }
        });
        Ok(Self {
            header,
            value: format!("{prefix}{key}"),
        })
    }

    /// A provider with a fixed header value. Used by tests and as the
    /// placeholder for unconfigured optional services.
    pub fn fixed(header: &str, value: &str) -> Self {
        Self {
            header: header.into(),
            value: value.into(),
        }
    }
}

#[async_trait::async_trait]
impl HeaderProvider for StaticKeyProvider {
    async fn auth_header(&self) -> Result<(String, String)> {
        Ok((self.header.clone(), self.value.clone()))
    }
}

// Manual Debug impl to avoid leaking the key value.
impl std::fmt::Debug for StaticKeyProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticKeyProvider")
            .field("header", &self.header)
            .finish()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bearer token cache
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A fetched bearer token with its expiry.
#[derive(Clone)]
pub struct BearerToken {
    pub token: String,
    pub expires_at: Instant,
}

/// Fetches fresh bearer tokens for a cache key.
#[async_trait::async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch(&self, cache_key: &str) -> Result<BearerToken>;
}

/// Per-key slot. The async mutex is the coalescing mechanism: holding
/// it across the fetch means concurrent callers for the same key wait
/// instead of launching their own refresh.
type Slot = Arc<tokio::sync::Mutex<Option<BearerToken>>>;

/// Bearer-token cache with expiry slop and coalesced refresh.
pub struct BearerTokenCache {
    slots: Mutex<HashMap<String, Slot>>,
    source: Arc<dyn TokenSource>,
    /// Tokens are refreshed when `expires_at - now < slop`.
    slop: Duration,
}

impl BearerTokenCache {
    pub fn new(source: Arc<dyn TokenSource>, slop: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            source,
            slop,
        }
    }

    /// Return a valid token for the key, refreshing if it is missing or
    /// within the expiry slop.
    pub async fn token(&self, cache_key: &str) -> Result<String> {
        let slot = {
            let mut slots = self.slots.lock();
            Arc::clone(
                slots
                    .entry(cache_key.to_string())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(None))),
            )
        };

        let mut guard = slot.lock().await;
        if let Some(cached) = guard.as_ref() {
            if cached.expires_at.saturating_duration_since(Instant::now()) >= self.slop {
                return Ok(cached.token.clone());
            }
        }

        // Refresh while holding the slot lock: at most one in-flight
        // fetch per cache key.
        let fresh = self.source.fetch(cache_key).await?;
        let token = fresh.token.clone();
        *guard = Some(fresh);
        tracing::debug!(cache_key = %cache_key, "bearer token refreshed");
        Ok(token)
    }
}

impl std::fmt::Debug for BearerTokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerTokenCache")
            .field("keys", &self.slots.lock().len())
            .field("slop", &self.slop)
            .finish()
    }
}

/// [`HeaderProvider`] backed by a [`BearerTokenCache`].
pub struct BearerHeaderProvider {
    cache: Arc<BearerTokenCache>,
    cache_key: String,
}

impl BearerHeaderProvider {
    pub fn new(cache: Arc<BearerTokenCache>, cache_key: impl Into<String>) -> Self {
        Self {
            cache,
            cache_key: cache_key.into(),
        }
    }
}

#[async_trait::async_trait]
impl HeaderProvider for BearerHeaderProvider {
    async fn auth_header(&self) -> Result<(String, String)> {
        let token = self.cache.token(&self.cache_key).await?;
        Ok(("Authorization".into(), format!("Bearer {token}")))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Token source that counts fetches and sleeps to widen the race
    /// window.
    struct CountingSource {
        fetches: AtomicUsize,
        ttl: Duration,
    }

    #[async_trait::async_trait]
    impl TokenSource for CountingSource {
        async fn fetch(&self, cache_key: &str) -> Result<BearerToken> {
            let n = self.fetches.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(BearerToken {
                token: format!("{cache_key}-token-{n}"),
                expires_at: Instant::now() + self.ttl,
            })
        }
    }

    #[tokio::test]
    async fn concurrent_cold_start_coalesces_to_one_fetch() {
        let source = Arc::new(CountingSource {
            fetches: AtomicUsize::new(0),
            ttl: Duration::from_secs(3600),
        });
        let cache = Arc::new(BearerTokenCache::new(
            source.clone(),
            Duration::from_secs(120),
        ));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move { cache.token("llm").await }));
        }
        let mut tokens = Vec::new();
        for h in handles {
            tokens.push(h.await.unwrap().unwrap());
        }

        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
        assert!(tokens.iter().all(|t| t == &tokens[0]));
    }

    #[tokio::test]
    async fn distinct_keys_fetch_independently() {
        let source = Arc::new(CountingSource {
            fetches: AtomicUsize::new(0),
            ttl: Duration::from_secs(3600),
        });
        let cache = BearerTokenCache::new(source.clone(), Duration::from_secs(120));

        let a = cache.token("llm").await.unwrap();
        let b = cache.token("search").await.unwrap();
        assert_ne!(a, b);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn token_inside_slop_window_is_refreshed() {
        let source = Arc::new(CountingSource {
            fetches: AtomicUsize::new(0),
            // Expires in 1s while slop is 2min — always inside the slop
            // window, so every call refreshes.
            ttl: Duration::from_secs(1),
        });
        let cache = BearerTokenCache::new(source.clone(), Duration::from_secs(120));

        cache.token("llm").await.unwrap();
        cache.token("llm").await.unwrap();
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn valid_token_is_reused() {
        let source = Arc::new(CountingSource {
            fetches: AtomicUsize::new(0),
            ttl: Duration::from_secs(3600),
        });
        let cache = BearerTokenCache::new(source.clone(), Duration::from_secs(120));

        let a = cache.token("llm").await.unwrap();
        let b = cache.token("llm").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn debug_does_not_leak_tokens() {
        struct NoopSource;
        #[async_trait::async_trait]
        impl TokenSource for NoopSource {
            async fn fetch(&self, _k: &str) -> Result<BearerToken> {
                Ok(BearerToken {
                    token: "secret-token".into(),
                    expires_at: Instant::now(),
                })
            }
        }
        let cache = BearerTokenCache::new(Arc::new(NoopSource), Duration::from_secs(1));
        let debug = format!("{cache:?}");
        assert!(!debug.contains("secret-token"));
    }
}
