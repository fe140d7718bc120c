//! External web search gateway with rank-ordered context assembly.

use gl_domain::config::{SafeSearchLevel, WebConfig};
use gl_domain::error::{Error, Result};
use gl_domain::reference::WebResult;
use gl_providers::auth::HeaderProvider;
use gl_providers::retry::{with_retry, RetryPolicy};
use gl_providers::util::from_reqwest;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / outcome types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct WebSearchOptions {
    pub count: usize,
    pub safe_search: SafeSearchLevel,
    pub recency_days: Option<u32>,
    /// Optional search vertical (e.g. "news").
    pub mode: Option<String>,
}

impl Default for WebSearchOptions {
    fn default() -> Self {
        Self {
            count: 6,
            safe_search: SafeSearchLevel::Off,
            recency_days: None,
            mode: None,
        }
    }
}

/// Result of a web search. An unconfigured gateway yields an empty
/// result set with `missing_config` set instead of failing the turn.
#[derive(Debug, Clone, Default)]
pub struct WebSearchOutcome {
    pub results: Vec<WebResult>,
    pub missing_config: bool,
}

/// Assembled web context for the synthesizer prompt.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct WebContext {
    pub text: String,
    pub tokens: usize,
    pub trimmed: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Gateway trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Capability contract for external keyword web search.
#[async_trait::async_trait]
pub trait WebSearchGateway: Send + Sync {
    async fn web_search(
        &self,
        query: &str,
        opts: &WebSearchOptions,
    ) -> Result<WebSearchOutcome>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context assembly
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Assemble web context text in rank order, trimmed to a token budget.
///
/// `count_tokens` is injected so the assembler shares the budgeter's
/// estimator (model-aware with a character fallback). Results that do
/// not fit are dropped whole; a partially included result would produce
/// dangling prose.
pub fn assemble_web_context<F>(
    results: &[WebResult],
    max_tokens: usize,
    count_tokens: F,
) -> WebContext
where
    F: Fn(&str) -> usize,
{
    let mut ordered: Vec<&WebResult> = results.iter().collect();
    ordered.sort_by_key(|r| r.rank);

    let mut text = String::new();
    let mut tokens = 0usize;
    let mut trimmed = false;

    for result in ordered {
        let body = result.body.as_deref().unwrap_or(&result.snippet);
        let block = format!("## {} ({})\n{}\n\n", result.title, result.url, body);
        let block_tokens = count_tokens(&block);
        if tokens + block_tokens > max_tokens {
            trimmed = true;
            continue;
        }
        text.push_str(&block);
        tokens += block_tokens;
    }

    WebContext {
        text,
        tokens,
        trimmed,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Hosted adapter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Hosted [`WebSearchGateway`] adapter for a Brave-style keyword API.
pub struct KeywordWebGateway {
    config: WebConfig,
    /// `None` when no API key was configured; searches then degrade to
    /// empty outcomes with `missing_config` set.
    headers: Option<Arc<dyn HeaderProvider>>,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl KeywordWebGateway {
    pub fn new(
        config: WebConfig,
        headers: Option<Arc<dyn HeaderProvider>>,
        retry: RetryPolicy,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(from_reqwest)?;
        Ok(Self {
            config,
            headers,
            retry,
            client,
        })
    }

    fn parse_results(body: &Value) -> Vec<WebResult> {
        let now = chrono::Utc::now();
        let mut results = Vec::new();
        let items = body
            .pointer("/web/results")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        for (rank0, item) in items.iter().enumerate() {
            let url = item
                .get("url")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if url.is_empty() {
                continue;
            }
            results.push(WebResult {
                id: format!("web-{}", rank0 + 1),
                title: item
                    .get("title")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                snippet: item
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                url,
                rank: rank0 + 1,
                fetched_at: now,
                body: None,
                quality_score: None,
            });
        }

        results
    }
}

#[async_trait::async_trait]
impl WebSearchGateway for KeywordWebGateway {
    async fn web_search(
        &self,
        query: &str,
        opts: &WebSearchOptions,
    ) -> Result<WebSearchOutcome> {
        let Some(headers) = self.headers.as_ref() else {
            tracing::warn!("web search requested but no API key is configured");
            return Ok(WebSearchOutcome {
                results: Vec::new(),
                missing_config: true,
            });
        };

        let mut url = reqwest::Url::parse(&self.config.endpoint)
            .map_err(|e| Error::config_missing(format!("web endpoint: {e}")))?;
        url.query_pairs_mut()
            .append_pair("q", query)
            .append_pair("count", &opts.count.to_string())
            .append_pair("safesearch", opts.safe_search.as_str());
        if let Some(days) = opts.recency_days {
            url.query_pairs_mut()
                .append_pair("freshness", &format!("pd{days}"));
        }
        if let Some(ref mode) = opts.mode {
            url.query_pairs_mut().append_pair("result_filter", mode);
        }

        let body = with_retry(&self.retry, "web_search", |_attempt| {
            let url = url.clone();
            let headers = Arc::clone(headers);
            async move {
                let (name, value) = headers.auth_header().await?;
                let resp = self
                    .client
                    .get(url)
                    .header(name, value)
                    .header("Accept", "application/json")
                    .send()
                    .await
                    .map_err(from_reqwest)?;
                let status = resp.status();
                if !status.is_success() {
                    return Err(Error::from_status(
                        status.as_u16(),
                        format!("web search HTTP {}", status.as_u16()),
                    ));
                }
                resp.json::<Value>().await.map_err(from_reqwest)
            }
        })
        .await?;

        Ok(WebSearchOutcome {
            results: Self::parse_results(&body),
            missing_config: false,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
