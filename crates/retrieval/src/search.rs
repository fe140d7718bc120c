//! Hybrid search gateway: combined keyword + vector queries with
//! reranker post-scoring, pure vector search, and summary-first lazy
//! search with deferred full-content loading.

use crate::filter::validate_filter;
use gl_domain::config::{SearchConfig, Tuning};
use gl_domain::error::{Error, Result};
use gl_domain::reference::{ContentLoader, LazyReference, Reference};
use gl_providers::auth::HeaderProvider;
use gl_providers::retry::{with_retry, RetryPolicy};
use gl_providers::util::from_reqwest;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / outcome types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Options for hybrid and vector search.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub top: usize,
    /// Index filter; validated against the closed grammar before use.
    pub filter: Option<String>,
    /// Reranker score floor. `None` or zero disables filtering.
    pub reranker_threshold: Option<f64>,
    pub select_fields: Option<Vec<String>>,
    pub search_fields: Option<Vec<String>>,
}

/// Query input for vector search: raw text (vectorized server-side) or
/// a pre-computed embedding.
#[derive(Debug, Clone)]
pub enum QueryInput {
    Text(String),
    Embedding(Vec<f32>),
}

/// Result of a hybrid or vector search.
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub references: Vec<Reference>,
    /// Normalized to `[0, 1]` at this boundary regardless of the wire
    /// scale.
    pub coverage: Option<f64>,
    /// True when a positive reranker threshold filtered out every
    /// result. The unfiltered set is never substituted.
    pub threshold_exhausted: bool,
}

/// Parameters for summary-first lazy search.
#[derive(Debug, Clone)]
pub struct LazySearchRequest {
    pub query: String,
    pub top: usize,
    pub reranker_threshold: Option<f64>,
    pub summary_max_chars: usize,
    /// How many leading references get their full content prefetched.
    pub prefetch_count: usize,
}

/// Result of a lazy search.
pub struct LazySearchOutcome {
    pub references: Vec<LazyReference>,
    pub coverage: Option<f64>,
    pub threshold_exhausted: bool,
}

/// Index statistics for diagnostics.
#[derive(Debug, Clone, serde::Serialize)]
pub struct IndexStats {
    pub document_count: u64,
    pub storage_size_bytes: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Gateway trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Capability contract for the search index.
#[async_trait::async_trait]
pub trait SearchGateway: Send + Sync {
    /// Combined keyword + vector query with reranker post-scoring.
    async fn hybrid_search(&self, query: &str, opts: &SearchOptions) -> Result<SearchOutcome>;

    /// Pure vector similarity search (no reranker).
    async fn vector_search(
        &self,
        query: QueryInput,
        opts: &SearchOptions,
    ) -> Result<SearchOutcome>;

    /// Summary-first search whose references carry a loader for the
    /// full chunk.
    async fn lazy_hybrid_search(&self, req: &LazySearchRequest) -> Result<LazySearchOutcome>;

    /// Index statistics.
    async fn index_stats(&self) -> Result<IndexStats>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pure helpers (shared with tests and fakes)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Normalize a wire coverage value to `[0, 1]`. Some services report
/// 0–100; anything above 1 is treated as a percentage.
pub fn normalize_coverage(raw: f64) -> f64 {
    if raw > 1.0 {
        (raw / 100.0).clamp(0.0, 1.0)
    } else {
        raw.clamp(0.0, 1.0)
    }
}

/// Whether a normalized coverage value falls below the floor. A value
/// exactly at the floor is acceptable.
pub fn is_low_coverage(coverage: f64, min_coverage: f64) -> bool {
    coverage < min_coverage
}

/// Apply a reranker score floor.
///
/// Returns the surviving references and whether a positive threshold
/// wiped out a non-empty result set. A zero or negative threshold is a
/// no-op filter.
pub fn apply_reranker_threshold(
    references: Vec<Reference>,
    threshold: f64,
) -> (Vec<Reference>, bool) {
    if threshold <= 0.0 {
        return (references, false);
    }
    let had_results = !references.is_empty();
    let kept: Vec<Reference> = references
        .into_iter()
        .filter(|r| r.score >= threshold)
        .collect();
    let exhausted = had_results && kept.is_empty();
    (kept, exhausted)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Warning dedup
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// TTL map deduplicating repeated gateway warnings. Expired entries are
/// pruned on insert, so the map stays bounded by the active warning set.
pub struct WarningDedup {
    entries: Mutex<HashMap<String, Instant>>,
    ttl: Duration,
}

impl WarningDedup {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Returns true if this key has not warned within the TTL window.
    pub fn should_warn(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, at| now.duration_since(*at) < self.ttl);
        match entries.get(key) {
            Some(_) => false,
            None => {
                entries.insert(key.to_string(), now);
                true
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Hosted adapter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Document fetcher handed to lazy-reference loaders. Cloned into each
/// loader closure so hydration does not borrow the gateway.
#[derive(Clone)]
struct DocFetcher {
    client: reqwest::Client,
    endpoint: String,
    index_name: String,
    api_version: String,
    headers: Arc<dyn HeaderProvider>,
}

impl DocFetcher {
    async fn fetch(&self, id: &str) -> Result<String> {
        let url = format!(
            "{}/indexes/{}/docs/{}?api-version={}",
            self.endpoint, self.index_name, id, self.api_version
        );
        let (name, value) = self.headers.auth_header().await?;
        let resp = self
            .client
            .get(&url)
            .header(name, value)
            .send()
            .await
            .map_err(from_reqwest)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::from_status(
                status.as_u16(),
                format!("document fetch '{id}' failed"),
            ));
        }
        let doc: Value = resp.json().await.map_err(from_reqwest)?;
        doc.get("content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::parse(format!("document '{id}' has no content field")))
    }
}

/// Hosted [`SearchGateway`] adapter for an Azure-AI-Search-style index
/// service.
pub struct IndexSearchGateway {
    config: SearchConfig,
    headers: Arc<dyn HeaderProvider>,
    retry: RetryPolicy,
    client: reqwest::Client,
    warnings: WarningDedup,
    min_coverage: f64,
}

impl IndexSearchGateway {
    pub fn new(
        config: SearchConfig,
        tuning: &Tuning,
        headers: Arc<dyn HeaderProvider>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(tuning.request_timeout_ms))
            .build()
            .map_err(from_reqwest)?;
        Ok(Self {
            warnings: WarningDedup::new(Duration::from_secs(config.warning_ttl_secs)),
            min_coverage: tuning.search_min_coverage,
            config,
            headers,
            retry,
            client,
        })
    }

    fn search_url(&self) -> String {
        format!(
            "{}/indexes/{}/docs/search?api-version={}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.index_name,
            self.config.api_version
        )
    }

    fn doc_fetcher(&self) -> DocFetcher {
        DocFetcher {
            client: self.client.clone(),
            endpoint: self.config.endpoint.trim_end_matches('/').to_string(),
            index_name: self.config.index_name.clone(),
            api_version: self.config.api_version.clone(),
            headers: Arc::clone(&self.headers),
        }
    }

    async fn post_search(&self, body: Value) -> Result<Value> {
        let url = self.search_url();
        with_retry(&self.retry, "index_search", |_attempt| {
            let url = url.clone();
            let body = body.clone();
            async move {
                let (name, value) = self.headers.auth_header().await?;
                let resp = self
                    .client
                    .post(&url)
                    .header(name, value)
                    .header("Content-Type", "application/json")
                    .json(&body)
                    .send()
                    .await
                    .map_err(from_reqwest)?;
                let status = resp.status();
                if !status.is_success() {
                    let correlation = resp
                        .headers()
                        .get("x-request-id")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    let mut err = Error::from_status(
                        status.as_u16(),
                        format!("search HTTP {}", status.as_u16()),
                    );
                    if let Some(corr) = correlation {
                        err = err.with_correlation(corr);
                    }
                    return Err(err);
                }
                resp.json::<Value>().await.map_err(from_reqwest)
            }
        })
        .await
    }

    fn build_hybrid_body(&self, query: &str, opts: &SearchOptions) -> Result<Value> {
        let mut body = serde_json::json!({
            "search": query,
            "top": opts.top,
            "queryType": "semantic",
            "semanticConfiguration": self.config.semantic_configuration,
            "vectorQueries": [{
                "kind": "text",
                "text": query,
                "fields": self.config.vector_field,
            }],
        });

        let select = opts
            .select_fields
            .clone()
            .unwrap_or_else(|| self.config.select_fields.clone());
        body["select"] = serde_json::json!(select.join(","));

        let search_fields = opts
            .search_fields
            .clone()
            .unwrap_or_else(|| self.config.search_fields.clone());
        body["searchFields"] = serde_json::json!(search_fields.join(","));

        if let Some(ref filter) = opts.filter {
            validate_filter(filter).map_err(|e| {
                tracing::warn!(filter = %filter, error = %e, "rejecting unsafe index filter");
                e
            })?;
            body["filter"] = serde_json::json!(filter);
        }

        Ok(body)
    }

    fn parse_results(&self, body: &Value, reranked: bool) -> (Vec<Reference>, Option<f64>) {
        let coverage = body
            .get("@search.coverage")
            .and_then(Value::as_f64)
            .map(normalize_coverage);

        let mut references = Vec::new();
        if let Some(items) = body.get("value").and_then(Value::as_array) {
            for item in items {
                let id = item
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if id.is_empty() {
                    continue;
                }
                let mut reference = Reference::new(id);
                reference.title = item
                    .get("title")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                reference.content = item
                    .get("content")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                reference.chunk = item
                    .get("chunk")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                reference.summary = item
                    .get("summary")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                reference.url = item.get("url").and_then(Value::as_str).map(str::to_string);
                reference.page_number = item
                    .get("page_number")
                    .and_then(Value::as_u64)
                    .map(|p| p as u32);
                reference.score = if reranked {
                    item.get("@search.rerankerScore")
                        .and_then(Value::as_f64)
                        .unwrap_or_else(|| {
                            item.get("@search.score").and_then(Value::as_f64).unwrap_or(0.0)
                        })
                } else {
                    item.get("@search.score").and_then(Value::as_f64).unwrap_or(0.0)
                };
                reference.set_meta("source", serde_json::json!("index"));
                references.push(reference);
            }
        }

        (references, coverage)
    }
}

#[async_trait::async_trait]
impl SearchGateway for IndexSearchGateway {
    async fn hybrid_search(&self, query: &str, opts: &SearchOptions) -> Result<SearchOutcome> {
        let body = self.build_hybrid_body(query, opts)?;
        let resp = self.post_search(body).await?;
        let (references, coverage) = self.parse_results(&resp, true);

        let threshold = opts.reranker_threshold.unwrap_or(0.0);
        let (kept, exhausted) = apply_reranker_threshold(references, threshold);

        if exhausted && self.warnings.should_warn("threshold_exhausted") {
            tracing::warn!(
                threshold,
                query_len = query.len(),
                "every result fell below the reranker threshold"
            );
        }
        if let Some(c) = coverage {
            if is_low_coverage(c, self.min_coverage)
                && self.warnings.should_warn("low_coverage")
            {
                tracing::warn!(coverage = c, min = self.min_coverage, "low search coverage");
            }
        }

        Ok(SearchOutcome {
            references: kept,
            coverage,
            threshold_exhausted: exhausted,
        })
    }

    async fn vector_search(
        &self,
        query: QueryInput,
        opts: &SearchOptions,
    ) -> Result<SearchOutcome> {
        let vector_query = match &query {
            QueryInput::Text(text) => serde_json::json!({
                "kind": "text",
                "text": text,
                "fields": self.config.vector_field,
            }),
            QueryInput::Embedding(vector) => serde_json::json!({
                "kind": "vector",
                "vector": vector,
                "fields": self.config.vector_field,
            }),
        };

        let select = opts
            .select_fields
            .clone()
            .unwrap_or_else(|| self.config.select_fields.clone());
        let mut body = serde_json::json!({
            "top": opts.top,
            "select": select.join(","),
            "vectorQueries": [vector_query],
        });
        if let Some(ref filter) = opts.filter {
            validate_filter(filter)?;
            body["filter"] = serde_json::json!(filter);
        }

        let resp = self.post_search(body).await?;
        let (references, coverage) = self.parse_results(&resp, false);
        Ok(SearchOutcome {
            references,
            coverage,
            threshold_exhausted: false,
        })
    }

    async fn lazy_hybrid_search(&self, req: &LazySearchRequest) -> Result<LazySearchOutcome> {
        let opts = SearchOptions {
            top: req.top,
            reranker_threshold: req.reranker_threshold,
            ..Default::default()
        };
        let body = self.build_hybrid_body(&req.query, &opts)?;
        let resp = self.post_search(body).await?;
        let (references, coverage) = self.parse_results(&resp, true);

        let threshold = req.reranker_threshold.unwrap_or(0.0);
        let (kept, exhausted) = apply_reranker_threshold(references, threshold);

        let fetcher = self.doc_fetcher();
        let mut lazy = Vec::with_capacity(kept.len());
        for (i, mut reference) in kept.into_iter().enumerate() {
            // Reduce the content to a bounded summary; the loader
            // recovers the full chunk on demand.
            let summary_source = reference
                .summary
                .clone()
                .or_else(|| reference.content.clone())
                .unwrap_or_default();
            let summary: String = summary_source.chars().take(req.summary_max_chars).collect();
            reference.summary = Some(summary);
            reference.content = None;

            let loader: ContentLoader = {
                let fetcher = fetcher.clone();
                let id = reference.id.clone();
                Arc::new(move || {
                    let fetcher = fetcher.clone();
                    let id = id.clone();
                    Box::pin(async move { fetcher.fetch(&id).await })
                })
            };

            let mut lazy_ref = LazyReference::summary(reference, loader);
            if i < req.prefetch_count {
                if let Err(e) = lazy_ref.hydrate().await {
                    tracing::warn!(
                        id = %lazy_ref.reference().id,
                        error = %e,
                        "lazy prefetch failed; keeping summary"
                    );
                }
            }
            lazy.push(lazy_ref);
        }

        Ok(LazySearchOutcome {
            references: lazy,
            coverage,
            threshold_exhausted: exhausted,
        })
    }

    async fn index_stats(&self) -> Result<IndexStats> {
        let url = format!(
            "{}/indexes/{}/stats?api-version={}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.index_name,
            self.config.api_version
        );
        let (name, value) = self.headers.auth_header().await?;
        let resp = self
            .client
            .get(&url)
            .header(name, value)
            .send()
            .await
            .map_err(from_reqwest)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::from_status(status.as_u16(), "index stats failed"));
        }
        let body: Value = resp.json().await.map_err(from_reqwest)?;
        Ok(IndexStats {
            document_count: body
                .get("documentCount")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            storage_size_bytes: body
                .get("storageSize")
                .and_then(Value::as_u64)
                .unwrap_or(0),
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(id: &str, score: f64) -> Reference {
        let mut r = Reference::new(id);
        r.content = Some("text".into());
        r.score = score;
        r
    }

    #[test]
    fn coverage_percentage_scale_is_normalized() {
        assert_eq!(normalize_coverage(85.0), 0.85);
        assert_eq!(normalize_coverage(0.85), 0.85);
        assert_eq!(normalize_coverage(250.0), 1.0);
        assert_eq!(normalize_coverage(-0.5), 0.0);
        // Exactly 1.0 is already a fraction.
        assert_eq!(normalize_coverage(1.0), 1.0);
    }

    #[test]
    fn zero_threshold_is_a_noop_filter() {
        let refs = vec![scored("a", 0.1), scored("b", 0.0)];
        let (kept, exhausted) = apply_reranker_threshold(refs, 0.0);
        assert_eq!(kept.len(), 2);
        assert!(!exhausted);
    }

    #[test]
    fn threshold_drops_low_scores() {
        let refs = vec![scored("a", 2.5), scored("b", 1.5)];
        let (kept, exhausted) = apply_reranker_threshold(refs, 2.0);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "a");
        assert!(!exhausted);
    }

    #[test]
    fn score_exactly_at_threshold_survives() {
        let refs = vec![scored("a", 2.0)];
        let (kept, exhausted) = apply_reranker_threshold(refs, 2.0);
        assert_eq!(kept.len(), 1);
        assert!(!exhausted);
    }

    #[test]
    fn full_wipeout_returns_empty_and_signals() {
        let refs = vec![scored("a", 1.0), scored("b", 0.5)];
        let (kept, exhausted) = apply_reranker_threshold(refs, 2.0);
        // Never the unfiltered set.
        assert!(kept.is_empty());
        assert!(exhausted);
    }

    #[test]
    fn empty_input_is_not_exhaustion() {
        let (kept, exhausted) = apply_reranker_threshold(Vec::new(), 2.0);
        assert!(kept.is_empty());
        assert!(!exhausted);
    }

    #[test]
    fn coverage_exactly_at_floor_is_not_low() {
        assert!(!is_low_coverage(0.5, 0.5));
        assert!(is_low_coverage(0.49, 0.5));
        assert!(!is_low_coverage(0.51, 0.5));
    }

    #[test]
    fn warning_dedup_within_ttl() {
        let dedup = WarningDedup::new(Duration::from_secs(60));
        assert!(dedup.should_warn("low_coverage"));
        assert!(!dedup.should_warn("low_coverage"));
        assert!(dedup.should_warn("other_warning"));
    }

    #[test]
    fn warning_dedup_expires() {
        let dedup = WarningDedup::new(Duration::from_millis(10));
        assert!(dedup.should_warn("k"));
        std::thread::sleep(Duration::from_millis(25));
        assert!(dedup.should_warn("k"));
    }
}
