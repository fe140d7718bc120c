//! Structured-paper sources: Semantic Scholar and arXiv-style search.
//!
//! Both sources are queried independently and joined with all-settled
//! semantics: one source failing never blocks the other. Per-source
//! failures are reported back for telemetry, not raised.

use gl_domain::config::AcademicConfig;
use gl_domain::error::{Error, Result};
use gl_domain::reference::WebResult;
use gl_providers::util::from_reqwest;
use serde_json::Value;
use std::time::Duration;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Joined result of the academic sources.
#[derive(Debug, Default)]
pub struct AcademicOutcome {
    pub papers: Vec<WebResult>,
    /// `(source, message)` per failed source.
    pub failures: Vec<(String, String)>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Gateway
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Academic paper search across the configured sources.
pub struct AcademicSearch {
    config: AcademicConfig,
    client: reqwest::Client,
}

impl AcademicSearch {
    pub fn new(config: AcademicConfig, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(from_reqwest)?;
        Ok(Self { config, client })
    }

    pub fn any_enabled(&self) -> bool {
        self.config.enable_semantic_scholar || self.config.enable_arxiv
    }

    /// Query every enabled source concurrently; collect what succeeded.
    pub async fn search_all(&self, query: &str) -> AcademicOutcome {
        let (scholar, arxiv) = tokio::join!(
            self.search_semantic_scholar(query),
            self.search_arxiv(query)
        );

        let mut outcome = AcademicOutcome::default();
        match scholar {
            Ok(mut papers) => outcome.papers.append(&mut papers),
            Err(e) => {
                if self.config.enable_semantic_scholar {
                    tracing::warn!(error = %e, "semantic scholar search failed");
                    outcome
                        .failures
                        .push(("semantic_scholar".into(), e.message));
                }
            }
        }
        match arxiv {
            Ok(mut papers) => outcome.papers.append(&mut papers),
            Err(e) => {
                if self.config.enable_arxiv {
                    tracing::warn!(error = %e, "arxiv search failed");
                    outcome.failures.push(("arxiv".into(), e.message));
                }
            }
        }

        outcome
    }

    // ── Semantic Scholar ───────────────────────────────────────────

    async fn search_semantic_scholar(&self, query: &str) -> Result<Vec<WebResult>> {
        if !self.config.enable_semantic_scholar {
            return Ok(Vec::new());
        }
        let mut url = reqwest::Url::parse(&self.config.semantic_scholar_endpoint)
            .map_err(|e| Error::config_missing(format!("semantic scholar endpoint: {e}")))?;
        url.query_pairs_mut()
            .append_pair("query", query)
            .append_pair("limit", &self.config.paper_count.to_string())
            .append_pair("fields", "title,abstract,url");

        let resp = self.client.get(url).send().await.map_err(from_reqwest)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::from_status(
                status.as_u16(),
                "semantic scholar search failed",
            ));
        }
        let body: Value = resp.json().await.map_err(from_reqwest)?;

        let now = chrono::Utc::now();
        let mut papers = Vec::new();
        if let Some(items) = body.get("data").and_then(Value::as_array) {
            for (i, item) in items.iter().enumerate() {
                let title = item
                    .get("title")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if title.is_empty() {
                    continue;
                }
                papers.push(WebResult {
                    id: format!("s2-{}", i + 1),
                    title: title.to_string(),
                    snippet: item
                        .get("abstract")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    url: item
                        .get("url")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    rank: i + 1,
                    fetched_at: now,
                    body: None,
                    quality_score: None,
                });
            }
        }
        Ok(papers)
    }

    // ── arXiv ──────────────────────────────────────────────────────

    async fn search_arxiv(&self, query: &str) -> Result<Vec<WebResult>> {
        if !self.config.enable_arxiv {
            return Ok(Vec::new());
        }
        let mut url = reqwest::Url::parse(&self.config.arxiv_endpoint)
            .map_err(|e| Error::config_missing(format!("arxiv endpoint: {e}")))?;
        url.query_pairs_mut()
            .append_pair("search_query", &format!("all:{query}"))
            .append_pair("max_results", &self.config.paper_count.to_string());

        let resp = self.client.get(url).send().await.map_err(from_reqwest)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::from_status(status.as_u16(), "arxiv search failed"));
        }
        let feed = resp.text().await.map_err(from_reqwest)?;
        Ok(parse_arxiv_feed(&feed))
    }
}

/// Extract entries from an arXiv Atom feed.
///
/// The feed shape is stable enough that a tag scan suffices; pulling in
/// a full XML parser for three fields is not warranted.
fn parse_arxiv_feed(feed: &str) -> Vec<WebResult> {
    let now = chrono::Utc::now();
    let mut papers = Vec::new();

    for (i, entry) in feed.split("<entry>").skip(1).enumerate() {
        let title = extract_tag(entry, "title").unwrap_or_default();
        let summary = extract_tag(entry, "summary").unwrap_or_default();
        let id_url = extract_tag(entry, "id").unwrap_or_default();
        if title.is_empty() {
            continue;
        }
        papers.push(WebResult {
            id: format!("arxiv-{}", i + 1),
            title: collapse_whitespace(&title),
            snippet: collapse_whitespace(&summary),
            url: id_url,
            rank: i + 1,
            fetched_at: now,
            body: None,
            quality_score: None,
        });
    }

    papers
}

fn extract_tag(fragment: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = fragment.find(&open)? + open.len();
    let end = fragment[start..].find(&close)? + start;
    Some(fragment[start..end].trim().to_string())
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_FEED: &str = r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <id>http://arxiv.org/abs/2401.00001</id>
    <title>Retrieval at
        Scale</title>
    <summary>A study of
        retrieval pipelines.</summary>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/2401.00002</id>
    <title>Second Paper</title>
    <summary>Another abstract.</summary>
  </entry>
</feed>"#;

    #[test]
    fn arxiv_feed_entries_are_extracted() {
        let papers = parse_arxiv_feed(SAMPLE_FEED);
        assert_eq!(papers.len(), 2);
        assert_eq!(papers[0].title, "Retrieval at Scale");
        assert_eq!(papers[0].snippet, "A study of retrieval pipelines.");
        assert_eq!(papers[0].url, "http://arxiv.org/abs/2401.00001");
        assert_eq!(papers[1].rank, 2);
    }

    #[test]
    fn malformed_feed_yields_nothing() {
        assert!(parse_arxiv_feed("<feed>no entries here</feed>").is_empty());
        assert!(parse_arxiv_feed("").is_empty());
    }

    #[tokio::test]
    async fn disabled_sources_succeed_with_empty_outcome() {
        let search = AcademicSearch::new(AcademicConfig::default(), Duration::from_secs(5))
            .unwrap();
        assert!(!search.any_enabled());
        let outcome = search.search_all("retrieval").await;
        assert!(outcome.papers.is_empty());
        assert!(outcome.failures.is_empty());
    }
}
