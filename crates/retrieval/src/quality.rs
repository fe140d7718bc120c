//! Web-result quality filter: authority, redundancy against the
//! in-corpus references, and relevance to the query.
//!
//! All embeddings needed by one filter call are fetched in a single
//! batched request. If embeddings fail the filter degrades to
//! authority-only scoring rather than dropping the whole result set.

use gl_domain::config::{Tuning, WebConfig};
use gl_domain::reference::WebResult;
use gl_domain::vecmath::cosine_similarity;
use gl_providers::traits::LlmGateway;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Result of one quality-filter pass.
#[derive(Debug, Default)]
pub struct QualityOutcome {
    pub kept: Vec<WebResult>,
    pub dropped: usize,
    /// True when embeddings failed and only authority was scored.
    pub degraded: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Filter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct WebQualityFilter {
    trusted_domains: Vec<String>,
    min_authority: f64,
    max_redundancy: f64,
    min_relevance: f64,
}

impl WebQualityFilter {
    pub fn new(web: &WebConfig, tuning: &Tuning) -> Self {
        Self {
            trusted_domains: web.trusted_domains.clone(),
            min_authority: tuning.web_min_authority,
            max_redundancy: tuning.web_max_redundancy,
            min_relevance: tuning.web_min_relevance,
        }
    }

    #[cfg(test)]
    fn with_thresholds(
        trusted_domains: Vec<String>,
        min_authority: f64,
        max_redundancy: f64,
        min_relevance: f64,
    ) -> Self {
        Self {
            trusted_domains,
            min_authority,
            max_redundancy,
            min_relevance,
        }
    }

    // ── Authority ──────────────────────────────────────────────────

    /// Score a URL's domain authority in `[0, 1]`.
    ///
    /// Trusted TLD suffixes (`.gov`, `.edu`) score 1.0; named trusted
    /// domains score 0.9; hosts that embed a trusted suffix mid-name
    /// (`nasa.gov.attacker.com`) are treated as spoofing and score near
    /// zero; everything else gets a neutral baseline.
    pub fn authority_score(&self, url: &str) -> f64 {
        let Some(host) = host_of(url) else {
            return 0.0;
        };

        for trusted in &self.trusted_domains {
            if let Some(suffix) = trusted.strip_prefix('.') {
                // TLD-style entry (".gov").
                let dotted = format!(".{suffix}");
                if host.ends_with(&dotted) || host == suffix {
                    return 1.0;
                }
                // Spoof: ".gov." appears inside but the host ends
                // somewhere else entirely.
                if host.contains(&format!("{dotted}.")) {
                    return 0.05;
                }
            } else {
                // Named domain entry ("wikipedia.org").
                if host == *trusted || host.ends_with(&format!(".{trusted}")) {
                    return 0.9;
                }
                if host.contains(&format!("{trusted}.")) && !host.ends_with(trusted.as_str()) {
                    return 0.05;
                }
            }
        }

        0.4
    }

    // ── Full filter ────────────────────────────────────────────────

    /// Filter web results against the in-corpus reference texts.
    ///
    /// Kept results get their `quality_score` populated. One batched
    /// embedding call covers the query, every snippet, and every corpus
    /// text.
    pub async fn filter(
        &self,
        llm: &dyn LlmGateway,
        query: &str,
        results: Vec<WebResult>,
        corpus_texts: &[String],
    ) -> QualityOutcome {
        if results.is_empty() {
            return QualityOutcome::default();
        }

        let authorities: Vec<f64> = results
            .iter()
            .map(|r| self.authority_score(&r.url))
            .collect();

        // One batched call: [query, snippets..., corpus...].
        let mut inputs = Vec::with_capacity(1 + results.len() + corpus_texts.len());
        inputs.push(query.to_string());
        inputs.extend(results.iter().map(|r| r.snippet.clone()));
        inputs.extend(corpus_texts.iter().cloned());

        let embeddings = match llm.embed(inputs).await {
            Ok(e) if e.len() == 1 + results.len() + corpus_texts.len() => e,
            Ok(_) | Err(_) => {
                tracing::warn!("web quality embeddings unavailable; authority-only scoring");
                return self.authority_only(results, &authorities);
            }
        };

        let query_embedding = &embeddings[0];
        let snippet_embeddings = &embeddings[1..1 + results.len()];
        let corpus_embeddings = &embeddings[1 + results.len()..];

        let total = results.len();
        let mut kept = Vec::new();
        for (i, mut result) in results.into_iter().enumerate() {
            let authority = authorities[i];
            let relevance =
                cosine_similarity(&snippet_embeddings[i], query_embedding) as f64;
            let redundancy = corpus_embeddings
                .iter()
                .map(|c| cosine_similarity(&snippet_embeddings[i], c) as f64)
                .fold(0.0f64, f64::max);

            let pass = authority >= self.min_authority
                && redundancy <= self.max_redundancy
                && relevance >= self.min_relevance;
            if !pass {
                tracing::debug!(
                    url = %result.url,
                    authority,
                    redundancy,
                    relevance,
                    "web result dropped by quality filter"
                );
                continue;
            }

            result.quality_score =
                Some((authority + relevance + (1.0 - redundancy)) / 3.0);
            kept.push(result);
        }

        QualityOutcome {
            dropped: total - kept.len(),
            kept,
            degraded: false,
        }
    }

    fn authority_only(&self, results: Vec<WebResult>, authorities: &[f64]) -> QualityOutcome {
        let total = results.len();
        let kept: Vec<WebResult> = results
            .into_iter()
            .enumerate()
            .filter_map(|(i, mut r)| {
                if authorities[i] >= self.min_authority {
                    r.quality_score = Some(authorities[i]);
                    Some(r)
                } else {
                    None
                }
            })
            .collect();
        QualityOutcome {
            dropped: total - kept.len(),
            kept,
            degraded: true,
        }
    }
}

/// Extract the lowercase host from a URL string.
fn host_of(url: &str) -> Option<String> {
    let rest = url.split("://").nth(1).unwrap_or(url);
    let host = rest.split(['/', '?', '#']).next()?;
    let host = host.split('@').last()?; // drop userinfo
    let host = host.split(':').next()?; // drop port
    if host.is_empty() {
        None
    } else {
        Some(host.to_ascii_lowercase())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
