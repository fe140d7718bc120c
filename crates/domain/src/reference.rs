//! Retrieved-document value types: references, lazy references with a
//! deferred full-content loader, web results, and UI-facing citations.

use crate::error::Result;
use crate::stream::BoxFuture;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reference
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A retrieved document chunk.
///
/// Exactly which text field is populated depends on the retrieval path:
/// hybrid search fills `content`, some indexes expose `chunk`, and lazy
/// retrieval starts with only `summary`. [`Reference::display_text`]
/// resolves them in that order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Reference {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    /// Reranker score; higher is better.
    #[serde(default)]
    pub score: f64,
    /// Free-form metadata bag (source, quality scores, cited flag,
    /// citation density, lazy-hydration marker).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Reference {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// The first non-empty displayable text, checking
    /// `content` → `chunk` → `summary` in order.
    pub fn display_text(&self) -> Option<&str> {
        [&self.content, &self.chunk, &self.summary]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|t| !t.trim().is_empty())
    }

    /// Whether this reference may be shown to the LLM at all.
    pub fn has_display_text(&self) -> bool {
        self.display_text().is_some()
    }

    pub fn set_meta(&mut self, key: &str, value: serde_json::Value) {
        self.metadata.insert(key.to_string(), value);
    }

    pub fn meta_bool(&self, key: &str) -> bool {
        self.metadata
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LazyReference
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Deferred loader for the full content of a lazily retrieved chunk.
pub type ContentLoader = Arc<dyn Fn() -> BoxFuture<'static, Result<String>> + Send + Sync>;

/// State tag for a [`LazyReference`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LazyState {
    Summary,
    Full,
}

/// A reference retrieved summary-first, with a loader that can fetch the
/// full chunk on demand.
///
/// The only legal state transition is `Summary → Full`, performed through
/// [`LazyReference::hydrate`]. Hydration is monotonic and idempotent; the
/// loader is dropped on the first successful hydration so it cannot run
/// twice.
pub struct LazyReference {
    reference: Reference,
    state: LazyState,
    loader: Option<ContentLoader>,
}

impl LazyReference {
    /// Build a summary-state lazy reference. The `reference.summary`
    /// field must carry the summary text.
    pub fn summary(reference: Reference, loader: ContentLoader) -> Self {
        Self {
            reference,
            state: LazyState::Summary,
            loader: Some(loader),
        }
    }

    /// Build an already-full reference (no loader needed).
    pub fn full(reference: Reference) -> Self {
        Self {
            reference,
            state: LazyState::Full,
            loader: None,
        }
    }

    pub fn state(&self) -> LazyState {
        self.state
    }

    pub fn is_full(&self) -> bool {
        self.state == LazyState::Full
    }

    pub fn reference(&self) -> &Reference {
        &self.reference
    }

    pub fn reference_mut(&mut self) -> &mut Reference {
        &mut self.reference
    }

    pub fn into_reference(self) -> Reference {
        self.reference
    }

    /// Fetch the full chunk and transition to `Full` state, mutating the
    /// reference in place.
    ///
    /// Returns `Ok(true)` if a fetch happened, `Ok(false)` if the
    /// reference was already full (idempotent no-op). A loader failure
    /// leaves the reference in `Summary` state with the loader intact so
    /// a later attempt can retry.
    pub async fn hydrate(&mut self) -> Result<bool> {
        if self.state == LazyState::Full {
            return Ok(false);
        }
        let loader = match &self.loader {
            Some(l) => Arc::clone(l),
            None => return Ok(false),
        };
        let full = loader().await?;
        self.reference.content = Some(full);
        self.reference
            .set_meta("lazy_hydrated", serde_json::Value::Bool(true));
        self.state = LazyState::Full;
        self.loader = None;
        Ok(true)
    }
}

impl std::fmt::Debug for LazyReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyReference")
            .field("id", &self.reference.id)
            .field("state", &self.state)
            .field("has_loader", &self.loader.is_some())
            .finish()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// WebResult
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A single external web search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebResult {
    pub id: String,
    pub title: String,
    pub snippet: String,
    pub url: String,
    /// 1-based external rank.
    pub rank: usize,
    pub fetched_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
}

impl WebResult {
    /// Convert into a reference for the shared citation list.
    pub fn to_reference(&self) -> Reference {
        let mut reference = Reference::new(self.id.clone());
        reference.title = Some(self.title.clone());
        reference.content = Some(
            self.body
                .clone()
                .unwrap_or_else(|| self.snippet.clone()),
        );
        reference.url = Some(self.url.clone());
        reference.score = self.quality_score.unwrap_or(0.0);
        reference.set_meta("source", serde_json::json!("web"));
        reference
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Citation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What the consuming UI renders for a `[n]` marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    /// 1-based position in the per-turn reference list; this is the `n`
    /// in `[n]`.
    pub index: usize,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl Citation {
    /// Build a citation for the reference at 1-based `index`.
    pub fn from_reference(index: usize, reference: &Reference) -> Self {
        let snippet = reference
            .display_text()
            .map(|t| t.chars().take(240).collect::<String>());
        Self {
            index,
            id: reference.id.clone(),
            title: reference.title.clone(),
            url: reference.url.clone(),
            page: reference.page_number,
            snippet,
            score: Some(reference.score),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn loader_returning(text: &'static str) -> ContentLoader {
        Arc::new(move || Box::pin(async move { Ok(text.to_string()) }))
    }

    #[test]
    fn display_text_prefers_content_then_chunk_then_summary() {
        let mut r = Reference::new("doc-1");
        r.summary = Some("sum".into());
        assert_eq!(r.display_text(), Some("sum"));
        r.chunk = Some("chunk".into());
        assert_eq!(r.display_text(), Some("chunk"));
        r.content = Some("content".into());
        assert_eq!(r.display_text(), Some("content"));
    }

    #[test]
    fn whitespace_only_text_is_not_displayable() {
        let mut r = Reference::new("doc-2");
        r.content = Some("   \n".into());
        assert!(!r.has_display_text());
    }

    #[tokio::test]
    async fn hydrate_transitions_summary_to_full() {
        let mut r = Reference::new("doc-3");
        r.summary = Some("short".into());
        let mut lazy = LazyReference::summary(r, loader_returning("the full chunk"));

        assert_eq!(lazy.state(), LazyState::Summary);
        assert!(lazy.hydrate().await.unwrap());
        assert_eq!(lazy.state(), LazyState::Full);
        assert_eq!(lazy.reference().content.as_deref(), Some("the full chunk"));
        assert!(lazy.reference().meta_bool("lazy_hydrated"));
    }

    #[tokio::test]
    async fn hydrate_is_idempotent() {
        let mut r = Reference::new("doc-4");
        r.summary = Some("short".into());
        let mut lazy = LazyReference::summary(r, loader_returning("full"));

        assert!(lazy.hydrate().await.unwrap());
        // Second call is a no-op and never transitions back.
        assert!(!lazy.hydrate().await.unwrap());
        assert_eq!(lazy.state(), LazyState::Full);
    }

    #[tokio::test]
    async fn failed_hydration_keeps_summary_state() {
        let mut r = Reference::new("doc-5");
        r.summary = Some("short".into());
        let loader: ContentLoader = Arc::new(|| {
            Box::pin(async { Err(crate::Error::transport("fetch failed")) })
        });
        let mut lazy = LazyReference::summary(r, loader);

        assert!(lazy.hydrate().await.is_err());
        assert_eq!(lazy.state(), LazyState::Summary);
        // Retry still possible.
        assert!(lazy.hydrate().await.is_err());
    }

    #[test]
    fn web_result_reference_has_display_text() {
        let w = WebResult {
            id: "web-1".into(),
            title: "t".into(),
            snippet: "snippet text".into(),
            url: "https://example.org".into(),
            rank: 1,
            fetched_at: Utc::now(),
            body: None,
            quality_score: None,
        };
        let r = w.to_reference();
        assert!(r.has_display_text());
        assert_eq!(r.metadata.get("source").unwrap(), "web");
    }
}
