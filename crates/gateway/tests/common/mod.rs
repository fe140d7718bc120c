//! In-memory fakes for the three outbound capabilities, plus a test
//! harness that wires them into an `AppState`.

use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use gl_contextpack::ContextBudgeter;
use gl_domain::config::{Config, ContextConfig};
use gl_domain::error::Result;
use gl_domain::reference::{LazyReference, Reference, WebResult};
use gl_domain::stream::BoxStream;
use gl_gateway::runtime::cancel::CancelMap;
use gl_gateway::runtime::session_lock::SessionLockMap;
use gl_gateway::state::AppState;
use gl_gateway::telemetry::TelemetryStore;
use gl_providers::traits::{
    CompletionRequest, CompletionResponse, LlmEvent, LlmGateway,
};
use gl_retrieval::academic::AcademicSearch;
use gl_retrieval::search::{
    LazySearchOutcome, LazySearchRequest, QueryInput, SearchGateway, SearchOptions,
    SearchOutcome,
};
use gl_retrieval::web::{WebSearchGateway, WebSearchOptions, WebSearchOutcome};
use gl_sessions::SessionStore;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fake LLM
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Scripted LLM gateway. Structured calls are answered by schema name;
/// free-form synthesis pops from a queue; streaming pops one event
/// script per call.
pub struct FakeLlm {
    pub classification: Mutex<String>,
    pub plan: Mutex<String>,
    pub crag: Mutex<String>,
    pub reformulations: Mutex<VecDeque<String>>,
    pub synth: Mutex<VecDeque<String>>,
    pub critic: Mutex<VecDeque<String>>,
    pub stream_scripts: Mutex<VecDeque<Vec<LlmEvent>>>,
    /// `(substring, vector)` pairs checked in order; unmatched texts
    /// get a deterministic one-hot vector from their hash.
    pub embed_map: Mutex<Vec<(String, Vec<f32>)>>,
    pub synth_prompts: Mutex<Vec<String>>,
    pub synth_calls: AtomicUsize,
}

impl Default for FakeLlm {
    fn default() -> Self {
        Self {
            classification: Mutex::new(
                r#"{"intent":"factual","confidence":0.9,"reasoning":"lookup"}"#.into(),
            ),
            plan: Mutex::new(
                r#"{"confidence":0.82,"steps":[{"action":"vector_search"}]}"#.into(),
            ),
            crag: Mutex::new(
                r#"{"confidence":"correct","action":"use_documents","reasoning":"ok"}"#
                    .into(),
            ),
            reformulations: Mutex::new(VecDeque::new()),
            synth: Mutex::new(VecDeque::new()),
            critic: Mutex::new(VecDeque::new()),
            stream_scripts: Mutex::new(VecDeque::new()),
            embed_map: Mutex::new(Vec::new()),
            synth_prompts: Mutex::new(Vec::new()),
            synth_calls: AtomicUsize::new(0),
        }
    }
}

impl FakeLlm {
    fn embed_one(&self, text: &str) -> Vec<f32> {
        for (needle, vector) in self.embed_map.lock().iter() {
            if text.contains(needle.as_str()) {
                return vector.clone();
            }
        }
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let slot = (hasher.finish() % 8) as usize;
        let mut v = vec![0.0f32; 8];
        v[slot] = 1.0;
        v
    }
}

#[async_trait::async_trait]
impl LlmGateway for FakeLlm {
    async fn complete(&self, req: CompletionRequest) -> Result<CompletionResponse> {
        let text = match req.options.json_schema.as_ref().map(|s| s.name.as_str()) {
            Some("intent_classification") => self.classification.lock().clone(),
            Some("retrieval_plan") => self.plan.lock().clone(),
            Some("crag_evaluation") => self.crag.lock().clone(),
            Some("query_reformulation") => self
                .reformulations
                .lock()
                .pop_front()
                .map(|q| format!(r#"{{"query":"{q}"}}"#))
                .unwrap_or_else(|| r#"{"query":""}"#.into()),
            Some("critic_report") => self.critic.lock().pop_front().unwrap_or_else(|| {
                r#"{"grounded":true,"coverage":0.95,"action":"accept","issues":[]}"#.into()
            }),
            _ => {
                self.synth_calls.fetch_add(1, Ordering::SeqCst);
                if let Some(last) = req.input.last() {
                    self.synth_prompts.lock().push(last.content.clone());
                }
                self.synth
                    .lock()
                    .pop_front()
                    .unwrap_or_else(|| "I do not know.".into())
            }
        };
        Ok(CompletionResponse {
            text,
            usage: None,
            response_id: Some("resp-fake".into()),
            reasoning_summary: None,
        })
    }

    async fn complete_stream(
        &self,
        req: CompletionRequest,
    ) -> Result<BoxStream<'static, Result<LlmEvent>>> {
        self.synth_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(last) = req.input.last() {
            self.synth_prompts.lock().push(last.content.clone());
        }
        let script = self.stream_scripts.lock().pop_front().unwrap_or_default();
        Ok(Box::pin(futures_util::stream::iter(
            script.into_iter().map(Ok),
        )))
    }

    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    async fn get_response(
        &self,
        _id: &str,
        _include: Option<&str>,
    ) -> Result<serde_json::Value> {
        Ok(serde_json::json!({"id": "resp-fake"}))
    }

    async fn delete_response(&self, _id: &str) -> Result<serde_json::Value> {
        Ok(serde_json::json!({"deleted": true}))
    }

    async fn list_input_items(&self, _id: &str) -> Result<serde_json::Value> {
        Ok(serde_json::json!({"data": []}))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fake search
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Scripted index search: every call pops the next outcome; an empty
/// queue repeats the last scripted outcome.
pub struct FakeSearch {
    pub outcomes: Mutex<VecDeque<Result<SearchOutcome>>>,
    pub last: Mutex<Option<SearchOutcome>>,
    pub queries: Mutex<Vec<String>>,
}

impl FakeSearch {
    pub fn scripted(outcomes: Vec<Result<SearchOutcome>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            last: Mutex::new(None),
            queries: Mutex::new(Vec::new()),
        }
    }

    fn next(&self, query: &str) -> Result<SearchOutcome> {
        self.queries.lock().push(query.to_string());
        match self.outcomes.lock().pop_front() {
            Some(Ok(outcome)) => {
                *self.last.lock() = Some(outcome.clone());
                Ok(outcome)
            }
            Some(Err(e)) => Err(e),
            None => Ok(self.last.lock().clone().unwrap_or_default()),
        }
    }
}

#[async_trait::async_trait]
impl SearchGateway for FakeSearch {
    async fn hybrid_search(&self, query: &str, _opts: &SearchOptions) -> Result<SearchOutcome> {
        self.next(query)
    }

    async fn vector_search(
        &self,
        query: QueryInput,
        _opts: &SearchOptions,
    ) -> Result<SearchOutcome> {
        let text = match query {
            QueryInput::Text(t) => t,
            QueryInput::Embedding(_) => "<embedding>".to_string(),
        };
        self.next(&text)
    }

    async fn lazy_hybrid_search(&self, req: &LazySearchRequest) -> Result<LazySearchOutcome> {
        let outcome = self.next(&req.query)?;
        Ok(LazySearchOutcome {
            references: outcome
                .references
                .into_iter()
                .map(LazyReference::full)
                .collect(),
            coverage: outcome.coverage,
            threshold_exhausted: outcome.threshold_exhausted,
        })
    }

    async fn index_stats(&self) -> Result<gl_retrieval::search::IndexStats> {
        Ok(gl_retrieval::search::IndexStats {
            document_count: 1,
            storage_size_bytes: 1,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fake web search
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct FakeWeb {
    pub results: Mutex<Vec<WebResult>>,
    pub calls: AtomicUsize,
}

impl FakeWeb {
    pub fn with_results(results: Vec<WebResult>) -> Self {
        Self {
            results: Mutex::new(results),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn empty() -> Self {
        Self::with_results(Vec::new())
    }
}

#[async_trait::async_trait]
impl WebSearchGateway for FakeWeb {
    async fn web_search(
        &self,
        _query: &str,
        _opts: &WebSearchOptions,
    ) -> Result<WebSearchOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(WebSearchOutcome {
            results: self.results.lock().clone(),
            missing_config: false,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Builders
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn reference(id: &str, content: &str, score: f64) -> Reference {
    let mut r = Reference::new(id);
    r.title = Some(id.to_string());
    r.content = Some(content.to_string());
    r.score = score;
    r
}

pub fn outcome(references: Vec<Reference>, coverage: f64) -> SearchOutcome {
    SearchOutcome {
        references,
        coverage: Some(coverage),
        threshold_exhausted: false,
    }
}

pub fn web_result(id: &str, snippet: &str, url: &str) -> WebResult {
    WebResult {
        id: id.into(),
        title: id.into(),
        snippet: snippet.into(),
        url: url.into(),
        rank: 1,
        fetched_at: chrono::Utc::now(),
        body: None,
        quality_score: None,
    }
}

/// Test harness holding the state and the scratch dir alive.
pub struct Harness {
    pub state: AppState,
    pub llm: Arc<FakeLlm>,
    pub search: Arc<FakeSearch>,
    pub web: Arc<FakeWeb>,
    _dir: tempfile::TempDir,
}

pub fn harness(llm: FakeLlm, search: FakeSearch, web: FakeWeb) -> Harness {
    let mut config = Config::default();
    // One document satisfies the guarantee in these scenarios; the
    // ladder itself is exercised separately.
    config.tuning.retrieval_min_docs = 1;
    config.context = ContextConfig {
        tokenizer_model: "no-such-model".into(),
        ..Default::default()
    };

    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(llm);
    let search = Arc::new(search);
    let web = Arc::new(web);
    let budgeter = Arc::new(ContextBudgeter::new(config.context.clone(), &config.tuning));
    let academic = Arc::new(
        AcademicSearch::new(config.web.academic.clone(), std::time::Duration::from_secs(5))
            .unwrap(),
    );
    let state = AppState {
        config: Arc::new(config),
        llm: llm.clone(),
        search: search.clone(),
        web: web.clone(),
        academic,
        budgeter,
        sessions: Arc::new(SessionStore::new(dir.path()).unwrap()),
        telemetry: Arc::new(TelemetryStore::new(100)),
        session_locks: Arc::new(SessionLockMap::new()),
        cancel_map: Arc::new(CancelMap::new()),
        admin_token_hash: None,
    };
    Harness {
        state,
        llm,
        search,
        web,
        _dir: dir,
    }
}
