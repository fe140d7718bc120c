//! Hosted LLM adapter for a Responses-style wire API.
//!
//! Implements completion, streaming (with reasoning-summary fragment
//! sequencing), embeddings, and server-stored response management.

use crate::auth::HeaderProvider;
use crate::retry::{with_retry, RetryPolicy};
use crate::traits::{
    CompletionRequest, CompletionResponse, LlmEvent, LlmGateway,
};
use crate::util::{from_reqwest, sanitize_user_field};
use gl_domain::config::LlmConfig;
use gl_domain::error::{Error, Result};
use gl_domain::message::Message;
use gl_domain::stream::{BoxStream, Usage};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An [`LlmGateway`] adapter for a hosted Responses-style API.
pub struct ResponsesGateway {
    config: LlmConfig,
    headers: Arc<dyn HeaderProvider>,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl ResponsesGateway {
    pub fn new(
        config: LlmConfig,
        headers: Arc<dyn HeaderProvider>,
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

    // ── Internal helpers ───────────────────────────────────────────

    async fn authed(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder> {
        let (name, value) = self.headers.auth_header().await?;
        Ok(builder
            .header(name, value)
            .header("Content-Type", "application/json"))
    }

    fn build_body(&self, req: &CompletionRequest, stream: bool) -> Value {
        let opts = &req.options;
        let model = if opts.model.is_empty() {
            self.config.models.synthesizer.clone()
        } else {
            opts.model.clone()
        };

        let input: Vec<Value> = req
            .input
            .iter()
            .map(|m: &Message| {
                serde_json::json!({
                    "role": m.role.as_str(),
                    "content": m.content,
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "model": model,
            "input": input,
            "stream": stream,
        });

        // Models that enforce reasoning mode reject sampling params.
        if let Some(temp) = opts.temperature {
            if !self.config.is_reasoning_model(&model) {
                body["temperature"] = serde_json::json!(temp);
            }
        }

        let max_tokens = opts
            .max_output_tokens
            .unwrap_or(self.config.max_output_tokens);
        body["max_output_tokens"] = serde_json::json!(max_tokens);

        if let Some(ref schema) = opts.json_schema {
            body["text"] = serde_json::json!({
                "format": {
                    "type": "json_schema",
                    "name": schema.name,
                    "schema": schema.schema,
                    "strict": schema.strict,
                }
            });
        }

        if let Some(ref prev) = opts.previous_response_id {
            body["previous_response_id"] = serde_json::json!(prev);
        }
        if let Some(parallel) = opts.parallel_tool_calls {
            body["parallel_tool_calls"] = serde_json::json!(parallel);
        }
        if let Some(ref user) = opts.user {
            body["user"] = serde_json::json!(sanitize_user_field(user));
        }
        if opts.store {
            body["store"] = serde_json::json!(true);
        }

        body
    }

    /// Map a non-2xx response into a typed error with correlation id.
    async fn error_from_response(resp: reqwest::Response) -> Error {
        let status = resp.status().as_u16();
        let correlation = resp
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp.text().await.unwrap_or_default();

        // Response bodies can carry prompt fragments; only debug builds
        // include them in the error message.
        let message = if cfg!(debug_assertions) {
            format!("LLM HTTP {status}: {body}")
        } else {
            format!("LLM HTTP {status}")
        };

        let mut err = Error::from_status(status, message);
        if let Some(corr) = correlation {
            err = err.with_correlation(corr);
        }
        err
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response extraction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Layered text extraction from a Responses-style body.
///
/// Tries, in order: `output_text`; concatenated message content items;
/// serialized `output_json`; tool-call arguments; `parsed`. Returns an
/// empty string only as an explicit failure signal — callers must not
/// treat it as valid JSON.
pub fn extract_output_text(body: &Value) -> String {
    if let Some(text) = body.get("output_text").and_then(Value::as_str) {
        return text.to_string();
    }

    if let Some(items) = body.get("output").and_then(Value::as_array) {
        let mut parts: Vec<&str> = Vec::new();
        for item in items {
            if item.get("type").and_then(Value::as_str) != Some("message") {
                continue;
            }
            if let Some(content) = item.get("content").and_then(Value::as_array) {
                for block in content {
                    let block_type = block.get("type").and_then(Value::as_str).unwrap_or("");
                    if matches!(block_type, "output_text" | "text") {
                        if let Some(t) = block.get("text").and_then(Value::as_str) {
                            parts.push(t);
                        }
                    }
                }
            }
        }
        if !parts.is_empty() {
            return parts.concat();
        }

        // Tool-call arguments as a last structured resort.
        let mut args: Vec<&str> = Vec::new();
        for item in items {
            if item.get("type").and_then(Value::as_str) == Some("function_call") {
                if let Some(a) = item.get("arguments").and_then(Value::as_str) {
                    args.push(a);
                }
            }
        }
        if !args.is_empty() {
            return args.concat();
        }
    }

    if let Some(json) = body.get("output_json") {
        if !json.is_null() {
            return json.to_string();
        }
    }

    if let Some(parsed) = body.get("parsed") {
        if !parsed.is_null() {
            return parsed.to_string();
        }
    }

    String::new()
}

/// Concatenate reasoning-summary texts from the output items, if any.
fn extract_reasoning_summary(body: &Value) -> Option<String> {
    let items = body.get("output").and_then(Value::as_array)?;
    let mut parts: Vec<&str> = Vec::new();
    for item in items {
        if item.get("type").and_then(Value::as_str) != Some("reasoning") {
            continue;
        }
        if let Some(summaries) = item.get("summary").and_then(Value::as_array) {
            for s in summaries {
                if let Some(t) = s.get("text").and_then(Value::as_str) {
                    parts.push(t);
                }
            }
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n"))
    }
}

fn parse_usage(v: &Value) -> Option<Usage> {
    let usage = v.get("usage")?;
    let input = usage.get("input_tokens")?.as_u64()? as u32;
    let output = usage.get("output_tokens")?.as_u64()? as u32;
    Some(Usage {
        prompt_tokens: input,
        completion_tokens: output,
        total_tokens: input + output,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming SSE parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Buffer key for reasoning-summary accumulation.
type SummaryKey = (String, u32, u32);

/// Mutable state carried across SSE payloads.
struct StreamState {
    /// Accumulated answer text (for the final Completed event when the
    /// server omits `output_text`).
    text_buf: String,
    /// Per-triple reasoning accumulation. Entries MUST be removed on
    /// their `.done` signal; leaving them in place is a slow leak on
    /// long-lived streams.
    summary_bufs: HashMap<SummaryKey, String>,
}

impl StreamState {
    fn new() -> Self {
        Self {
            text_buf: String::new(),
            summary_bufs: HashMap::new(),
        }
    }
}

fn summary_key(v: &Value) -> SummaryKey {
    (
        v.get("item_id")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
        v.get("output_index").and_then(Value::as_u64).unwrap_or(0) as u32,
        v.get("summary_index").and_then(Value::as_u64).unwrap_or(0) as u32,
    )
}

/// Parse one SSE data payload into zero or more [`LlmEvent`]s.
fn parse_responses_sse(data: &str, state: &mut StreamState) -> Vec<Result<LlmEvent>> {
    let mut events = Vec::new();

    if data == "[DONE]" {
        return events;
    }

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            events.push(Err(Error::parse(format!("SSE payload: {e}"))));
            return events;
        }
    };

    let event_type = v.get("type").and_then(Value::as_str).unwrap_or("");

    match event_type {
        "response.output_text.delta" => {
            if let Some(delta) = v.get("delta").and_then(Value::as_str) {
                if !delta.is_empty() {
                    state.text_buf.push_str(delta);
                    events.push(Ok(LlmEvent::Delta {
                        text: delta.to_string(),
                    }));
                }
            }
        }

        "response.reasoning_summary_text.delta" => {
            if let Some(delta) = v.get("delta").and_then(Value::as_str) {
                let key = summary_key(&v);
                state
                    .summary_bufs
                    .entry(key.clone())
                    .or_default()
                    .push_str(delta);
                events.push(Ok(LlmEvent::ReasoningSummary {
                    item_id: key.0,
                    output_index: key.1,
                    summary_index: key.2,
                    text: delta.to_string(),
                }));
            }
        }

        "response.reasoning_summary_text.done" => {
            // Completion signal for this triple: drop the accumulator.
            state.summary_bufs.remove(&summary_key(&v));
        }

        "response.completed" => {
            let resp = v.get("response").cloned().unwrap_or(Value::Null);
            let text = {
                let extracted = extract_output_text(&resp);
                if extracted.is_empty() {
                    state.text_buf.clone()
                } else {
                    extracted
                }
            };
            let response_id = resp
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string);
            state.summary_bufs.clear();
            events.push(Ok(LlmEvent::Completed {
                text,
                usage: parse_usage(&resp),
                response_id,
            }));
        }

        "response.failed" | "error" => {
            let message = v
                .pointer("/response/error/message")
                .or_else(|| v.pointer("/error/message"))
                .and_then(Value::as_str)
                .unwrap_or("stream failed")
                .to_string();
            events.push(Ok(LlmEvent::Failed { message }));
        }

        _ => {
            // created / in_progress / content_part events — ignore.
        }
    }

    events
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmGateway for ResponsesGateway {
    async fn complete(&self, req: CompletionRequest) -> Result<CompletionResponse> {
        let url = format!("{}/responses", self.config.base_url.trim_end_matches('/'));
        let body = self.build_body(&req, false);

        let resp_json = with_retry(&self.retry, "llm_complete", |_attempt| {
            let url = url.clone();
            let body = body.clone();
            async move {
                let builder = self.authed(self.client.post(&url)).await?;
                let resp = builder.json(&body).send().await.map_err(from_reqwest)?;
                if !resp.status().is_success() {
                    return Err(Self::error_from_response(resp).await);
                }
                let v: Value = resp.json().await.map_err(from_reqwest)?;
                Ok(v)
            }
        })
        .await?;

        Ok(CompletionResponse {
            text: extract_output_text(&resp_json),
            usage: parse_usage(&resp_json),
            response_id: resp_json
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string),
            reasoning_summary: extract_reasoning_summary(&resp_json),
        })
    }

    async fn complete_stream(
        &self,
        req: CompletionRequest,
    ) -> Result<BoxStream<'static, Result<LlmEvent>>> {
        let url = format!("{}/responses", self.config.base_url.trim_end_matches('/'));
        let body = self.build_body(&req, true);

        let builder = self.authed(self.client.post(&url)).await?;
        let resp = builder.json(&body).send().await.map_err(from_reqwest)?;
        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }

        let mut state = StreamState::new();
        Ok(crate::sse::sse_response_stream(resp, move |data| {
            parse_responses_sse(data, &mut state)
        }))
    }

    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/embeddings", self.config.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.config.models.embedding,
            "input": texts,
        });

        let resp_json = with_retry(&self.retry, "llm_embed", |_attempt| {
            let url = url.clone();
            let body = body.clone();
            async move {
                let builder = self.authed(self.client.post(&url)).await?;
                let resp = builder.json(&body).send().await.map_err(from_reqwest)?;
                if !resp.status().is_success() {
                    return Err(Self::error_from_response(resp).await);
                }
                let v: Value = resp.json().await.map_err(from_reqwest)?;
                Ok(v)
            }
        })
        .await?;

        let data = resp_json
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::parse("embeddings response missing 'data'"))?;

        let mut embeddings = Vec::with_capacity(data.len());
        for item in data {
            let vector: Vec<f32> = item
                .get("embedding")
                .and_then(Value::as_array)
                .ok_or_else(|| Error::parse("embedding item missing vector"))?
                .iter()
                .filter_map(|x| x.as_f64().map(|f| f as f32))
                .collect();
            embeddings.push(vector);
        }
        Ok(embeddings)
    }

    async fn get_response(
        &self,
        response_id: &str,
        include: Option<&str>,
    ) -> Result<serde_json::Value> {
        let mut url = format!(
            "{}/responses/{response_id}",
            self.config.base_url.trim_end_matches('/')
        );
        if let Some(include) = include {
            url.push_str(&format!("?include={include}"));
        }
        let builder = self.authed(self.client.get(&url)).await?;
        let resp = builder.send().await.map_err(from_reqwest)?;
        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }
        resp.json().await.map_err(from_reqwest)
    }

    async fn delete_response(&self, response_id: &str) -> Result<serde_json::Value> {
        let url = format!(
            "{}/responses/{response_id}",
            self.config.base_url.trim_end_matches('/')
        );
        let builder = self.authed(self.client.delete(&url)).await?;
        let resp = builder.send().await.map_err(from_reqwest)?;
        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }
        resp.json().await.map_err(from_reqwest)
    }

    async fn list_input_items(&self, response_id: &str) -> Result<serde_json::Value> {
        let url = format!(
            "{}/responses/{response_id}/input_items",
            self.config.base_url.trim_end_matches('/')
        );
        let builder = self.authed(self.client.get(&url)).await?;
        let resp = builder.send().await.map_err(from_reqwest)?;
        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }
        resp.json().await.map_err(from_reqwest)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extract_prefers_output_text() {
        let body = json!({
            "output_text": "direct",
            "output": [{"type": "message", "content": [{"type": "output_text", "text": "nested"}]}],
        });
        assert_eq!(extract_output_text(&body), "direct");
    }

    #[test]
    fn extract_concatenates_message_content() {
        let body = json!({
            "output": [
                {"type": "reasoning", "summary": []},
                {"type": "message", "content": [
                    {"type": "output_text", "text": "part one "},
                    {"type": "text", "text": "part two"},
                ]},
            ],
        });
        assert_eq!(extract_output_text(&body), "part one part two");
    }

    #[test]
    fn extract_falls_back_to_output_json() {
        let body = json!({"output_json": {"answer": 1}});
        assert_eq!(extract_output_text(&body), r#"{"answer":1}"#);
    }

    #[test]
    fn extract_tool_call_arguments() {
        let body = json!({
            "output": [{"type": "function_call", "arguments": "{\"q\":\"x\"}"}],
        });
        assert_eq!(extract_output_text(&body), "{\"q\":\"x\"}");
    }

    #[test]
    fn extract_empty_is_explicit_failure_signal() {
        let body = json!({"output": []});
        assert_eq!(extract_output_text(&body), "");
    }

    #[test]
    fn reasoning_summary_from_output_items() {
        let body = json!({
            "output": [
                {"type": "reasoning", "summary": [
                    {"type": "summary_text", "text": "first"},
                    {"type": "summary_text", "text": "second"},
                ]},
                {"type": "message", "content": []},
            ],
        });
        assert_eq!(
            extract_reasoning_summary(&body).as_deref(),
            Some("first\nsecond")
        );
    }

    // ── Stream parsing ─────────────────────────────────────────────

    fn delta_payload(text: &str) -> String {
        json!({"type": "response.output_text.delta", "delta": text}).to_string()
    }

    #[test]
    fn stream_deltas_accumulate_in_order() {
        let mut state = StreamState::new();
        let e1 = parse_responses_sse(&delta_payload("Hello "), &mut state);
        let e2 = parse_responses_sse(&delta_payload("world"), &mut state);
        assert!(matches!(
            e1[0].as_ref().unwrap(),
            LlmEvent::Delta { text } if text == "Hello "
        ));
        assert!(matches!(
            e2[0].as_ref().unwrap(),
            LlmEvent::Delta { text } if text == "world"
        ));
        assert_eq!(state.text_buf, "Hello world");
    }

    #[test]
    fn empty_delta_is_skipped() {
        let mut state = StreamState::new();
        let events = parse_responses_sse(&delta_payload(""), &mut state);
        assert!(events.is_empty());
    }

    #[test]
    fn reasoning_buffer_is_deleted_on_done() {
        let mut state = StreamState::new();
        let delta = json!({
            "type": "response.reasoning_summary_text.delta",
            "item_id": "rs_1", "output_index": 0, "summary_index": 0,
            "delta": "thinking...",
        })
        .to_string();
        let events = parse_responses_sse(&delta, &mut state);
        assert_eq!(events.len(), 1);
        assert_eq!(state.summary_bufs.len(), 1);

        let done = json!({
            "type": "response.reasoning_summary_text.done",
            "item_id": "rs_1", "output_index": 0, "summary_index": 0,
        })
        .to_string();
        parse_responses_sse(&done, &mut state);
        assert!(state.summary_bufs.is_empty());
    }

    #[test]
    fn completed_event_carries_final_text_and_usage() {
        let mut state = StreamState::new();
        parse_responses_sse(&delta_payload("streamed answer"), &mut state);
        let completed = json!({
            "type": "response.completed",
            "response": {
                "id": "resp_abc",
                "usage": {"input_tokens": 10, "output_tokens": 5},
            },
        })
        .to_string();
        let events = parse_responses_sse(&completed, &mut state);
        match events[0].as_ref().unwrap() {
            LlmEvent::Completed {
                text,
                usage,
                response_id,
            } => {
                assert_eq!(text, "streamed answer");
                assert_eq!(usage.as_ref().unwrap().total_tokens, 15);
                assert_eq!(response_id.as_deref(), Some("resp_abc"));
            }
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[test]
    fn completed_clears_all_reasoning_buffers() {
        let mut state = StreamState::new();
        let delta = json!({
            "type": "response.reasoning_summary_text.delta",
            "item_id": "rs_9", "output_index": 1, "summary_index": 2,
            "delta": "leftover",
        })
        .to_string();
        parse_responses_sse(&delta, &mut state);
        let completed = json!({"type": "response.completed", "response": {}}).to_string();
        parse_responses_sse(&completed, &mut state);
        assert!(state.summary_bufs.is_empty());
    }

    #[test]
    fn failed_payload_yields_failed_event() {
        let mut state = StreamState::new();
        let failed = json!({
            "type": "response.failed",
            "response": {"error": {"message": "overloaded"}},
        })
        .to_string();
        let events = parse_responses_sse(&failed, &mut state);
        assert!(matches!(
            events[0].as_ref().unwrap(),
            LlmEvent::Failed { message } if message == "overloaded"
        ));
    }

    #[test]
    fn done_sentinel_is_ignored() {
        let mut state = StreamState::new();
        assert!(parse_responses_sse("[DONE]", &mut state).is_empty());
    }

    // ── Body building ──────────────────────────────────────────────

    fn gateway_for_tests() -> ResponsesGateway {
        let headers = Arc::new(crate::auth::StaticKeyProvider::fixed(
            "Authorization",
            "Bearer test",
        ));
        ResponsesGateway::new(
            LlmConfig::default(),
            headers,
            RetryPolicy::default(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn temperature_is_suppressed_for_reasoning_models() {
        let gw = gateway_for_tests();
        let req = CompletionRequest {
            input: vec![Message::user("hi")],
            options: crate::traits::CompletionOptions {
                model: "o3-mini".into(),
                temperature: Some(0.7),
                ..Default::default()
            },
        };
        let body = gw.build_body(&req, false);
        assert!(body.get("temperature").is_none());

        let req = CompletionRequest {
            input: vec![Message::user("hi")],
            options: crate::traits::CompletionOptions {
                model: "gpt-4o".into(),
                temperature: Some(0.7),
                ..Default::default()
            },
        };
        let body = gw.build_body(&req, false);
        assert_eq!(body["temperature"], json!(0.7));
    }

    #[test]
    fn user_field_is_sanitized_on_the_wire() {
        let gw = gateway_for_tests();
        let req = CompletionRequest {
            input: vec![Message::user("hi")],
            options: crate::traits::CompletionOptions {
                model: "gpt-4o".into(),
                user: Some("has spaces and is definitely way too long to pass the sixty-four character limit".into()),
                ..Default::default()
            },
        };
        let body = gw.build_body(&req, false);
        let user = body["user"].as_str().unwrap();
        assert!(user.starts_with("u-"));
        assert!(user.len() <= 64);
    }

    #[test]
    fn strict_schema_lands_in_text_format() {
        let gw = gateway_for_tests();
        let req = CompletionRequest {
            input: vec![Message::user("classify")],
            options: crate::traits::CompletionOptions {
                model: "gpt-4o-mini".into(),
                json_schema: Some(crate::traits::JsonSchemaFormat::strict(
                    "intent",
                    json!({"type": "object"}),
                )),
                ..Default::default()
            },
        };
        let body = gw.build_body(&req, false);
        assert_eq!(body["text"]["format"]["type"], "json_schema");
        assert_eq!(body["text"]["format"]["strict"], json!(true));
    }
}
