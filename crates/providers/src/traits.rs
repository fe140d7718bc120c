use gl_domain::error::Result;
use gl_domain::message::Message;
use gl_domain::stream::{BoxStream, Usage};
use serde::de::DeserializeOwned;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A JSON-schema "strict" structured-output request.
#[derive(Debug, Clone)]
pub struct JsonSchemaFormat {
    pub name: String,
    pub schema: serde_json::Value,
    pub strict: bool,
}

impl JsonSchemaFormat {
    pub fn strict(name: impl Into<String>, schema: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            schema,
            strict: true,
        }
    }
}

/// Options for one completion call.
#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    /// Model identifier. Empty string lets the gateway pick its default.
    pub model: String,
    /// Sampling temperature. Suppressed automatically for models that
    /// enforce reasoning mode.
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    pub json_schema: Option<JsonSchemaFormat>,
    /// Server-side response chaining, when storage is enabled.
    pub previous_response_id: Option<String>,
    pub parallel_tool_calls: Option<bool>,
    /// Opaque correlation field. Sanitized before it reaches the wire
    /// (see [`crate::util::sanitize_user_field`]).
    pub user: Option<String>,
    /// Request server-side storage and a stable response id.
    pub store: bool,
}

/// A completion request: conversation input plus options.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub input: Vec<Message>,
    pub options: CompletionOptions,
}

/// A completed (non-streaming) response.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub text: String,
    pub usage: Option<Usage>,
    pub response_id: Option<String>,
    pub reasoning_summary: Option<String>,
}

/// Events yielded by a streaming completion.
#[derive(Debug, Clone)]
pub enum LlmEvent {
    /// A concatenable text delta.
    Delta { text: String },
    /// A structured reasoning-summary fragment. Fragments for a given
    /// `(item_id, output_index, summary_index)` triple arrive in order.
    ReasoningSummary {
        item_id: String,
        output_index: u32,
        summary_index: u32,
        text: String,
    },
    /// The stream finished; carries the final text and usage.
    Completed {
        text: String,
        usage: Option<Usage>,
        response_id: Option<String>,
    },
    /// The stream failed server-side.
    Failed { message: String },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Gateway trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Capability contract for the hosted LLM.
///
/// One concrete adapter talks to the real service; tests substitute
/// in-memory fakes.
#[async_trait::async_trait]
pub trait LlmGateway: Send + Sync {
    /// Send a completion request and wait for the full response.
    async fn complete(&self, req: CompletionRequest) -> Result<CompletionResponse>;

    /// Send a completion request and return a stream of events.
    async fn complete_stream(
        &self,
        req: CompletionRequest,
    ) -> Result<BoxStream<'static, Result<LlmEvent>>>;

    /// Generate one embedding vector per input text.
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    /// Fetch a server-stored response by id.
    async fn get_response(
        &self,
        response_id: &str,
        include: Option<&str>,
    ) -> Result<serde_json::Value>;

    /// Delete a server-stored response.
    async fn delete_response(&self, response_id: &str) -> Result<serde_json::Value>;

    /// List the input items of a server-stored response.
    async fn list_input_items(&self, response_id: &str) -> Result<serde_json::Value>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Structured-output helper
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run a completion with a strict JSON schema and parse the result.
///
/// An empty response text is an explicit extraction-failure signal and
/// is refused before JSON parsing (an empty string is not valid JSON,
/// but the distinction matters for the error kind and message).
pub async fn complete_structured<T: DeserializeOwned>(
    gateway: &dyn LlmGateway,
    req: CompletionRequest,
) -> Result<T> {
    let schema_name = req
        .options
        .json_schema
        .as_ref()
        .map(|s| s.name.clone())
        .unwrap_or_default();
    let resp = gateway.complete(req).await?;
    if resp.text.trim().is_empty() {
        return Err(gl_domain::Error::parse(format!(
            "structured output '{schema_name}': model returned empty payload"
        )));
    }
    serde_json::from_str(&resp.text).map_err(|e| {
        gl_domain::Error::parse(format!(
            "structured output '{schema_name}': {e}"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gl_domain::stream::BoxStream;

    /// Minimal fake returning a fixed text.
    struct FixedGateway(String);

    #[async_trait::async_trait]
    impl LlmGateway for FixedGateway {
        async fn complete(&self, _req: CompletionRequest) -> Result<CompletionResponse> {
            Ok(CompletionResponse {
                text: self.0.clone(),
                usage: None,
                response_id: None,
                reasoning_summary: None,
            })
        }

        async fn complete_stream(
            &self,
            _req: CompletionRequest,
        ) -> Result<BoxStream<'static, Result<LlmEvent>>> {
            unimplemented!("not used in these tests")
        }

        async fn embed(&self, _texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
            Ok(Vec::new())
        }

        async fn get_response(
            &self,
            _id: &str,
            _include: Option<&str>,
        ) -> Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }

        async fn delete_response(&self, _id: &str) -> Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }

        async fn list_input_items(&self, _id: &str) -> Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
    }

    #[derive(serde::Deserialize, Debug)]
    struct Verdict {
        ok: bool,
    }

    #[tokio::test]
    async fn structured_output_parses_json() {
        let gw = FixedGateway(r#"{"ok": true}"#.into());
        let v: Verdict = complete_structured(&gw, CompletionRequest::default())
            .await
            .unwrap();
        assert!(v.ok);
    }

    #[tokio::test]
    async fn empty_payload_is_refused_not_parsed() {
        let gw = FixedGateway("   ".into());
        let err = complete_structured::<Verdict>(&gw, CompletionRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, gl_domain::ErrorKind::Parse);
        assert!(err.message.contains("empty payload"));
    }
}
