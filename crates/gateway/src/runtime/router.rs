//! Intent classification and the static intent → route table.

use gl_domain::config::ModelRoles;
use gl_domain::message::Message;
use gl_domain::plan::{Intent, IntentClassification, RetrievalStrategy, RouteConfig};
use gl_providers::traits::{
    complete_structured, CompletionOptions, CompletionRequest, JsonSchemaFormat, LlmGateway,
};

/// Confidence reported when classification fails and the router
/// defaults to `research`.
const FALLBACK_CONFIDENCE: f64 = 0.2;

const CLASSIFIER_SYSTEM_PROMPT: &str = "\
Classify the user's latest question into exactly one intent:
- faq: a short, common question answerable from the knowledge base
- research: an open-ended question needing multiple sources
- factual: a precise factual lookup
- conversational: chit-chat or a meta question about the conversation
Respond with the JSON object only.";

fn classification_schema() -> JsonSchemaFormat {
    JsonSchemaFormat::strict(
        "intent_classification",
        serde_json::json!({
            "type": "object",
            "properties": {
                "intent": {
                    "type": "string",
                    "enum": ["faq", "research", "factual", "conversational"],
                },
                "confidence": {"type": "number", "minimum": 0, "maximum": 1},
                "reasoning": {"type": "string"},
            },
            "required": ["intent", "confidence", "reasoning"],
            "additionalProperties": false,
        }),
    )
}

/// Classify the question's intent with a strict-schema LLM call.
///
/// Any failure (transport, parse, schema drift) defaults to `research`
/// at low confidence — the broadest route — rather than failing the
/// turn.
pub async fn classify_intent(
    llm: &dyn LlmGateway,
    models: &ModelRoles,
    question: &str,
) -> IntentClassification {
    let req = CompletionRequest {
        input: vec![
            Message::system(CLASSIFIER_SYSTEM_PROMPT),
            Message::user(question),
        ],
        options: CompletionOptions {
            model: models.router.clone(),
            temperature: Some(0.0),
            max_output_tokens: Some(256),
            json_schema: Some(classification_schema()),
            ..Default::default()
        },
    };

    match complete_structured::<IntentClassification>(llm, req).await {
        Ok(classification) => classification,
        Err(e) => {
            tracing::warn!(error = %e, "intent classification failed; defaulting to research");
            IntentClassification {
                intent: Intent::Research,
                confidence: FALLBACK_CONFIDENCE,
                reasoning: format!("classifier_error: {}", e.message),
            }
        }
    }
}

/// Static route table: every intent maps to a model and retrieval
/// strategy.
pub fn route_for(intent: Intent, models: &ModelRoles) -> RouteConfig {
    match intent {
        Intent::Faq => RouteConfig {
            model: models.router.clone(),
            retrieval_strategy: RetrievalStrategy::Lazy,
        },
        Intent::Research => RouteConfig {
            model: models.synthesizer.clone(),
            retrieval_strategy: RetrievalStrategy::Hybrid,
        },
        Intent::Factual => RouteConfig {
            model: models.synthesizer.clone(),
            retrieval_strategy: RetrievalStrategy::Hybrid,
        },
        Intent::Conversational => RouteConfig {
            model: models.router.clone(),
            retrieval_strategy: RetrievalStrategy::None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gl_domain::error::Result;
    use gl_domain::stream::BoxStream;
    use gl_providers::traits::{CompletionResponse, LlmEvent};

    struct ScriptedLlm {
        response: Result<String>,
    }

    #[async_trait::async_trait]
    impl LlmGateway for ScriptedLlm {
        async fn complete(&self, _req: CompletionRequest) -> Result<CompletionResponse> {
            self.response.clone().map(|text| CompletionResponse {
                text,
                usage: None,
                response_id: None,
                reasoning_summary: None,
            })
        }

        async fn complete_stream(
            &self,
            _req: CompletionRequest,
        ) -> Result<BoxStream<'static, Result<LlmEvent>>> {
            unimplemented!("not used")
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

    #[tokio::test]
    async fn valid_classification_is_used() {
        let llm = ScriptedLlm {
            response: Ok(
                r#"{"intent":"faq","confidence":0.92,"reasoning":"short lookup"}"#.into(),
            ),
        };
        let c = classify_intent(&llm, &ModelRoles::default(), "what is x?").await;
        assert_eq!(c.intent, Intent::Faq);
        assert!(c.confidence > 0.9);
    }

    #[tokio::test]
    async fn failure_defaults_to_research() {
        let llm = ScriptedLlm {
            response: Err(gl_domain::Error::transport("down")),
        };
        let c = classify_intent(&llm, &ModelRoles::default(), "anything").await;
        assert_eq!(c.intent, Intent::Research);
        assert!(c.confidence <= FALLBACK_CONFIDENCE);
    }

    #[tokio::test]
    async fn garbage_payload_defaults_to_research() {
        let llm = ScriptedLlm {
            response: Ok("not json at all".into()),
        };
        let c = classify_intent(&llm, &ModelRoles::default(), "anything").await;
        assert_eq!(c.intent, Intent::Research);
    }

    #[test]
    fn every_intent_has_a_route() {
        let models = ModelRoles::default();
        for intent in [
            Intent::Faq,
            Intent::Research,
            Intent::Factual,
            Intent::Conversational,
        ] {
            let route = route_for(intent, &models);
            assert!(!route.model.is_empty());
        }
        assert_eq!(
            route_for(Intent::Conversational, &models).retrieval_strategy,
            RetrievalStrategy::None
        );
    }
}
