//! Retrieval planning: a strict-schema LLM call producing a
//! [`PlanSummary`], with a safe default when planning fails.

use gl_domain::config::ModelRoles;
use gl_domain::message::Message;
use gl_domain::plan::{Intent, PlanSummary};
use gl_providers::traits::{
    complete_structured, CompletionOptions, CompletionRequest, JsonSchemaFormat, LlmGateway,
};

const PLANNER_SYSTEM_PROMPT: &str = "\
Plan the retrieval for answering the user's question. Propose at most
three steps. Each step has an action (vector_search, web_search, both,
or none), an optional refined query, and an optional result count k.
Report your confidence that this plan will surface the evidence needed.
Respond with the JSON object only.";

fn plan_schema() -> JsonSchemaFormat {
    JsonSchemaFormat::strict(
        "retrieval_plan",
        serde_json::json!({
            "type": "object",
            "properties": {
                "confidence": {"type": "number", "minimum": 0, "maximum": 1},
                "steps": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "action": {
                                "type": "string",
                                "enum": ["vector_search", "web_search", "both", "none"],
                            },
                            "query": {"type": ["string", "null"]},
                            "k": {"type": ["integer", "null"], "minimum": 1},
                        },
                        "required": ["action"],
                        "additionalProperties": false,
                    },
                },
            },
            "required": ["confidence", "steps"],
            "additionalProperties": false,
        }),
    )
}

/// Produce a retrieval plan for the question.
///
/// On any failure or invalid payload the planner returns
/// [`PlanSummary::fallback`]: one vector-search step at 0.5 confidence.
pub async fn plan(
    llm: &dyn LlmGateway,
    models: &ModelRoles,
    intent: Intent,
    question: &str,
) -> PlanSummary {
    let req = CompletionRequest {
        input: vec![
            Message::system(PLANNER_SYSTEM_PROMPT),
            Message::user(format!("Intent: {}\nQuestion: {question}", intent.as_str())),
        ],
        options: CompletionOptions {
            model: models.planner.clone(),
            temperature: Some(0.0),
            max_output_tokens: Some(512),
            json_schema: Some(plan_schema()),
            ..Default::default()
        },
    };

    match complete_structured::<PlanSummary>(llm, req).await {
        Ok(plan) if (0.0..=1.0).contains(&plan.confidence) => plan,
        Ok(plan) => {
            tracing::warn!(
                confidence = plan.confidence,
                "planner confidence out of range; using fallback plan"
            );
            PlanSummary::fallback()
        }
        Err(e) => {
            tracing::warn!(error = %e, "planning failed; using fallback plan");
            PlanSummary::fallback()
        }
    }
}
