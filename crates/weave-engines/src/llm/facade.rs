use jsonschema::{Draft, JSONSchema};
use weave_core::{RecipeError, RecipeResult};

use super::{CompletionRequest, CompletionValue, ModelId, OutputFormat, ProviderRegistry};

/// Dispatches one `llm_generate` call: resolves the model id to a provider,
/// invokes it, and (for schema-bearing output formats) validates the
/// returned JSON against the step-supplied schema before handing it back.
/// No retry happens here — retries are the caller's responsibility.
pub async fn generate(
    providers: &ProviderRegistry,
    prompt: String,
    model_id: &str,
    output_format: OutputFormat,
    max_tokens: Option<u32>,
) -> RecipeResult<CompletionValue> {
    let parsed = ModelId::parse(model_id).map_err(|e| RecipeError::Llm(e.to_string()))?;

    let provider = providers
        .get(&parsed.provider)
        .map_err(|e| RecipeError::Llm(e.to_string()))?;

    let request = CompletionRequest {
        prompt,
        model: parsed.model,
        max_tokens,
        output_format: output_format.clone(),
    };

    let value = provider
        .complete(&request)
        .await
        .map_err(|e| RecipeError::Llm(format!("{model_id}: {e}")))?;

    validate_output(&value, &output_format)?;
    Ok(value)
}

fn validate_output(value: &CompletionValue, output_format: &OutputFormat) -> RecipeResult<()> {
    let schema = match output_format {
        OutputFormat::Object(schema) => schema,
        OutputFormat::ObjectList(schema) => schema,
        _ => return Ok(()),
    };

    let compiled = JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(schema)
        .map_err(|e| RecipeError::Llm(format!("invalid output schema: {e}")))?;

    let instance = match value {
        CompletionValue::Object(v) => v.clone(),
        CompletionValue::ObjectList(items) => serde_json::Value::Array(items.clone()),
        _ => return Ok(()),
    };

    compiled.validate(&instance).map_err(|errors| {
        RecipeError::Llm(
            errors
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; "),
        )
    })
}
