use async_trait::async_trait;
use serde_json::Value;
use weave_core::{template, Context, FileSpec, RecipeError, RecipeResult};

use crate::executor::Executor;
use crate::llm::{self, CompletionValue, OutputFormat};
use crate::registry::Step;

pub struct LlmGenerateStep {
    prompt: String,
    model: String,
    max_tokens: Option<Value>,
    output_format: Value,
    output_key: Option<String>,
    mcp_servers: Vec<Value>,
}

impl LlmGenerateStep {
    pub fn from_config(config: &Value) -> RecipeResult<Self> {
        let prompt = config
            .get("prompt")
            .and_then(Value::as_str)
            .ok_or_else(|| RecipeError::Config("llm_generate requires 'prompt'".into()))?
            .to_string();
        let model = config
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let max_tokens = config.get("max_tokens").cloned();
        let output_format = config
            .get("output_format")
            .cloned()
            .ok_or_else(|| RecipeError::Config("llm_generate requires 'output_format'".into()))?;
        let output_key = config
            .get("output_key")
            .and_then(Value::as_str)
            .map(|s| s.to_string());
        let mcp_servers = config
            .get("mcp_servers")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(Self {
            prompt,
            model,
            max_tokens,
            output_format,
            output_key,
            mcp_servers,
        })
    }

    /// `output_format` is `"text"`, `"files"`, an object schema, or a
    /// single-element array schema (list of objects).
    fn parse_output_format(&self) -> RecipeResult<OutputFormat> {
        match &self.output_format {
            Value::String(s) if s == "text" => Ok(OutputFormat::Text),
            Value::String(s) if s == "files" => Ok(OutputFormat::Files),
            Value::String(other) => Err(RecipeError::Config(format!(
                "llm_generate: unknown output_format '{other}'"
            ))),
            Value::Object(_) => Ok(OutputFormat::Object(self.output_format.clone())),
            Value::Array(items) if items.len() == 1 => {
                Ok(OutputFormat::ObjectList(items[0].clone()))
            }
            other => Err(RecipeError::Config(format!(
                "llm_generate: output_format must be \"text\", \"files\", an object schema, \
                 or a single-element list schema, got {other}"
            ))),
        }
    }

    fn render_value(value: &Value, globals: &template::Globals) -> RecipeResult<Value> {
        match value {
            Value::String(s) => Ok(Value::String(template::render(s, globals)?)),
            Value::Array(items) => Ok(Value::Array(
                items
                    .iter()
                    .map(|v| Self::render_value(v, globals))
                    .collect::<RecipeResult<Vec<_>>>()?,
            )),
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), Self::render_value(v, globals)?);
                }
                Ok(Value::Object(out))
            }
            other => Ok(other.clone()),
        }
    }
}

#[async_trait]
impl Step for LlmGenerateStep {
    async fn execute(&self, executor: &Executor, context: &mut Context) -> RecipeResult<()> {
        let globals = template::globals_from_map(context.iter());

        let prompt = template::render(&self.prompt, &globals)?;
        let model = template::render(&self.model, &globals)?;
        let output_key = self
            .output_key
            .as_deref()
            .map(|k| template::render(k, &globals))
            .transpose()?;

        let max_tokens = self
            .max_tokens
            .as_ref()
            .map(|v| Self::render_value(v, &globals))
            .transpose()?
            .map(|v| match v {
                Value::Number(n) => n.as_u64().map(|n| n as u32),
                Value::String(s) => s.parse::<u32>().ok(),
                _ => None,
            })
            .flatten();

        // Effective MCP server list is this step's list plus config().mcp_servers.
        let mut effective_mcp_servers = Vec::with_capacity(self.mcp_servers.len());
        for server in &self.mcp_servers {
            effective_mcp_servers.push(Self::render_value(server, &globals)?);
        }
        if let Some(Value::Array(config_servers)) = context.config_get("mcp_servers") {
            effective_mcp_servers.extend(config_servers.iter().cloned());
        }

        let output_format = self.parse_output_format()?;

        let result = llm::generate(executor.providers(), prompt, &model, output_format, max_tokens).await?;

        if let Some(key) = output_key {
            let value = match result {
                CompletionValue::Text(text) => Value::String(text),
                CompletionValue::Files(files) => serde_json::to_value(files)
                    .map_err(|e| RecipeError::Llm(format!("failed to serialize FileSpec list: {e}")))?,
                CompletionValue::Object(obj) => obj,
                CompletionValue::ObjectList(items) => Value::Array(items),
            };
            context.set(key, value);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CompletionRequest, LlmProvider, ProviderError, ProviderRegistry};
    use serde_json::json;
    use std::sync::Arc;

    struct EchoProvider;

    #[async_trait]
    impl LlmProvider for EchoProvider {
        fn name(&self) -> &str {
            "ollama"
        }

        async fn complete(&self, request: &CompletionRequest) -> Result<CompletionValue, ProviderError> {
            match &request.output_format {
                OutputFormat::Text => Ok(CompletionValue::Text(format!("echo: {}", request.prompt))),
                OutputFormat::Files => Ok(CompletionValue::Files(vec![FileSpec {
                    path: "out.md".into(),
                    content: request.prompt.clone(),
                }])),
                OutputFormat::Object(_) => Ok(CompletionValue::Object(json!({"summary": request.prompt}))),
                OutputFormat::ObjectList(_) => {
                    Ok(CompletionValue::ObjectList(vec![json!({"summary": request.prompt})]))
                }
            }
        }
    }

    fn executor() -> Executor {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(EchoProvider));
        Executor::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn text_output_is_stored_under_output_key() {
        let step = LlmGenerateStep::from_config(&json!({
            "prompt": "hi {{name}}",
            "model": "ollama/llama3",
            "output_format": "text",
            "output_key": "out",
        }))
        .unwrap();
        let mut ctx = Context::new();
        ctx.set("name", json!("weave"));
        step.execute(&executor(), &mut ctx).await.unwrap();
        assert_eq!(ctx.get("out").unwrap().as_str().unwrap(), "echo: hi weave");
    }

    #[tokio::test]
    async fn files_output_round_trips_as_file_spec_list() {
        let step = LlmGenerateStep::from_config(&json!({
            "prompt": "content",
            "model": "ollama/llama3",
            "output_format": "files",
            "output_key": "files",
        }))
        .unwrap();
        let mut ctx = Context::new();
        step.execute(&executor(), &mut ctx).await.unwrap();
        let files: Vec<FileSpec> = serde_json::from_value(ctx.get("files").unwrap().clone()).unwrap();
        assert_eq!(files[0].path, "out.md");
    }

    #[tokio::test]
    async fn object_list_schema_is_stored_as_list() {
        let step = LlmGenerateStep::from_config(&json!({
            "prompt": "x",
            "model": "ollama/llama3",
            "output_format": [{"type": "object"}],
            "output_key": "out",
        }))
        .unwrap();
        let mut ctx = Context::new();
        step.execute(&executor(), &mut ctx).await.unwrap();
        assert!(ctx.get("out").unwrap().is_array());
    }
}
