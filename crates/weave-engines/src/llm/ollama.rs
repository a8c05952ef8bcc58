use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde_json::{json, Value};
use weave_core::FileSpec;

use super::{CompletionRequest, CompletionValue, LlmProvider, OutputFormat, ProviderError};

/// Reference `LlmProvider` implementation against a locally configured
/// Ollama server. No API key, no vendor SDK — this exercises the dispatch
/// facade end-to-end without pulling in an authenticated cloud integration.
pub struct OllamaProvider {
    client: Client,
    base_url: String,
}

impl OllamaProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionValue, ProviderError> {
        let url = format!("{}/api/generate", self.base_url.trim_end_matches('/'));

        let mut payload = json!({
            "model": request.model,
            "prompt": request.prompt,
            "stream": false,
        });
        if let Some(max_tokens) = request.max_tokens {
            payload["options"] = json!({ "num_predict": max_tokens });
        }
        if let OutputFormat::Object(schema) | OutputFormat::ObjectList(schema) =
            &request.output_format
        {
            payload["format"] = schema.clone();
        }

        debug!("Ollama request to {url}: {payload}");

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ProviderError::Http {
                provider: "ollama".to_string(),
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Rejected {
                provider: "ollama".to_string(),
                message: format!("status {status}: {body}"),
            });
        }

        let body: Value = response.json().await.map_err(|e| ProviderError::Http {
            provider: "ollama".to_string(),
            message: e.to_string(),
        })?;

        let text = body
            .get("response")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        match &request.output_format {
            OutputFormat::Text => Ok(CompletionValue::Text(text)),
            OutputFormat::Files => {
                let files: Vec<FileSpec> = serde_json::from_str(&text).map_err(|e| {
                    ProviderError::SchemaValidation {
                        provider: "ollama".to_string(),
                        message: format!("expected a list of FileSpec: {e}"),
                    }
                })?;
                Ok(CompletionValue::Files(files))
            }
            OutputFormat::Object(_) => {
                let value: Value = serde_json::from_str(&text).map_err(|e| {
                    ProviderError::SchemaValidation {
                        provider: "ollama".to_string(),
                        message: format!("expected a JSON object: {e}"),
                    }
                })?;
                Ok(CompletionValue::Object(value))
            }
            OutputFormat::ObjectList(_) => {
                let values: Vec<Value> = serde_json::from_str(&text).map_err(|e| {
                    ProviderError::SchemaValidation {
                        provider: "ollama".to_string(),
                        message: format!("expected a JSON list: {e}"),
                    }
                })?;
                Ok(CompletionValue::ObjectList(values))
            }
        }
    }
}
