mod facade;
mod ollama;

pub use facade::generate;
pub use ollama::OllamaProvider;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use weave_core::FileSpec;

/// What a single `llm_generate` call should produce.
#[derive(Debug, Clone)]
pub enum OutputFormat {
    Text,
    Files,
    Object(Value),
    ObjectList(Value),
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub prompt: String,
    pub model: String,
    pub max_tokens: Option<u32>,
    pub output_format: OutputFormat,
}

#[derive(Debug, Clone)]
pub enum CompletionValue {
    Text(String),
    Files(Vec<FileSpec>),
    Object(Value),
    ObjectList(Vec<Value>),
}

/// Errors raised while dispatching to a concrete provider, folded into
/// `RecipeError::Llm` by the facade.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("http error calling {provider}: {message}")]
    Http { provider: String, message: String },
    #[error("{provider} rejected the request: {message}")]
    Rejected { provider: String, message: String },
    #[error("{provider} response failed schema validation: {message}")]
    SchemaValidation { provider: String, message: String },
    #[error("unknown provider '{0}'")]
    UnknownProvider(String),
}

/// One concrete LLM backend. Implementations are registered into a
/// [`ProviderRegistry`] by the caller (the CLI, or a test harness) — this
/// crate never constructs a real provider on its own behind the caller's
/// back.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionValue, ProviderError>;
}

/// Maps the provider segment of a model id (`openai`, `azure`, `anthropic`,
/// `ollama`) to a boxed provider implementation.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, provider_name: &str) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        self.providers
            .get(provider_name)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownProvider(provider_name.to_string()))
    }
}

/// `<provider>/<model>` or `<provider>/<model>/<deployment>`.
pub struct ModelId {
    pub provider: String,
    pub model: String,
    pub deployment: Option<String>,
}

impl ModelId {
    pub fn parse(raw: &str) -> Result<ModelId, ProviderError> {
        let mut parts = raw.splitn(3, '/');
        let provider = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ProviderError::Rejected {
                provider: "facade".to_string(),
                message: format!("model id '{raw}' is missing a provider segment"),
            })?;
        let model = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ProviderError::Rejected {
                provider: provider.to_string(),
                message: format!("model id '{raw}' is missing a model segment"),
            })?;
        let deployment = parts.next().map(|s| s.to_string());
        Ok(ModelId {
            provider: provider.to_string(),
            model: model.to_string(),
            deployment,
        })
    }
}
