use async_trait::async_trait;
use serde_json::Value;
use weave_core::{template, Context, RecipeError, RecipeResult};

use crate::executor::Executor;
use crate::registry::Step;

/// Transport configuration for an MCP server: either HTTP (`url` +
/// `headers`) or stdio (`command` + `args`). The transport itself is an
/// external collaborator — this crate only describes the shape and the
/// `call_tool` contract a real client must satisfy.
#[derive(Debug, Clone)]
pub struct McpServerConfig {
    pub url: Option<String>,
    pub command: Option<String>,
    pub args: Vec<String>,
    pub headers: Vec<(String, String)>,
}

impl McpServerConfig {
    fn from_value(value: &Value) -> RecipeResult<Self> {
        let url = value.get("url").and_then(Value::as_str).map(|s| s.to_string());
        let command = value
            .get("command")
            .and_then(Value::as_str)
            .map(|s| s.to_string());
        if url.is_none() && command.is_none() {
            return Err(RecipeError::Config(
                "mcp: server config requires 'url' or 'command'".into(),
            ));
        }
        let args = value
            .get("args")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|s| s.to_string())
                    .collect()
            })
            .unwrap_or_default();
        let headers = value
            .get("headers")
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .map(|(k, v)| (k.clone(), v.as_str().unwrap_or_default().to_string()))
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self {
            url,
            command,
            args,
            headers,
        })
    }
}

/// One MCP tool-server client. Real transports (HTTP, stdio) live outside
/// this crate; callers register a concrete implementation the same way they
/// register an `LlmProvider`.
#[async_trait]
pub trait McpClient: Send + Sync {
    async fn call_tool(
        &self,
        server: &McpServerConfig,
        tool_name: &str,
        arguments: &Value,
    ) -> Result<Value, String>;
}

/// Default client for recipes that reference `mcp` without a transport
/// wired in: fails predictably instead of failing to compile.
pub struct NullMcpClient;

#[async_trait]
impl McpClient for NullMcpClient {
    async fn call_tool(
        &self,
        _server: &McpServerConfig,
        tool_name: &str,
        _arguments: &Value,
    ) -> Result<Value, String> {
        Err(format!(
            "no MCP transport configured for tool '{tool_name}'"
        ))
    }
}

pub struct McpStep {
    server: Value,
    tool_name: String,
    arguments: Value,
    output_key: String,
}

impl McpStep {
    pub fn from_config(config: &Value) -> RecipeResult<Self> {
        let server = config
            .get("server")
            .cloned()
            .ok_or_else(|| RecipeError::Config("mcp requires 'server'".into()))?;
        McpServerConfig::from_value(&server)?;

        let tool_name = config
            .get("tool_name")
            .and_then(Value::as_str)
            .ok_or_else(|| RecipeError::Config("mcp requires 'tool_name'".into()))?
            .to_string();
        let arguments = config.get("arguments").cloned().unwrap_or(Value::Null);
        let output_key = config
            .get("output_key")
            .and_then(Value::as_str)
            .ok_or_else(|| RecipeError::Config("mcp requires 'output_key'".into()))?
            .to_string();

        Ok(Self {
            server,
            tool_name,
            arguments,
            output_key,
        })
    }
}

#[async_trait]
impl Step for McpStep {
    async fn execute(&self, executor: &Executor, context: &mut Context) -> RecipeResult<()> {
        let globals = template::globals_from_map(context.iter());
        let server = McpServerConfig::from_value(&self.server)?;
        let tool_name = template::render(&self.tool_name, &globals)?;

        let result = executor
            .mcp_client()
            .call_tool(&server, &tool_name, &self.arguments)
            .await
            .map_err(RecipeError::Mcp)?;

        context.set(self.output_key.clone(), result);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn null_client_fails_predictably() {
        let step = McpStep::from_config(&json!({
            "server": {"url": "http://localhost:1234"},
            "tool_name": "search",
            "output_key": "result",
        }))
        .unwrap();
        let executor = Executor::new(std::sync::Arc::new(crate::llm::ProviderRegistry::new()));
        let mut ctx = Context::new();
        let err = step.execute(&executor, &mut ctx).await.unwrap_err();
        assert_eq!(err.kind(), "mcp-error");
    }

    #[test]
    fn server_config_requires_url_or_command() {
        let err = McpServerConfig::from_value(&json!({})).unwrap_err();
        assert_eq!(err.kind(), "config-error");
    }
}
