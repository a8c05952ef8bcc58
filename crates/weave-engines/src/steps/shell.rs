use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use serde_json::Value;
use tokio::process::Command;
use tokio::time::timeout;
use weave_core::{template, Context, RecipeError, RecipeResult};

use crate::executor::Executor;
use crate::registry::Step;

/// Launches a subprocess through the shell. This is a plain OS-process
/// launch, not a provider integration, so it is implemented concretely
/// (unlike `mcp`, whose transport is genuinely out of scope).
pub struct ShellStep {
    command: String,
    working_dir: Option<String>,
    env: HashMap<String, String>,
    capture_output: bool,
    output_key: Option<String>,
    error_key: Option<String>,
    timeout: Option<Duration>,
}

impl ShellStep {
    pub fn from_config(config: &Value) -> RecipeResult<Self> {
        let command = config
            .get("command")
            .and_then(Value::as_str)
            .ok_or_else(|| RecipeError::Config("shell requires 'command'".into()))?
            .to_string();
        let working_dir = config
            .get("working_dir")
            .and_then(Value::as_str)
            .map(|s| s.to_string());
        let env = match config.get("env") {
            Some(Value::Object(map)) => map
                .iter()
                .map(|(k, v)| (k.clone(), v.as_str().unwrap_or_default().to_string()))
                .collect(),
            Some(_) => {
                return Err(RecipeError::Config("shell: 'env' must be an object".into()))
            }
            None => HashMap::new(),
        };
        let capture_output = config
            .get("capture_output")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        let output_key = config
            .get("output_key")
            .and_then(Value::as_str)
            .map(|s| s.to_string());
        let error_key = config
            .get("error_key")
            .and_then(Value::as_str)
            .map(|s| s.to_string());
        let timeout = config
            .get("timeout")
            .and_then(Value::as_f64)
            .map(Duration::from_secs_f64);

        Ok(Self {
            command,
            working_dir,
            env,
            capture_output,
            output_key,
            error_key,
            timeout,
        })
    }

    async fn run(&self, command: &str, working_dir: Option<&str>) -> RecipeResult<std::process::Output> {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c").arg(command);
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }
        for (k, v) in &self.env {
            cmd.env(k, v);
        }

        let run = async {
            if self.capture_output {
                cmd.output().await
            } else {
                cmd.status().await.map(|status| std::process::Output {
                    status,
                    stdout: Vec::new(),
                    stderr: Vec::new(),
                })
            }
        };

        let output = match self.timeout {
            Some(d) => timeout(d, run)
                .await
                .map_err(|_| RecipeError::Shell(format!("command timed out after {d:?}: {command}")))?,
            None => run.await,
        }
        .map_err(|e| RecipeError::Shell(format!("failed to launch '{command}': {e}")))?;

        Ok(output)
    }
}

#[async_trait]
impl Step for ShellStep {
    async fn execute(&self, _executor: &Executor, context: &mut Context) -> RecipeResult<()> {
        let globals = template::globals_from_map(context.iter());
        let command = template::render(&self.command, &globals)?;
        let working_dir = self
            .working_dir
            .as_deref()
            .map(|d| template::render(d, &globals))
            .transpose()?;

        debug!("shell: running `{command}`");
        let output = self.run(&command, working_dir.as_deref()).await?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if let Some(key) = &self.output_key {
            context.set(key.clone(), Value::String(stdout.clone()));
        }
        if let Some(key) = &self.error_key {
            context.set(key.clone(), Value::String(stderr.clone()));
        }

        if !output.status.success() {
            let tail: String = stderr.chars().rev().take(500).collect::<String>().chars().rev().collect();
            return Err(RecipeError::Shell(format!(
                "command exited with {}: {command} (stderr tail: {tail})",
                output
                    .status
                    .code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string())
            )));
        }

        Ok(())
    }
}
