use std::path::Path;

use async_trait::async_trait;
use log::debug;
use serde_json::{json, Value};
use weave_core::{template, Context, RecipeError, RecipeResult};

use crate::executor::Executor;
use crate::registry::Step;

#[derive(Clone, Copy, PartialEq)]
enum MergeMode {
    Concat,
    Dict,
}

pub struct ReadFilesStep {
    path_spec: Value,
    content_key: String,
    optional: bool,
    merge_mode: MergeMode,
}

impl ReadFilesStep {
    pub fn from_config(config: &Value) -> RecipeResult<Self> {
        let path_spec = config
            .get("path")
            .or_else(|| config.get("paths"))
            .cloned()
            .ok_or_else(|| RecipeError::Config("read_files requires 'path' or 'paths'".into()))?;
        let content_key = config
            .get("content_key")
            .and_then(Value::as_str)
            .ok_or_else(|| RecipeError::Config("read_files requires 'content_key'".into()))?
            .to_string();
        let optional = config.get("optional").and_then(Value::as_bool).unwrap_or(false);
        let merge_mode = match config.get("merge_mode").and_then(Value::as_str).unwrap_or("concat") {
            "concat" => MergeMode::Concat,
            "dict" => MergeMode::Dict,
            other => {
                return Err(RecipeError::Config(format!(
                    "read_files: unknown merge_mode '{other}'"
                )))
            }
        };
        Ok(Self {
            path_spec,
            content_key,
            optional,
            merge_mode,
        })
    }

    fn resolve_paths(&self, globals: &template::Globals) -> RecipeResult<Vec<String>> {
        match &self.path_spec {
            Value::String(s) => {
                let rendered = template::render(s, globals)?;
                Ok(rendered
                    .split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect())
            }
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    let raw = item.as_str().ok_or_else(|| {
                        RecipeError::Config("read_files: path list entries must be strings".into())
                    })?;
                    out.push(template::render(raw, globals)?);
                }
                Ok(out)
            }
            other => Err(RecipeError::Config(format!(
                "read_files: 'path' must be a string or list, got {other}"
            ))),
        }
    }

    fn basename(path: &str) -> String {
        Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string())
    }
}

#[async_trait]
impl Step for ReadFilesStep {
    async fn execute(&self, _executor: &Executor, context: &mut Context) -> RecipeResult<()> {
        let globals = template::globals_from_map(context.iter());
        let paths = self.resolve_paths(&globals)?;

        match self.merge_mode {
            MergeMode::Concat => {
                let mut parts = Vec::with_capacity(paths.len());
                for path in &paths {
                    match tokio::fs::read_to_string(path).await {
                        Ok(content) => {
                            if paths.len() == 1 {
                                parts.push(content);
                            } else {
                                parts.push(format!("File: {}\n{content}", Self::basename(path)));
                            }
                        }
                        Err(e) if self.optional => {
                            debug!("read_files: optional file {path} missing ({e}), contributing empty string");
                            parts.push(String::new());
                        }
                        Err(e) => return Err(RecipeError::MissingFile(format!("{path}: {e}"))),
                    }
                }
                context.set(self.content_key.clone(), json!(parts.join("\n\n")));
            }
            MergeMode::Dict => {
                let mut map = serde_json::Map::with_capacity(paths.len());
                for path in &paths {
                    match tokio::fs::read_to_string(path).await {
                        Ok(content) => {
                            map.insert(Self::basename(path), json!(content));
                        }
                        Err(e) if self.optional => {
                            debug!("read_files: optional file {path} missing ({e}), skipped");
                        }
                        Err(e) => return Err(RecipeError::MissingFile(format!("{path}: {e}"))),
                    }
                }
                context.set(self.content_key.clone(), Value::Object(map));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn executor() -> Executor {
        Executor::new(std::sync::Arc::new(crate::llm::ProviderRegistry::new()))
    }

    #[tokio::test]
    async fn concat_mode_joins_with_headers_for_multiple_files() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("x.md"), "alpha").unwrap();
        std::fs::write(dir.path().join("y.md"), "beta").unwrap();
        let path_list = format!(
            "{},{}",
            dir.path().join("x.md").display(),
            dir.path().join("y.md").display()
        );

        let step = ReadFilesStep::from_config(&json!({
            "path": path_list,
            "content_key": "blob",
            "merge_mode": "concat",
        }))
        .unwrap();

        let mut ctx = Context::new();
        step.execute(&executor(), &mut ctx).await.unwrap();
        let blob = ctx.get("blob").unwrap().as_str().unwrap().to_string();
        assert!(blob.starts_with("File: x.md\nalpha"));
        assert!(blob.contains("File: y.md\nbeta"));
    }

    #[tokio::test]
    async fn single_file_concat_has_no_header() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("x.md"), "alpha").unwrap();

        let step = ReadFilesStep::from_config(&json!({
            "path": dir.path().join("x.md").display().to_string(),
            "content_key": "blob",
        }))
        .unwrap();

        let mut ctx = Context::new();
        step.execute(&executor(), &mut ctx).await.unwrap();
        assert_eq!(ctx.get("blob").unwrap().as_str().unwrap(), "alpha");
    }

    #[tokio::test]
    async fn missing_required_file_fails() {
        let step = ReadFilesStep::from_config(&json!({
            "path": "/nonexistent/path.md",
            "content_key": "blob",
        }))
        .unwrap();

        let mut ctx = Context::new();
        let err = step.execute(&executor(), &mut ctx).await.unwrap_err();
        assert_eq!(err.kind(), "missing-file");
    }

    #[tokio::test]
    async fn optional_missing_file_contributes_empty_string() {
        let step = ReadFilesStep::from_config(&json!({
            "path": "/nonexistent/path.md",
            "content_key": "blob",
            "optional": true,
        }))
        .unwrap();

        let mut ctx = Context::new();
        step.execute(&executor(), &mut ctx).await.unwrap();
        assert_eq!(ctx.get("blob").unwrap().as_str().unwrap(), "");
    }
}
