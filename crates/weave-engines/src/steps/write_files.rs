use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::debug;
use serde_json::Value;
use weave_core::{template, Context, FileSpec, RecipeError, RecipeResult};

use crate::executor::Executor;
use crate::registry::Step;

enum FilesSource {
    /// `files_key`: looks up a context artifact holding a list of FileSpec.
    ContextKey(String),
    /// `files`: an inline list of `{path, content}`, both fields rendered.
    Inline(Vec<FileSpec>),
}

pub struct WriteFilesStep {
    source: FilesSource,
    root: Option<String>,
}

impl WriteFilesStep {
    pub fn from_config(config: &Value) -> RecipeResult<Self> {
        let root = config
            .get("root")
            .and_then(Value::as_str)
            .map(|s| s.to_string());

        if let Some(key) = config.get("files_key").and_then(Value::as_str) {
            return Ok(Self {
                source: FilesSource::ContextKey(key.to_string()),
                root,
            });
        }

        if let Some(files) = config.get("files") {
            let specs: Vec<FileSpec> = serde_json::from_value(files.clone()).map_err(|e| {
                RecipeError::Config(format!(
                    "write_files: 'files' must be a list of {{path, content}}: {e}"
                ))
            })?;
            return Ok(Self {
                source: FilesSource::Inline(specs),
                root,
            });
        }

        Err(RecipeError::Config(
            "write_files requires 'files_key' or 'files'".into(),
        ))
    }

    fn resolve_files(&self, context: &Context, globals: &template::Globals) -> RecipeResult<Vec<FileSpec>> {
        match &self.source {
            FilesSource::ContextKey(key) => {
                let value = context.require(key)?;
                serde_json::from_value(value.clone()).map_err(|e| {
                    RecipeError::Config(format!(
                        "write_files: context key '{key}' is not a list of FileSpec: {e}"
                    ))
                })
            }
            FilesSource::Inline(specs) => specs
                .iter()
                .map(|spec| {
                    Ok(FileSpec {
                        path: template::render(&spec.path, globals)?,
                        content: template::render(&spec.content, globals)?,
                    })
                })
                .collect(),
        }
    }

    fn resolve_path(&self, path: &str, globals: &template::Globals) -> RecipeResult<PathBuf> {
        match &self.root {
            Some(root) => {
                let rendered_root = template::render(root, globals)?;
                Ok(Path::new(&rendered_root).join(path))
            }
            None => Ok(PathBuf::from(path)),
        }
    }
}

#[async_trait]
impl Step for WriteFilesStep {
    async fn execute(&self, _executor: &Executor, context: &mut Context) -> RecipeResult<()> {
        let globals = template::globals_from_map(context.iter());
        let files = self.resolve_files(context, &globals)?;

        for file in &files {
            let path = self.resolve_path(&file.path, &globals)?;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| RecipeError::Config(format!("write_files: {}: {e}", path.display())))?;
            }
            tokio::fs::write(&path, &file.content)
                .await
                .map_err(|e| RecipeError::Config(format!("write_files: {}: {e}", path.display())))?;
            debug!(
                "write_files: wrote {} ({} bytes)",
                path.display(),
                file.content.len()
            );
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
    async fn writes_inline_files_with_rendered_content() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("out.md");

        let step = WriteFilesStep::from_config(&json!({
            "files": [{"path": out.display().to_string(), "content": "hello {{name}}"}]
        }))
        .unwrap();

        let mut ctx = Context::new();
        ctx.set("name", json!("world"));
        step.execute(&executor(), &mut ctx).await.unwrap();

        assert_eq!(tokio::fs::read_to_string(&out).await.unwrap(), "hello world");
    }

    #[tokio::test]
    async fn writes_from_context_key_and_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a/b/c.md");

        let step = WriteFilesStep::from_config(&json!({"files_key": "specs"})).unwrap();

        let mut ctx = Context::new();
        ctx.set(
            "specs",
            json!([{"path": nested.display().to_string(), "content": "x"}]),
        );
        step.execute(&executor(), &mut ctx).await.unwrap();

        assert_eq!(tokio::fs::read_to_string(&nested).await.unwrap(), "x");
    }

    #[tokio::test]
    async fn root_prefixes_relative_paths() {
        let dir = tempdir().unwrap();
        let step = WriteFilesStep::from_config(&json!({
            "files": [{"path": "out.md", "content": "x"}],
            "root": dir.path().display().to_string(),
        }))
        .unwrap();

        let mut ctx = Context::new();
        step.execute(&executor(), &mut ctx).await.unwrap();
        assert_eq!(
            tokio::fs::read_to_string(dir.path().join("out.md")).await.unwrap(),
            "x"
        );
    }
}
