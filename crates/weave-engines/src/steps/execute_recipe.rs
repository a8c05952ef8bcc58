use async_trait::async_trait;
use serde_json::Value;
use weave_core::{template, Context, RecipeError, RecipeResult, RecipeSource};

use crate::executor::Executor;
use crate::registry::Step;

pub struct ExecuteRecipeStep {
    recipe_path: String,
    context_overrides: Value,
}

impl ExecuteRecipeStep {
    pub fn from_config(config: &Value) -> RecipeResult<Self> {
        let recipe_path = config
            .get("recipe_path")
            .and_then(Value::as_str)
            .ok_or_else(|| RecipeError::Config("execute_recipe requires 'recipe_path'".into()))?
            .to_string();
        let context_overrides = config.get("context_overrides").cloned().unwrap_or(Value::Null);
        Ok(Self {
            recipe_path,
            context_overrides,
        })
    }

    /// Strings render, then get re-parsed as JSON when the rendered text is
    /// a JSON object/array (so overrides land as structured values, not
    /// strings); lists and maps are walked recursively.
    fn render_override(value: &Value, globals: &template::Globals) -> RecipeResult<Value> {
        match value {
            Value::String(s) => {
                let rendered = template::render(s, globals)?;
                match serde_json::from_str::<Value>(&rendered) {
                    Ok(parsed @ (Value::Object(_) | Value::Array(_))) => Ok(parsed),
                    _ => Ok(Value::String(rendered)),
                }
            }
            Value::Array(items) => Ok(Value::Array(
                items
                    .iter()
                    .map(|v| Self::render_override(v, globals))
                    .collect::<RecipeResult<Vec<_>>>()?,
            )),
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), Self::render_override(v, globals)?);
                }
                Ok(Value::Object(out))
            }
            other => Ok(other.clone()),
        }
    }
}

#[async_trait]
impl Step for ExecuteRecipeStep {
    async fn execute(&self, executor: &Executor, context: &mut Context) -> RecipeResult<()> {
        let globals = template::globals_from_map(context.iter());
        let recipe_path = template::render(&self.recipe_path, &globals)?;

        if !std::path::Path::new(&recipe_path).is_file() {
            return Err(RecipeError::MissingRecipe(recipe_path));
        }

        if let Value::Object(overrides) = &self.context_overrides {
            for (key, raw) in overrides {
                let rendered = Self::render_override(raw, &globals)?;
                context.set(key.clone(), rendered);
            }
        }

        // Same Context, no clone: overrides and the sub-recipe's writes are
        // visible to the caller after this step returns.
        executor.execute(RecipeSource::Path(recipe_path), context).await
    }
}
