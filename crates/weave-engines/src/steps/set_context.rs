use async_trait::async_trait;
use log::info;
use serde_json::Value;
use weave_core::{template, Context, RecipeError, RecipeResult};

use crate::executor::Executor;
use crate::registry::Step;

#[derive(Clone, Copy, PartialEq)]
enum IfExists {
    Overwrite,
    Merge,
}

pub struct SetContextStep {
    key: String,
    value: Value,
    nested_render: bool,
    if_exists: IfExists,
}

impl SetContextStep {
    pub fn from_config(config: &Value) -> RecipeResult<Self> {
        let key = config
            .get("key")
            .and_then(Value::as_str)
            .ok_or_else(|| RecipeError::Config("set_context requires 'key'".into()))?
            .to_string();
        let value = config
            .get("value")
            .cloned()
            .ok_or_else(|| RecipeError::Config("set_context requires 'value'".into()))?;
        let nested_render = config
            .get("nested_render")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let if_exists = match config.get("if_exists").and_then(Value::as_str).unwrap_or("overwrite") {
            "overwrite" => IfExists::Overwrite,
            "merge" => IfExists::Merge,
            other => {
                return Err(RecipeError::Config(format!(
                    "set_context: unknown if_exists strategy '{other}'"
                )))
            }
        };
        Ok(Self {
            key,
            value,
            nested_render,
            if_exists,
        })
    }

    fn render_value(&self, raw: &Value, globals: &template::Globals) -> RecipeResult<Value> {
        match raw {
            Value::String(s) => {
                let rendered = if self.nested_render {
                    template::render_nested(s, globals)?
                } else {
                    template::render(s, globals)?
                };
                Ok(Value::String(rendered))
            }
            Value::Array(items) => {
                let rendered = items
                    .iter()
                    .map(|v| self.render_value(v, globals))
                    .collect::<RecipeResult<Vec<_>>>()?;
                Ok(Value::Array(rendered))
            }
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), self.render_value(v, globals)?);
                }
                Ok(Value::Object(out))
            }
            other => Ok(other.clone()),
        }
    }

    fn merge(old: Value, new: Value) -> Value {
        match (old, new) {
            (Value::String(a), Value::String(b)) => Value::String(a + &b),
            (Value::Array(mut a), Value::Array(b)) => {
                a.extend(b);
                Value::Array(a)
            }
            (Value::Array(mut a), other) => {
                a.push(other);
                Value::Array(a)
            }
            (Value::Object(mut a), Value::Object(b)) => {
                for (k, v) in b {
                    a.insert(k, v);
                }
                Value::Object(a)
            }
            (old, new) => Value::Array(vec![old, new]),
        }
    }
}

#[async_trait]
impl Step for SetContextStep {
    async fn execute(&self, _executor: &Executor, context: &mut Context) -> RecipeResult<()> {
        let globals = template::globals_from_map(context.iter());
        let existed = context.contains(&self.key);
        let rendered = self.render_value(&self.value, &globals)?;

        let final_value = match self.if_exists {
            IfExists::Overwrite => rendered,
            IfExists::Merge => {
                if existed {
                    let old = context.require(&self.key)?.clone();
                    Self::merge(old, rendered)
                } else {
                    rendered
                }
            }
        };

        context.set(self.key.clone(), final_value);
        info!(
            "set_context: key='{}' strategy={} existed={existed}",
            self.key,
            match self.if_exists {
                IfExists::Overwrite => "overwrite",
                IfExists::Merge => "merge",
            }
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mk(config: Value) -> SetContextStep {
        SetContextStep::from_config(&config).unwrap()
    }

    #[tokio::test]
    async fn merge_string_concatenates() {
        let mut ctx = Context::new();
        ctx.set("tags", json!("a"));
        let executor = Executor::new(std::sync::Arc::new(crate::llm::ProviderRegistry::new()));
        let step = mk(json!({"key": "tags", "value": "b", "if_exists": "merge"}));
        step.execute(&executor, &mut ctx).await.unwrap();
        assert_eq!(ctx.get("tags"), Some(&json!("ab")));
    }

    #[tokio::test]
    async fn merge_list_concatenates() {
        let mut ctx = Context::new();
        ctx.set("tags", json!(["a", "b"]));
        let executor = Executor::new(std::sync::Arc::new(crate::llm::ProviderRegistry::new()));
        let step = mk(json!({"key": "tags", "value": ["c"], "if_exists": "merge"}));
        step.execute(&executor, &mut ctx).await.unwrap();
        assert_eq!(ctx.get("tags"), Some(&json!(["a", "b", "c"])));
    }

    #[tokio::test]
    async fn overwrite_replaces_existing() {
        let mut ctx = Context::new();
        ctx.set("x", json!("old"));
        let executor = Executor::new(std::sync::Arc::new(crate::llm::ProviderRegistry::new()));
        let step = mk(json!({"key": "x", "value": "new"}));
        step.execute(&executor, &mut ctx).await.unwrap();
        assert_eq!(ctx.get("x"), Some(&json!("new")));
    }
}
