use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::warn;
use serde_json::{json, Value};
use tokio::task::JoinSet;
use tokio::time::sleep;
use weave_core::{template, Context, RecipeError, RecipeResult, StepDef};

use crate::executor::Executor;
use crate::registry::Step;

enum Position {
    Index(usize),
    Key(String),
}

enum ItemsInput {
    List(Vec<Value>),
    Map(Vec<(String, Value)>),
}

/// Iterates `items` (list or map), cloning the Context per iteration and
/// running `substeps` against the clone with bounded concurrency, staggered
/// launch, and a fail-fast policy. See `parallel` for the sibling
/// fan-out-of-distinct-substeps variant.
pub struct LoopStep {
    items_spec: Value,
    item_key: String,
    substeps: Vec<StepDef>,
    result_key: String,
    max_concurrency: usize,
    delay: Duration,
    fail_fast: bool,
}

impl LoopStep {
    pub fn from_config(config: &Value) -> RecipeResult<Self> {
        let items_spec = config
            .get("items")
            .cloned()
            .ok_or_else(|| RecipeError::Config("loop requires 'items'".into()))?;
        let item_key = config
            .get("item_key")
            .and_then(Value::as_str)
            .ok_or_else(|| RecipeError::Config("loop requires 'item_key'".into()))?
            .to_string();
        let substeps: Vec<StepDef> = config
            .get("substeps")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| RecipeError::Config(format!("loop: invalid 'substeps': {e}")))?
            .ok_or_else(|| RecipeError::Config("loop requires 'substeps'".into()))?;
        let result_key = config
            .get("result_key")
            .and_then(Value::as_str)
            .ok_or_else(|| RecipeError::Config("loop requires 'result_key'".into()))?
            .to_string();
        let max_concurrency = config
            .get("max_concurrency")
            .and_then(Value::as_u64)
            .unwrap_or(1) as usize;
        let delay = config
            .get("delay")
            .and_then(Value::as_f64)
            .map(Duration::from_secs_f64)
            .unwrap_or(Duration::ZERO);
        let fail_fast = config
            .get("fail_fast")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        Ok(Self {
            items_spec,
            item_key,
            substeps,
            result_key,
            max_concurrency,
            delay,
            fail_fast,
        })
    }

    fn resolve_items(&self, context: &Context) -> RecipeResult<ItemsInput> {
        match &self.items_spec {
            Value::String(path_template) => {
                let globals = template::globals_from_map(context.iter());
                let rendered = template::render(path_template, &globals)?;
                let resolved = resolve_dotted_path(context, &rendered).ok_or_else(|| {
                    RecipeError::LoopInput(format!(
                        "loop: items path '{rendered}' not found in context"
                    ))
                })?;
                value_to_items(resolved)
            }
            Value::Array(items) => Ok(ItemsInput::List(items.clone())),
            Value::Object(map) => {
                Ok(ItemsInput::Map(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()))
            }
            other => Err(RecipeError::LoopInput(format!(
                "loop: 'items' must be a string path, list, or map, got {other}"
            ))),
        }
    }
}

fn value_to_items(value: Value) -> RecipeResult<ItemsInput> {
    match value {
        Value::Array(items) => Ok(ItemsInput::List(items)),
        Value::Object(map) => Ok(ItemsInput::Map(map.into_iter().collect())),
        other => Err(RecipeError::LoopInput(format!(
            "loop: resolved 'items' must be a list or map, got {other}"
        ))),
    }
}

fn resolve_dotted_path(context: &Context, path: &str) -> Option<Value> {
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut current = context.get(first)?.clone();
    for part in parts {
        current = match &current {
            Value::Object(map) => map.get(part)?.clone(),
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?.clone(),
            _ => return None,
        };
    }
    Some(current)
}

type IterationOutcome = (Position, RecipeResult<Value>);

#[async_trait]
impl Step for LoopStep {
    async fn execute(&self, executor: &Executor, context: &mut Context) -> RecipeResult<()> {
        let (positions, is_map_input): (Vec<(Position, Value)>, bool) =
            match self.resolve_items(context)? {
                ItemsInput::List(items) => (
                    items
                        .into_iter()
                        .enumerate()
                        .map(|(i, v)| (Position::Index(i), v))
                        .collect(),
                    false,
                ),
                ItemsInput::Map(entries) => (
                    entries
                        .into_iter()
                        .map(|(k, v)| (Position::Key(k), v))
                        .collect(),
                    true,
                ),
            };

        if positions.is_empty() {
            context.set(
                self.result_key.clone(),
                if is_map_input { json!({}) } else { json!([]) },
            );
            return Ok(());
        }

        let cap = if self.max_concurrency == 0 {
            positions.len().max(1)
        } else {
            self.max_concurrency
        };

        let mut join_set: JoinSet<IterationOutcome> = JoinSet::new();
        let mut list_results: Vec<Option<Value>> = vec![None; positions.len()];
        let mut map_results: Vec<(String, Value)> = Vec::new();
        let mut errors: Vec<Value> = Vec::new();
        let mut first_error: Option<RecipeError> = None;
        let mut cancelled = false;
        let mut last_launch: Option<Instant> = None;

        let mut pending = positions.into_iter();

        'spawn: loop {
            while join_set.len() >= cap {
                match join_set.join_next().await {
                    Some(outcome) => {
                        handle_outcome(
                            outcome,
                            &mut list_results,
                            &mut map_results,
                            &mut errors,
                            &mut first_error,
                            self.fail_fast,
                        );
                        if self.fail_fast && first_error.is_some() {
                            cancelled = true;
                            break 'spawn;
                        }
                    }
                    None => break,
                }
            }

            let Some((position, item_value)) = pending.next() else {
                break;
            };

            if let Some(last) = last_launch {
                if self.delay > Duration::ZERO {
                    let elapsed = last.elapsed();
                    if elapsed < self.delay {
                        sleep(self.delay - elapsed).await;
                    }
                }
            }
            last_launch = Some(Instant::now());

            let mut iter_context = context.clone_deep();
            iter_context.set(self.item_key.clone(), item_value);
            match &position {
                Position::Index(i) => iter_context.set("__index", json!(i)),
                Position::Key(k) => iter_context.set("__key", json!(k)),
            }

            let executor = executor.clone();
            let substeps = self.substeps.clone();
            let item_key = self.item_key.clone();

            join_set.spawn(async move {
                let mut iter_context = iter_context;
                let result = executor
                    .execute_steps(&substeps, "<loop iteration>", &mut iter_context)
                    .await
                    .map(|()| iter_context.get(&item_key).cloned().unwrap_or(Value::Null));
                (position, result)
            });
        }

        if cancelled {
            join_set.abort_all();
            while join_set.join_next().await.is_some() {}
            return Err(first_error.expect("cancelled implies a first error"));
        }

        while let Some(outcome) = join_set.join_next().await {
            handle_outcome(
                outcome,
                &mut list_results,
                &mut map_results,
                &mut errors,
                &mut first_error,
                self.fail_fast,
            );
            if self.fail_fast && first_error.is_some() {
                join_set.abort_all();
                while join_set.join_next().await.is_some() {}
                return Err(first_error.expect("fail_fast implies a first error"));
            }
        }

        let result = if is_map_input {
            Value::Object(map_results.into_iter().collect())
        } else {
            Value::Array(list_results.into_iter().flatten().collect())
        };
        context.set(self.result_key.clone(), result);

        if !self.fail_fast {
            context.set(format!("{}__errors", self.result_key), Value::Array(errors));
        } else if !errors.is_empty() {
            warn!("loop: fail_fast=true but errors were recorded without cancellation; this should not happen");
        }

        Ok(())
    }
}

fn handle_outcome(
    outcome: Result<IterationOutcome, tokio::task::JoinError>,
    list_results: &mut [Option<Value>],
    map_results: &mut Vec<(String, Value)>,
    errors: &mut Vec<Value>,
    first_error: &mut Option<RecipeError>,
    fail_fast: bool,
) {
    let (position, result) = match outcome {
        Ok(pair) => pair,
        Err(join_err) if join_err.is_cancelled() => return,
        // A panic inside an iteration surfaces as a loop-error cause, with
        // no position to index into the result list.
        Err(join_err) => {
            errors.push(json!({"error": join_err.to_string()}));
            if fail_fast && first_error.is_none() {
                *first_error = Some(RecipeError::Loop(join_err.to_string()));
            }
            return;
        }
    };

    match result {
        Ok(value) => match position {
            Position::Index(i) if i < list_results.len() => list_results[i] = Some(value),
            Position::Index(_) => {}
            Position::Key(k) => map_results.push((k, value)),
        },
        Err(e) => {
            let label = match &position {
                Position::Index(i) => json!({"index": i, "error": e.to_string()}),
                Position::Key(k) => json!({"key": k, "error": e.to_string()}),
            };
            errors.push(label);
            if fail_fast && first_error.is_none() {
                *first_error = Some(RecipeError::Loop(e.to_string()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn executor() -> Executor {
        Executor::new(std::sync::Arc::new(crate::llm::ProviderRegistry::new()))
    }

    #[tokio::test]
    async fn scenario_1_text_fan_out_preserves_order() {
        let step = LoopStep::from_config(&json!({
            "items": "names",
            "item_key": "n",
            "result_key": "greetings",
            "max_concurrency": 3,
            "substeps": [
                {"type": "set_context", "config": {"key": "n", "value": "Hello, {{n}}!"}}
            ],
        }))
        .unwrap();

        let mut ctx = Context::new();
        ctx.set("names", json!(["a", "b", "c"]));
        step.execute(&executor(), &mut ctx).await.unwrap();

        assert_eq!(
            ctx.get("greetings"),
            Some(&json!(["Hello, a!", "Hello, b!", "Hello, c!"]))
        );
    }

    #[tokio::test]
    async fn empty_list_input_yields_empty_list() {
        let step = LoopStep::from_config(&json!({
            "items": "names",
            "item_key": "n",
            "result_key": "out",
            "substeps": [],
        }))
        .unwrap();
        let mut ctx = Context::new();
        ctx.set("names", json!([]));
        step.execute(&executor(), &mut ctx).await.unwrap();
        assert_eq!(ctx.get("out"), Some(&json!([])));
    }

    #[tokio::test]
    async fn map_input_produces_map_keyed_by_original_key() {
        let step = LoopStep::from_config(&json!({
            "items": {"a": 1, "b": 2},
            "item_key": "n",
            "result_key": "out",
            "substeps": [
                {"type": "set_context", "config": {"key": "n", "value": "{{ __key }}={{ n }}"}}
            ],
        }))
        .unwrap();
        let mut ctx = Context::new();
        step.execute(&executor(), &mut ctx).await.unwrap();
        let out = ctx.get("out").unwrap().as_object().unwrap();
        assert_eq!(out.get("a").unwrap(), "a=1");
        assert_eq!(out.get("b").unwrap(), "b=2");
    }

    #[tokio::test]
    async fn fail_fast_true_fails_the_step_and_does_not_write_result() {
        let step = LoopStep::from_config(&json!({
            "items": [1, 2, 3, 4, 5],
            "item_key": "n",
            "result_key": "out",
            "max_concurrency": 2,
            "fail_fast": true,
            "substeps": [
                {"type": "conditional", "config": {
                    "condition": "{{n}} == 3",
                    "if_true": {"steps": [{"type": "shell", "config": {"command": "exit 1"}}]}
                }}
            ],
        }))
        .unwrap();
        let mut ctx = Context::new();
        let err = step.execute(&executor(), &mut ctx).await.unwrap_err();
        assert_eq!(err.kind(), "loop-error");
        assert_eq!(ctx.get("out"), None);
    }

    #[tokio::test]
    async fn fail_fast_false_collects_partial_results_and_errors() {
        let step = LoopStep::from_config(&json!({
            "items": {"a": 1, "b": 2, "c": 3},
            "item_key": "n",
            "result_key": "out",
            "fail_fast": false,
            "substeps": [
                {"type": "conditional", "config": {
                    "condition": "{{n}} == 2",
                    "if_true": {"steps": [{"type": "shell", "config": {"command": "exit 1"}}]}
                }}
            ],
        }))
        .unwrap();
        let mut ctx = Context::new();
        step.execute(&executor(), &mut ctx).await.unwrap();

        let out = ctx.get("out").unwrap().as_object().unwrap();
        assert_eq!(out.len(), 2);
        let errors = ctx.get("out__errors").unwrap().as_array().unwrap();
        assert_eq!(errors.len(), 1);
    }

    #[tokio::test]
    async fn sequential_delay_imposes_a_wall_clock_floor() {
        let step = LoopStep::from_config(&json!({
            "items": [1, 2, 3],
            "item_key": "n",
            "result_key": "out",
            "max_concurrency": 1,
            "delay": 0.05,
            "substeps": [],
        }))
        .unwrap();
        let mut ctx = Context::new();
        let start = Instant::now();
        step.execute(&executor(), &mut ctx).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs_f64(0.1));
    }
}
