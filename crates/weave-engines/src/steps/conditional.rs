use async_trait::async_trait;
use serde_json::Value;
use weave_core::{template, Context, RecipeError, RecipeResult, StepDef};

use super::conditional_eval::evaluate_condition;
use crate::executor::Executor;
use crate::registry::Step;

pub struct ConditionalStep {
    condition: String,
    if_true: Vec<StepDef>,
    if_false: Vec<StepDef>,
}

impl ConditionalStep {
    pub fn from_config(config: &Value) -> RecipeResult<Self> {
        let condition = config
            .get("condition")
            .and_then(Value::as_str)
            .ok_or_else(|| RecipeError::Config("conditional requires 'condition'".into()))?
            .to_string();
        let if_true = parse_branch(config.get("if_true"))?;
        let if_false = parse_branch(config.get("if_false"))?;
        Ok(Self {
            condition,
            if_true,
            if_false,
        })
    }
}

fn parse_branch(branch: Option<&Value>) -> RecipeResult<Vec<StepDef>> {
    let Some(branch) = branch else {
        return Ok(Vec::new());
    };
    let steps = branch
        .get("steps")
        .cloned()
        .unwrap_or(Value::Array(Vec::new()));
    serde_json::from_value(steps)
        .map_err(|e| RecipeError::Config(format!("conditional: invalid branch steps: {e}")))
}

#[async_trait]
impl Step for ConditionalStep {
    async fn execute(&self, executor: &Executor, context: &mut Context) -> RecipeResult<()> {
        let globals = template::globals_from_map(context.iter());
        let rendered = template::render(&self.condition, &globals)?;
        let truthy = evaluate_condition(&rendered)?;

        // The unselected branch's steps are never constructed, only the
        // selected one re-enters the executor.
        let branch = if truthy { &self.if_true } else { &self.if_false };
        executor
            .execute_steps(branch, "<conditional branch>", context)
            .await
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
    async fn true_branch_runs_and_false_branch_is_skipped() {
        let step = ConditionalStep::from_config(&json!({
            "condition": "{{x}} == 7",
            "if_true": {"steps": [{"type": "set_context", "config": {"key": "y", "value": "yes"}}]},
            "if_false": {"steps": [{"type": "set_context", "config": {"key": "y", "value": "no"}}]},
        }))
        .unwrap();

        let mut ctx = Context::new();
        ctx.set("x", json!(7));
        step.execute(&executor(), &mut ctx).await.unwrap();
        assert_eq!(ctx.get("y"), Some(&json!("yes")));
    }

    #[tokio::test]
    async fn false_branch_runs_when_condition_false() {
        let step = ConditionalStep::from_config(&json!({
            "condition": "{{x}} == 7",
            "if_true": {"steps": [{"type": "set_context", "config": {"key": "y", "value": "yes"}}]},
            "if_false": {"steps": [{"type": "set_context", "config": {"key": "y", "value": "no"}}]},
        }))
        .unwrap();

        let mut ctx = Context::new();
        ctx.set("x", json!(1));
        step.execute(&executor(), &mut ctx).await.unwrap();
        assert_eq!(ctx.get("y"), Some(&json!("no")));
    }

    #[tokio::test]
    async fn missing_branch_is_a_no_op() {
        let step = ConditionalStep::from_config(&json!({"condition": "false"})).unwrap();
        let mut ctx = Context::new();
        step.execute(&executor(), &mut ctx).await.unwrap();
        assert_eq!(ctx.len(), 0);
    }
}
