use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::task::JoinSet;
use tokio::time::sleep;
use weave_core::{Context, RecipeError, RecipeResult, StepDef};

use crate::executor::Executor;
use crate::registry::Step;

/// Fans out independent sub-steps, each against its own clone of the parent
/// Context so sibling sub-steps never see each other's writes. Unlike
/// `loop`, each sub-step has its own config in the recipe rather than a body
/// replicated per item, and there is no result aggregation: the parent
/// Context is left untouched by the sub-steps.
pub struct ParallelStep {
    substeps: Vec<StepDef>,
    max_concurrency: usize,
    delay: Duration,
    fail_fast: bool,
}

impl ParallelStep {
    pub fn from_config(config: &Value) -> RecipeResult<Self> {
        let substeps: Vec<StepDef> = config
            .get("substeps")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| RecipeError::Config(format!("parallel: invalid 'substeps': {e}")))?
            .ok_or_else(|| RecipeError::Config("parallel requires 'substeps'".into()))?;
        // Unlike `loop`, the default here is unbounded, not sequential.
        let max_concurrency = config
            .get("max_concurrency")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize;
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
            substeps,
            max_concurrency,
            delay,
            fail_fast,
        })
    }
}

type SubstepOutcome = (usize, RecipeResult<()>);

#[async_trait]
impl Step for ParallelStep {
    async fn execute(&self, executor: &Executor, context: &mut Context) -> RecipeResult<()> {
        if self.substeps.is_empty() {
            return Ok(());
        }

        let cap = if self.max_concurrency == 0 {
            self.substeps.len()
        } else {
            self.max_concurrency
        };

        let mut join_set: JoinSet<SubstepOutcome> = JoinSet::new();
        let mut first_error: Option<RecipeError> = None;
        let mut cancelled = false;
        let mut last_launch: Option<Instant> = None;
        let mut next_index = 0usize;

        'spawn: loop {
            while join_set.len() >= cap {
                match join_set.join_next().await {
                    Some(outcome) => {
                        if let Some(e) = record_failure(outcome, self.fail_fast) {
                            first_error.get_or_insert(e);
                            cancelled = true;
                            break 'spawn;
                        }
                    }
                    None => break,
                }
            }

            if next_index >= self.substeps.len() {
                break;
            }

            if let Some(last) = last_launch {
                if self.delay > Duration::ZERO {
                    let elapsed = last.elapsed();
                    if elapsed < self.delay {
                        sleep(self.delay - elapsed).await;
                    }
                }
            }
            last_launch = Some(Instant::now());

            let index = next_index;
            next_index += 1;

            let executor = executor.clone();
            let step_def = self.substeps[index].clone();
            let mut branch_context = context.clone_deep();

            join_set.spawn(async move {
                let result = executor
                    .execute_step(&step_def, index, "<parallel>", &mut branch_context)
                    .await;
                (index, result)
            });
        }

        if cancelled {
            join_set.abort_all();
            while join_set.join_next().await.is_some() {}
            return Err(first_error.expect("cancelled implies a first error"));
        }

        while let Some(outcome) = join_set.join_next().await {
            if let Some(e) = record_failure(outcome, self.fail_fast) {
                join_set.abort_all();
                while join_set.join_next().await.is_some() {}
                return Err(e);
            }
        }

        Ok(())
    }
}

/// Returns `Some(error)` when this outcome should cause the whole step to
/// fail: either a substep failure under `fail_fast=true` (already wrapped as
/// a step-error by `execute_step`), or a task panic, which always fails the
/// step regardless of `fail_fast`.
fn record_failure(outcome: Result<SubstepOutcome, tokio::task::JoinError>, fail_fast: bool) -> Option<RecipeError> {
    match outcome {
        Ok((_, Ok(()))) => None,
        Ok((_, Err(e))) => {
            if fail_fast {
                Some(e)
            } else {
                None
            }
        }
        Err(join_err) if join_err.is_cancelled() => None,
        Err(join_err) => Some(RecipeError::Config(format!("parallel substep panicked: {join_err}"))),
    }
}
