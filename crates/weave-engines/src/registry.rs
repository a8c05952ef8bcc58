use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde_json::Value;
use weave_core::{Context, RecipeError, RecipeResult};

use crate::executor::Executor;

/// One step instance, constructed from its config for a single execution.
/// Steps are short-lived: the executor builds one per step per dispatch.
#[async_trait]
pub trait Step: Send + Sync {
    async fn execute(&self, executor: &Executor, context: &mut Context) -> RecipeResult<()>;
}

/// Builds a boxed [`Step`] from its raw config, validating shape up front so
/// construction failures surface as `config-error` before `execute` is ever
/// called.
pub type StepFactory = Arc<dyn Fn(&Value) -> RecipeResult<Box<dyn Step>> + Send + Sync>;

static REGISTRY: Lazy<RwLock<HashMap<String, StepFactory>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Registers (or replaces) the factory for `step_type`. Registration is
/// idempotent under the same name — a second call simply replaces the
/// factory, matching the step contract's registry semantics.
pub fn register_step(step_type: impl Into<String>, factory: StepFactory) {
    REGISTRY
        .write()
        .expect("step registry lock poisoned")
        .insert(step_type.into(), factory);
}

/// Builds a step instance for `step_type` from `config`. Fails with
/// `unknown-step` if nothing is registered under that name.
pub fn build_step(step_type: &str, config: &Value) -> RecipeResult<Box<dyn Step>> {
    let registry = REGISTRY.read().expect("step registry lock poisoned");
    let factory = registry
        .get(step_type)
        .ok_or_else(|| RecipeError::UnknownStep(step_type.to_string()))?
        .clone();
    drop(registry);
    factory(config)
}

pub fn is_registered(step_type: &str) -> bool {
    REGISTRY
        .read()
        .expect("step registry lock poisoned")
        .contains_key(step_type)
}
