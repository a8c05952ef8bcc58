//! Built-in step implementations and the one-time registration that wires
//! each step type's string name to its factory in the process-wide
//! registry.

mod conditional;
mod conditional_eval;
mod execute_recipe;
mod llm_generate;
mod loop_step;
mod mcp;
mod parallel;
mod read_files;
mod set_context;
mod shell;
mod write_files;

pub use conditional_eval::evaluate_condition;
pub use mcp::{McpClient, McpServerConfig, NullMcpClient};

use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde_json::Value;

use crate::registry::{register_step, Step};
use weave_core::RecipeResult;

static REGISTERED: OnceCell<()> = OnceCell::new();

/// Registers every built-in step type. Idempotent: safe to call once per
/// `Executor::new`, and cheap to call again (the underlying registry
/// replaces same-named entries, matching the step contract's semantics).
pub fn register_builtin_steps() {
    REGISTERED.get_or_init(|| {
        register_step(
            "read_files",
            factory(read_files::ReadFilesStep::from_config),
        );
        register_step(
            "write_files",
            factory(write_files::WriteFilesStep::from_config),
        );
        register_step(
            "set_context",
            factory(set_context::SetContextStep::from_config),
        );
        register_step("shell", factory(shell::ShellStep::from_config));
        register_step("mcp", factory(mcp::McpStep::from_config));
        register_step(
            "llm_generate",
            factory(llm_generate::LlmGenerateStep::from_config),
        );
        register_step(
            "execute_recipe",
            factory(execute_recipe::ExecuteRecipeStep::from_config),
        );
        register_step(
            "conditional",
            factory(conditional::ConditionalStep::from_config),
        );
        register_step("loop", factory(loop_step::LoopStep::from_config));
        register_step("parallel", factory(parallel::ParallelStep::from_config));
    });
}

/// Adapts a `fn(&Value) -> RecipeResult<S>` step constructor into the boxed
/// trait-object factory the registry stores.
fn factory<S, F>(f: F) -> Arc<dyn Fn(&Value) -> RecipeResult<Box<dyn Step>> + Send + Sync>
where
    S: Step + 'static,
    F: Fn(&Value) -> RecipeResult<S> + Send + Sync + 'static,
{
    Arc::new(move |config| f(config).map(|s| Box::new(s) as Box<dyn Step>))
}
