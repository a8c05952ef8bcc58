use std::sync::Arc;

use weave_core::config::apply_env_mask;
use weave_core::error::StepError;
use weave_core::{Context, Recipe, RecipeResult, RecipeSource, StepDef};

use crate::llm::ProviderRegistry;
use crate::registry::build_step;
use crate::steps::{register_builtin_steps, McpClient, NullMcpClient};

/// Loads, validates, and dispatches recipes step by step against a shared
/// Context. Stateless between calls: all state lives in the Context, so
/// sub-recipe invocation is ordinary recursion through [`Executor::execute`]
/// and its relatives.
#[derive(Clone)]
pub struct Executor {
    providers: Arc<ProviderRegistry>,
    mcp_client: Arc<dyn McpClient>,
}

impl Executor {
    pub fn new(providers: Arc<ProviderRegistry>) -> Self {
        register_builtin_steps();
        Self {
            providers,
            mcp_client: Arc::new(NullMcpClient),
        }
    }

    /// Swaps in a concrete MCP transport. Without this, `mcp` steps fail
    /// predictably via [`NullMcpClient`] rather than not compiling.
    pub fn with_mcp_client(mut self, client: Arc<dyn McpClient>) -> Self {
        self.mcp_client = client;
        self
    }

    pub fn providers(&self) -> &Arc<ProviderRegistry> {
        &self.providers
    }

    pub fn mcp_client(&self) -> &Arc<dyn McpClient> {
        &self.mcp_client
    }

    /// Loads `source` into a Recipe, surfaces its `env_mask` into the
    /// Context's config, and executes its steps in order.
    pub async fn execute(&self, source: RecipeSource, context: &mut Context) -> RecipeResult<()> {
        let label = source_label(&source);
        let recipe = Recipe::load(source)?;

        let mut config = context.config().clone();
        apply_env_mask(&mut config, recipe.env_mask.as_deref());
        context.set_config(config);

        self.execute_recipe(&recipe, &label, context).await
    }

    /// Executes an already-loaded Recipe's steps, labeling any failure with
    /// `recipe_source` for the step-error chain.
    pub async fn execute_recipe(
        &self,
        recipe: &Recipe,
        recipe_source: &str,
        context: &mut Context,
    ) -> RecipeResult<()> {
        self.execute_steps(&recipe.steps, recipe_source, context).await
    }

    /// Executes a bare step list (a `loop` substep body, a `conditional`
    /// branch, a `parallel` substep list) as a nested recipe body sharing
    /// the caller's `recipe_source` label.
    pub async fn execute_steps(
        &self,
        steps: &[StepDef],
        recipe_source: &str,
        context: &mut Context,
    ) -> RecipeResult<()> {
        for (index, step_def) in steps.iter().enumerate() {
            self.execute_step(step_def, index, recipe_source, context).await?;
        }
        Ok(())
    }

    /// Constructs and runs a single step, wrapping any construction or
    /// execution failure as `step-error` with the enclosing recipe source,
    /// step index, and step type.
    pub async fn execute_step(
        &self,
        step_def: &StepDef,
        index: usize,
        recipe_source: &str,
        context: &mut Context,
    ) -> RecipeResult<()> {
        let step = build_step(&step_def.step_type, &step_def.config).map_err(|e| {
            StepError::new(recipe_source, index, step_def.step_type.clone(), e).into_recipe_error()
        })?;

        step.execute(self, context).await.map_err(|e| {
            StepError::new(recipe_source, index, step_def.step_type.clone(), e).into_recipe_error()
        })
    }
}

fn source_label(source: &RecipeSource) -> String {
    match source {
        RecipeSource::Path(p) => p.clone(),
        RecipeSource::Text(t) if t.len() < 80 => t.clone(),
        RecipeSource::Text(_) => "<inline recipe>".to_string(),
        RecipeSource::Value(_) => "<parsed recipe>".to_string(),
        RecipeSource::Recipe(_) => "<recipe>".to_string(),
    }
}
