use thiserror::Error;

/// One variant per error kind named by the recipe execution model. Every
/// fallible operation in `weave-core`/`weave-engines` ultimately returns one
/// of these, so a caller can match on `kind()` without parsing message text.
#[derive(Debug, Error)]
pub enum RecipeError {
    #[error("config error: {0}")]
    Config(String),

    #[error("unknown step type '{0}'")]
    UnknownStep(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("missing recipe: {0}")]
    MissingRecipe(String),

    #[error("missing file: {0}")]
    MissingFile(String),

    #[error("render error: {0}")]
    Render(String),

    #[error("condition error: {0}")]
    Condition(String),

    #[error("loop input error: {0}")]
    LoopInput(String),

    #[error("loop error: {0}")]
    Loop(String),

    #[error("llm error: {0}")]
    Llm(String),

    #[error("shell error: {0}")]
    Shell(String),

    #[error("mcp error: {0}")]
    Mcp(String),

    #[error(transparent)]
    Step(#[from] Box<StepError>),
}

impl RecipeError {
    /// Short machine-stable name for the error kind, matching the taxonomy
    /// in the execution model's error handling design.
    pub fn kind(&self) -> &'static str {
        match self {
            RecipeError::Config(_) => "config-error",
            RecipeError::UnknownStep(_) => "unknown-step",
            RecipeError::Parse(_) => "parse-error",
            RecipeError::Validation(_) => "validation-error",
            RecipeError::MissingRecipe(_) => "missing-recipe",
            RecipeError::MissingFile(_) => "missing-file",
            RecipeError::Render(_) => "render-error",
            RecipeError::Condition(_) => "condition-error",
            RecipeError::LoopInput(_) => "loop-input-error",
            RecipeError::Loop(_) => "loop-error",
            RecipeError::Llm(_) => "llm-error",
            RecipeError::Shell(_) => "shell-error",
            RecipeError::Mcp(_) => "mcp-error",
            RecipeError::Step(_) => "step-error",
        }
    }
}

/// Wraps an error raised by a specific step within a specific recipe, so the
/// full dispatch path survives up to the CLI boundary.
#[derive(Debug, Error)]
#[error("step {step_index} ('{step_type}') in {recipe_source}: {cause}")]
pub struct StepError {
    pub recipe_source: String,
    pub step_index: usize,
    pub step_type: String,
    #[source]
    pub cause: Box<RecipeError>,
}

impl StepError {
    pub fn new(
        recipe_source: impl Into<String>,
        step_index: usize,
        step_type: impl Into<String>,
        cause: RecipeError,
    ) -> Self {
        Self {
            recipe_source: recipe_source.into(),
            step_index,
            step_type: step_type.into(),
            cause: Box::new(cause),
        }
    }

    pub fn into_recipe_error(self) -> RecipeError {
        RecipeError::Step(Box::new(self))
    }
}

pub type RecipeResult<T> = Result<T, RecipeError>;
