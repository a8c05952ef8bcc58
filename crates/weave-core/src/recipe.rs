use std::path::Path;

use jsonschema::{Draft, JSONSchema};
use once_cell::sync::Lazy;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RecipeError, RecipeResult};

/// One step definition: a type name and an opaque config blob handed to
/// whatever step factory is registered under that type.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StepDef {
    #[serde(rename = "type")]
    pub step_type: String,
    #[serde(default)]
    pub config: Value,
}

/// A validated recipe: an ordered list of steps plus an optional list of
/// environment variable names to surface into `Context.config()` at load
/// time.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Recipe {
    pub steps: Vec<StepDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_mask: Option<Vec<String>>,
}

/// `{path, content}`, produced by `llm_generate(output_format="files")` and
/// consumed by `write_files`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct FileSpec {
    pub path: String,
    pub content: String,
}

static RECIPE_SCHEMA: Lazy<JSONSchema> = Lazy::new(|| {
    let schema = schemars::schema_for!(Recipe);
    let schema_value =
        serde_json::to_value(&schema).expect("Recipe JSON schema must serialize");
    JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(&schema_value)
        .expect("Recipe JSON schema must compile")
});

fn validate_against_schema(value: &Value) -> RecipeResult<()> {
    RECIPE_SCHEMA.validate(value).map_err(|errors| {
        let joined = errors.map(|e| e.to_string()).collect::<Vec<_>>().join("; ");
        RecipeError::Validation(joined)
    })
}

/// Any of the shapes the executor's caller may hand it: a file path, a raw
/// JSON/YAML string, an already-parsed value, or a pre-built `Recipe`.
pub enum RecipeSource {
    Path(String),
    Text(String),
    Value(Value),
    Recipe(Recipe),
}

impl From<&str> for RecipeSource {
    fn from(s: &str) -> Self {
        RecipeSource::Text(s.to_string())
    }
}

impl From<String> for RecipeSource {
    fn from(s: String) -> Self {
        RecipeSource::Text(s)
    }
}

impl From<Recipe> for RecipeSource {
    fn from(r: Recipe) -> Self {
        RecipeSource::Recipe(r)
    }
}

impl Recipe {
    /// Loads and validates a recipe from any of the accepted input shapes.
    /// JSON is tried before YAML for text/file inputs, matching the external
    /// interface's "JSON (primary) or YAML" ordering.
    pub fn load(source: RecipeSource) -> RecipeResult<Recipe> {
        match source {
            RecipeSource::Recipe(r) => Ok(r),
            RecipeSource::Value(v) => Self::from_value(v),
            RecipeSource::Text(text) => {
                if Path::new(&text).is_file() {
                    Self::load_file(&text)
                } else {
                    Self::parse_text(&text, &text)
                }
            }
            RecipeSource::Path(path) => Self::load_file(&path),
        }
    }

    fn load_file(path: &str) -> RecipeResult<Recipe> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RecipeError::MissingRecipe(format!("{path}: {e}")))?;
        Self::parse_text(&content, path)
    }

    fn parse_text(content: &str, source: &str) -> RecipeResult<Recipe> {
        let value = serde_json::from_str::<Value>(content)
            .or_else(|_| serde_yaml::from_str::<Value>(content))
            .map_err(|e| RecipeError::Parse(format!("{source}: {e}")))?;
        Self::from_value(value)
    }

    fn from_value(value: Value) -> RecipeResult<Recipe> {
        validate_against_schema(&value)?;
        serde_json::from_value(value).map_err(|e| RecipeError::Validation(e.to_string()))
    }
}
