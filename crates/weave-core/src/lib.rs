//! Shared data model for recipe execution: the Context, the Recipe/StepDef
//! model, FileSpec, the error taxonomy, config surfacing, and the Liquid
//! template renderer. `weave-engines` builds the executor and steps on top
//! of this crate.

pub mod config;
pub mod context;
pub mod error;
pub mod recipe;
pub mod template;

pub use context::Context;
pub use error::{RecipeError, RecipeResult, StepError};
pub use recipe::{FileSpec, Recipe, RecipeSource, StepDef};
