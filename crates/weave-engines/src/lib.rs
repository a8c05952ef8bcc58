//! The Step Registry/Contract, the Executor, every leaf and control-flow
//! step, and the LLM Dispatch Facade — built on top of `weave-core`'s
//! Context, Recipe model, and template renderer.

pub mod executor;
pub mod llm;
pub mod registry;
pub mod steps;

pub use executor::Executor;
pub use registry::{build_step, is_registered, register_step, Step, StepFactory};
