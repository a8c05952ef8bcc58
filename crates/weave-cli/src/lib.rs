//! Command-line entry point: argument parsing, Context assembly from
//! `--context`/`--config`, and dispatch into `weave-engines`.

pub mod args;
pub mod cli;

pub use cli::run;
