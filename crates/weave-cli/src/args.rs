use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "weave", version, about = "Runs declarative, step-based automation recipes")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Loads and executes a recipe file against a fresh Context
    Run(RunArgs),
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to a JSON or YAML recipe file
    pub recipe_path: String,

    /// Seeds a Context artifact before execution (repeatable). The value is
    /// parsed as JSON when possible, falling back to a raw string.
    #[arg(long = "context", value_name = "KEY=VALUE")]
    pub context: Vec<String>,

    /// JSON/YAML file merged into Context.config() before env_mask overrides
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<String>,

    /// Raises log verbosity: unset is warn, -v is info, -vv is debug
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,
}
