//! Core CLI functionality: argument parsing, Context assembly, logging init,
//! and exit-code mapping.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::Parser;
use log::LevelFilter;
use serde_json::Value;
use weave_core::{config, Context, RecipeSource};
use weave_engines::llm::{OllamaProvider, ProviderRegistry};
use weave_engines::Executor;

use crate::args::{Cli, Commands, RunArgs};

/// Entry point shared by both binaries that wrap this crate: parses
/// arguments, loads `.env`, initializes logging, then dispatches to the
/// requested subcommand.
pub async fn run() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Run(args) => run_recipe(args).await,
    }
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

async fn run_recipe(args: &RunArgs) -> Result<()> {
    init_logging(args.verbose);

    let mut context = Context::new();

    for pair in &args.context {
        let (key, raw_value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("--context '{pair}' is not in key=value form"))?;
        let value = serde_json::from_str::<Value>(raw_value)
            .unwrap_or_else(|_| Value::String(raw_value.to_string()));
        context.set(key.to_string(), value);
    }

    // env_mask is applied once the recipe (and its env_mask list) is loaded,
    // inside Executor::execute; a --config file only seeds the starting map.
    let config_map = config::load_config_file(args.config.as_deref())?;
    context.set_config(config_map);

    let mut providers = ProviderRegistry::new();
    providers.register(Arc::new(OllamaProvider::new(
        std::env::var("OLLAMA_BASE_URL").unwrap_or_else(|_| "http://localhost:11434".to_string()),
    )));
    let executor = Executor::new(Arc::new(providers));

    executor
        .execute(RecipeSource::Path(args.recipe_path.clone()), &mut context)
        .await?;
    Ok(())
}
