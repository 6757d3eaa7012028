//! TriAI CLI entry point.

use anyhow::Context;
use clap::Parser;

use triai::cli::{commands, handle_error, Cli, Commands};
use triai::infrastructure::config::ConfigLoader;
use triai::infrastructure::logging::LoggerImpl;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match ConfigLoader::load(cli.config.as_deref()).context("Invalid configuration") {
        Ok(config) => config,
        Err(err) => handle_error(err, cli.json),
    };
    // Keep the guard alive so buffered file logs are flushed on exit.
    let _logger = match LoggerImpl::init(&config.logging) {
        Ok(logger) => logger,
        Err(err) => handle_error(err, cli.json),
    };

    let result = match cli.command {
        Commands::Init(args) => commands::init::execute(args, config, cli.json).await,
        Commands::Serve(args) => commands::serve::execute(args, config, cli.json).await,
        Commands::Agents(args) => commands::agents::execute(args, config, cli.json).await,
    };

    if let Err(err) = result {
        handle_error(err, cli.json);
    }
}
