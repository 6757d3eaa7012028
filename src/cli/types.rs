//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::cli::commands::agents::AgentArgs;
use crate::cli::commands::init::InitArgs;
use crate::cli::commands::serve::ServeArgs;

#[derive(Parser, Debug)]
#[command(name = "triai")]
#[command(about = "TriAI - multi-agent broker over a shared SQL store", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file merged over .triai/config.yaml and .triai/local.yaml
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the schema and seed the configured agents and grants
    Init(InitArgs),

    /// Run the broker (REST + agent WebSocket)
    Serve(ServeArgs),

    /// Agent registry and workers
    Agents(AgentArgs),
}
