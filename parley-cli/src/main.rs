use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::config::ConfigLoader;

mod commands;
mod config;
mod runtime;

#[derive(Parser)]
#[command(name = "parley", about = "Chat with LLM providers from the terminal")]
#[command(version, propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Read this config file instead of the user and project layers
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a message, optionally continuing a saved session
    Chat(commands::chat::ChatArgs),
    /// List registered providers
    Providers(commands::providers::ProvidersArgs),
    /// Inspect API keys found in the environment
    Keys(commands::keys::KeysArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_path(path)?,
        None => ConfigLoader::load()?,
    };

    match cli.command {
        Commands::Chat(args) => commands::chat::run(args, config).await,
        Commands::Providers(args) => commands::providers::run(args, config),
        Commands::Keys(args) => commands::keys::run(args, config),
    }
}
