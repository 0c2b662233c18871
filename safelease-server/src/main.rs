#![cfg_attr(not(test), forbid(unsafe_code))]

//! Entry point for the SafeLease chat server binary.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use shared::config::server::Config;

#[derive(Debug, Parser)]
#[command(name = "safelease-server")]
#[command(about = "SafeLease realtime chat server", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the chat server
    Serve {
        /// Port to bind, overriding configuration and environment
        #[arg(long, short)]
        port: Option<u16>,

        /// Configuration file (`.yaml`, `.yml`, `.json`, or `.toml`)
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
}

async fn handle_serve_command(port: Option<u16>, config: Option<PathBuf>) -> anyhow::Result<()> {
    let resolved = Config::load_config(config, port).context("failed to load configuration")?;
    server::server::run(resolved).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    match Cli::parse().command {
        Commands::Serve { port, config } => handle_serve_command(port, config).await,
    }
}
