//! Main entry point for the SafeLease command-line tools.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use dotenv::dotenv;
use server::server;
use shared::config::server::{Config, ConfigFormat, Profile};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::chat::ChatArgs;

/// SafeLease CLI
#[derive(Debug, Parser)]
#[command(name = "safelease")]
#[command(about = "Command-line tools for SafeLease realtime chat", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start the chat server
    Serve {
        /// Port to bind, overriding configuration and environment
        #[arg(long, short)]
        port: Option<u16>,

        /// Configuration file (`.yaml`, `.yml`, `.json`, or `.toml`)
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
    /// Chat with another user from the terminal
    Chat(ChatArgs),
    /// Mint a bearer token signed with the configured secret
    Token {
        /// User id to embed in the token
        #[arg(long, short)]
        user: String,

        /// Lifetime in minutes; negative values mint an expired token
        #[arg(long = "ttl", default_value_t = 60, allow_negative_numbers = true)]
        ttl_minutes: i64,

        /// Configuration file holding the signing secret
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
    /// Generate the OpenAPI specification
    Spec {
        /// Output path (format from the extension), or `json`/`yaml` to stream
        output_path: Option<String>,
    },
    /// Generate shell completion scripts
    Completion {
        /// Target shell
        #[arg(long, short, value_enum)]
        shell: Shell,
    },
    /// Print or write a configuration file with default values
    Config {
        /// yaml, json, or toml
        #[arg(long, short, default_value = "yaml")]
        format: ConfigFormat,

        /// dev, test, or prod
        #[arg(long, default_value = "dev")]
        profile: Profile,

        /// Write to this file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

/// Logs go to stderr so they never interleave with chat output.
fn initialize_client_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port, config } => {
            let resolved = Config::load_config(config, port).context("failed to load configuration")?;
            server::run(resolved).await?;
        }
        Commands::Chat(args) => {
            initialize_client_tracing();
            commands::chat::start_chat(args).await?;
        }
        Commands::Token {
            user,
            ttl_minutes,
            config,
        } => {
            println!("{}", commands::token::mint_token(&user, ttl_minutes, config)?);
        }
        Commands::Spec { output_path } => {
            commands::spec::generate_spec(output_path.as_deref())?;
        }
        Commands::Completion { shell } => {
            commands::completion::generate_completion(shell);
        }
        Commands::Config {
            format,
            profile,
            output,
        } => {
            commands::config::generate_config(format, profile, output.as_deref())?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_reads_token_from_flag() {
        let cli = Cli::try_parse_from([
            "safelease", "chat", "--peer", "tenant1", "--token", "abc",
        ])
        .unwrap();
        let Commands::Chat(args) = cli.command else {
            panic!("expected chat");
        };
        assert_eq!(args.peer, "tenant1");
        assert_eq!(args.token, "abc");
        assert_eq!(args.server.as_str(), "ws://127.0.0.1:8080/ws");
    }

    #[test]
    fn token_accepts_negative_ttl() {
        let cli =
            Cli::try_parse_from(["safelease", "token", "-u", "lessor1", "--ttl", "-5"])
                .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Token { ttl_minutes: -5, .. }
        ));
    }

    #[test]
    fn config_format_is_parsed() {
        let cli = Cli::try_parse_from(["safelease", "config", "--format", "toml"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config {
                format: ConfigFormat::Toml,
                profile: Profile::Dev,
                output: None
            }
        ));
        assert!(Cli::try_parse_from(["safelease", "config", "--format", "ini"]).is_err());
    }
}
