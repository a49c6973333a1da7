//! # Secure Wrapper Main Entry Point
//!
//! This is the main entry point for the secure wrapper service: a local
//! security proxy mediating an autonomous agent's access to Gmail and
//! Calendar.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use secure_wrapper::config::ConfigLoader;
use secure_wrapper::server::{AppState, run_server};
use secure_wrapper::telemetry;

#[derive(Parser)]
#[command(name = "secure-wrapper")]
#[command(about = "Local security proxy for agent access to Gmail and Calendar")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (default when no subcommand is given)
    Serve,
    /// Print the loaded configuration with secrets redacted, then exit
    PrintConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_loader = ConfigLoader::new();
    let (config, paths) = config_loader.load().context("failed to load configuration")?;

    telemetry::init_tracing(&config).context("failed to initialize logging")?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::PrintConfig => {
            let redacted_json = config
                .redacted_json()
                .context("failed to render configuration as JSON")?;
            println!("{redacted_json}");
            Ok(())
        }
        Commands::Serve => {
            if let Ok(redacted_json) = config.redacted_json() {
                tracing::info!(config = %redacted_json, "loaded configuration");
            }
            let state = AppState::new(config, paths);
            run_server(state).await.map_err(|e| anyhow::anyhow!(e.to_string()))
        }
    }
}
