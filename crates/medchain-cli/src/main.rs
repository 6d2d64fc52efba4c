//! Operator CLI for MedChain
//!
//! Validates configuration files and runs the document approval flow against
//! the sandbox handlers.

use anyhow::Result;
use clap::{Parser, Subcommand};
use medchain_core::MedchainConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod app;
mod demo;

#[derive(Parser)]
#[command(name = "medchain")]
#[command(about = "MedChain - Patient Record Anchoring and Approval", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file
    CheckConfig {
        /// Path to the TOML file
        path: PathBuf,
    },

    /// Run upload, approval and anchoring against the sandbox
    Demo {
        /// Optional configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::CheckConfig { path } => {
            let config = MedchainConfig::load_from_file(&path)?;
            println!("{} is valid", path.display());
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Demo { config } => {
            let config = match config {
                Some(path) => MedchainConfig::load_from_file(&path)?,
                None => MedchainConfig::default(),
            };
            demo::run(config).await?;
        }
    }

    Ok(())
}
