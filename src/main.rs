//! Shipload - manifest-driven module loader
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use shipload::cli::{Cli, Commands};
use shipload::config::ConfigManager;
use shipload::error::ShiploadResult;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> ShiploadResult<()> {
    let cli = Cli::parse();

    // Load configuration
    let config_manager = if let Some(ref path) = cli.config {
        ConfigManager::with_path(path.clone())
    } else {
        ConfigManager::new()
    };
    let config = config_manager.load().await?;

    init_logging(cli.verbose, &config.general.log_format);
    debug!("Using config at {}", config_manager.path().display());

    // Dispatch to command
    match cli.command {
        Commands::Download(args) => shipload::cli::commands::download(args, &config).await,
        Commands::Cache(args) => shipload::cli::commands::cache(args, &config).await,
        Commands::Config(args) => {
            shipload::cli::commands::config(args, &config, &config_manager).await
        }
    }
}

/// 0 = warn, 1 = info, 2+ = debug
fn init_logging(verbose: u8, log_format: &str) {
    let filter = match verbose {
        0 => EnvFilter::new("shipload=warn"),
        1 => EnvFilter::new("shipload=info"),
        _ => EnvFilter::new("shipload=debug"),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if log_format == "json" {
        builder.json().init();
    } else {
        builder.without_time().init();
    }
}
