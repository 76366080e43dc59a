mod appeears;
mod cds;
mod cli;
mod config;
mod download;
mod error;
mod geo;
mod period;
mod poll;
mod retry;

use anyhow::{Error, Result};
use clap::Parser;
use cli::{command, Cli, Commands};
use config::YamlCredentials;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let cli = Cli::parse();
    init_tracing();

    let common = match &cli.command {
        Commands::Appeears(args) => &args.common,
        Commands::Cds(args) => &args.common,
    };
    let credentials = match YamlCredentials::from_file(&common.config) {
        Ok(credentials) => credentials,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let result = match &cli.command {
        Commands::Appeears(args) => command::appeears(args, &credentials).await,
        Commands::Cds(args) => command::cds(args, &credentials).await,
    };

    match result {
        Ok(location) => println!("Files saved under `{}`", location),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Logs to stderr, filtered by `RUST_LOG` (default `info`).
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
