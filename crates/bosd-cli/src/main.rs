mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { stub_clients, bind } => {
            commands::serve(cli.config, stub_clients, bind).await
        }
        Command::Migrate => commands::migrate_store(cli.config).await,
        Command::Version => {
            println!("bosd {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
