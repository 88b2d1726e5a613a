use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "bosd",
    about = "Boot orchestration service: reconciles compute-node boot state through \
             independent operator control loops",
    version
)]
pub struct Cli {
    /// Path to the service configuration file.
    #[arg(long, env = "BOSD_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the REST server and the full operator bank.
    Serve {
        /// Use in-process stub collaborators instead of real services.
        #[arg(long)]
        stub_clients: bool,

        /// Override the configured bind address.
        #[arg(long)]
        bind: Option<String>,
    },

    /// Run the store schema migration and exit.
    Migrate,

    /// Print the service version.
    Version,
}
