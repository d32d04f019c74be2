//! Command-line interface of the `uptime` binary.
//!
//! Every command reads its settings from the TOML file given with `--config`.
//! Environment variables prefixed with `UPTIME__` override the file.

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;

use crate::cmd::analyze::AnalyzeCmd;
use crate::cmd::migrate::MigrateCmd;
use crate::cmd::serve::ServeCmd;

#[derive(Parser, Clone, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Run the ingestion service
    Serve(ServeCmd),

    /// Apply or revert the schema of the keyspaces or postgres backend
    #[command(subcommand)]
    Migrate(MigrateCmd),

    /// Compute the uptime of every block producer over a period
    Analyze(AnalyzeCmd),
}

impl Commands {
    pub async fn run(self) -> Result<()> {
        match self {
            Commands::Serve(cmd) => cmd.run().await,
            Commands::Migrate(cmd) => cmd.run().await,
            Commands::Analyze(cmd) => cmd.run().await,
        }
    }
}
