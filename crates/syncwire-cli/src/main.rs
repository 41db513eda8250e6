mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(
    name = "syncwire",
    version,
    about = "Replicate records between connector subprocesses"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

/// Which connector endpoint a command targets.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Endpoint {
    Source,
    Destination,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the pipe and sentinel file layout for both connectors
    Prepare {
        /// Path to sync YAML file
        sync: PathBuf,
    },
    /// Run a replication sync
    Run {
        /// Path to sync YAML file
        sync: PathBuf,
    },
    /// Read a connector's connection check result
    Check {
        /// Path to sync YAML file
        sync: PathBuf,
        /// Which connector to check
        #[arg(long, value_enum, default_value = "source")]
        endpoint: Endpoint,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Prepare { sync } => commands::prepare::execute(&sync),
        Commands::Run { sync } => commands::run::execute(&sync).await,
        Commands::Check { sync, endpoint } => commands::check::execute(&sync, endpoint).await,
    }
}
