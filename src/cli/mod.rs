//! CLI parser and dispatch.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

/// Exit code reported when the crawl is interrupted (128 + SIGINT).
pub const EXIT_ABORTED: u8 = 130;
/// Exit code for configuration errors.
pub const EXIT_CONFIG: u8 = 2;

#[derive(Parser)]
#[command(name = "siteharvest")]
#[command(about = "Site-scoped sitemap crawler with FAQ extraction")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Run the crawl to completion or until interrupted
    Crawl {
        /// Path to the TOML config file
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Export the registry as JSONL/CSV files
    Export {
        /// Path to the TOML config file
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Parse and type-check a config file
    Validate {
        /// Path to the TOML config file
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Show page counts per status
    Status {
        /// Path to the TOML config file
        #[arg(short, long)]
        config: PathBuf,
    },
}

/// Parse arguments and run the selected command.
pub async fn run() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Commands::Crawl { config } => commands::crawl(&config).await,
        Commands::Export { config } => commands::export(&config),
        Commands::Validate { config } => commands::validate(&config),
        Commands::Status { config } => commands::status(&config),
    }
}
