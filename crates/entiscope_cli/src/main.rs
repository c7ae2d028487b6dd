//! entiscope CLI
//!
//! Runs scenario files against an in-memory scope tree and reports the
//! events and final store contents.
//!
//! # Commands
//!
//! - `run` - Execute a scenario file
//! - `version` - Show version information

mod commands;
mod error;
mod scenario;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// entiscope scenario runner.
#[derive(Parser)]
#[command(name = "entiscope")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a scenario file and print events and store contents
    Run {
        /// Path to the scenario JSON file
        scenario: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so that json output stays parseable
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run { scenario, format } => {
            commands::run::run(&scenario, &format)?;
        }
        Commands::Version => {
            println!("entiscope CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("entiscope core v{}", entiscope_core::VERSION);
        }
    }

    Ok(())
}
