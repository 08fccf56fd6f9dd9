//! tvhsync CLI
//!
//! Command-line tools for inspecting the sync engine.
//!
//! # Commands
//!
//! - `replay` - Run a full sync against a recorded session and print the result
//! - `config` - Print the effective engine configuration

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// tvhsync command-line tools.
#[derive(Parser)]
#[command(name = "tvhsync")]
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
    /// Sync against a recorded session served by a loopback backend
    Replay {
        /// Session file (JSON)
        session: PathBuf,

        /// Directory for cached icons
        #[arg(short, long)]
        icons: Option<PathBuf>,

        /// Seconds to wait for the sync to finish
        #[arg(short, long, default_value = "30")]
        timeout: u64,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print the engine configuration a session would run with
    Config {
        /// Session file (JSON); defaults are printed without one
        session: Option<PathBuf>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Replay {
            session,
            icons,
            timeout,
            format,
        } => {
            commands::replay::run(&session, icons, timeout, &format)?;
        }
        Commands::Config { session } => {
            commands::config::run(session.as_deref())?;
        }
        Commands::Version => {
            println!("tvhsync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "HTSP protocol v{}",
                tvhsync_engine::EngineConfig::new().htsp_version
            );
        }
    }

    Ok(())
}
