//! tillsync CLI
//!
//! Command-line tools for inspecting and maintaining a tillsync store.
//!
//! # Commands
//!
//! - `inspect` - Display store statistics
//! - `queue` - Dump queued mutation intents
//! - `enqueue` - Append a mutation intent
//! - `compact` - Clear synced entries and rewrite the log
//! - `verify` - Check every log frame

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// tillsync command-line store tools.
#[derive(Parser)]
#[command(name = "tillsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display store statistics
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Dump queued mutation intents
    Queue {
        /// Only show entries not yet synced
        #[arg(long)]
        pending: bool,

        /// Maximum number of entries to show
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Append a mutation intent to the queue
    Enqueue {
        /// Target table
        table: String,

        /// Operation (INSERT, UPDATE, DELETE)
        operation: String,

        /// Payload as a JSON object
        payload: String,
    },

    /// Clear synced entries and rewrite the log
    Compact {
        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Verify log integrity
    Verify,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Queue {
            pending,
            limit,
            format,
        } => {
            let path = cli.path.ok_or("Store path required for queue")?;
            commands::queue::run(&path, pending, limit, &format)?;
        }
        Commands::Enqueue {
            table,
            operation,
            payload,
        } => {
            let path = cli.path.ok_or("Store path required for enqueue")?;
            commands::enqueue::run(&path, &table, &operation, &payload)?;
        }
        Commands::Compact { dry_run } => {
            let path = cli.path.ok_or("Store path required for compact")?;
            commands::compact::run(&path, dry_run)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Store path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Version => {
            println!("tillsync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("tillsync core v{}", tillsync_core::VERSION);
        }
    }

    Ok(())
}
