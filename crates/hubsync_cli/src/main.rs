//! hubsync CLI
//!
//! Command-line driver for the hubsync engine over a JSON workspace file
//! holding the state of both sides.
//!
//! # Commands
//!
//! - `sync` - Run a full-tree pass over one project
//! - `replay` - Feed recorded change notifications through the worker
//! - `validate` - Check the attribute map and project readiness
//! - `inspect` - Show how local entities link to remote records

mod commands;
mod workspace;

use clap::{Parser, Subcommand};
use hubsync_engine::Direction;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Hierarchy synchronization between a project hub and a tracking service.
#[derive(Parser)]
#[command(name = "hubsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the workspace file
    #[arg(global = true, short, long, default_value = "hubsync.json")]
    state: PathBuf,

    /// Path to the engine configuration (JSON)
    #[arg(global = true, short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(global = true, short, long, default_value = "text")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full-tree pass over one project
    Sync {
        /// Local project name
        project: String,

        /// Direction (remote-to-local, local-to-remote)
        #[arg(short, long, default_value = "remote-to-local")]
        direction: Direction,

        /// Retry transient failures with the configured backoff
        #[arg(short, long)]
        retry: bool,
    },

    /// Feed recorded change notifications through the worker
    Replay {
        /// JSON lines file of `{"topic": .., "payload": ..}` envelopes
        events: PathBuf,
    },

    /// Check the attribute map and project readiness
    Validate {
        /// Only check this project (default: every local project)
        #[arg(short, long)]
        project: Option<String>,
    },

    /// Show how local entities link to remote records
    Inspect {
        /// Local project name
        project: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = workspace::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Sync {
            project,
            direction,
            retry,
        } => {
            commands::sync::run(&cli.state, config, &project, direction, retry, &cli.format)?;
        }
        Commands::Replay { events } => {
            commands::replay::run(&cli.state, config, &events, &cli.format)?;
        }
        Commands::Validate { project } => {
            commands::validate::run(&cli.state, config, project.as_deref(), &cli.format)?;
        }
        Commands::Inspect { project } => {
            commands::inspect::run(&cli.state, config, &project, &cli.format)?;
        }
        Commands::Version => {
            println!("hubsync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
