//! Taskweave CLI, the main entry point.
//!
//! Commands:
//! - `import`    Upsert tasks from a JSON-lines file
//! - `cluster`   Purge, validate, reuse or recompute, then report
//! - `report`    Statistics and continuity of the stored partition
//! - `validate`  Check whether the stored partition is still usable
//! - `config`    Print the effective configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use taskweave_core::ClusterMode;

mod commands;

#[derive(Parser)]
#[command(
    name = "taskweave",
    about = "Taskweave: size-budgeted clustering of chronologically ordered tasks",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Database path (overrides config and TASKWEAVE_DB)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Upsert tasks from a JSON-lines file
    Import {
        /// One task per line
        file: PathBuf,
    },

    /// Cluster stored tasks, reusing the stored partition when still valid
    Cluster {
        /// Recompute even if the stored partition is usable
        #[arg(short, long)]
        force: bool,

        /// Override the clustering mode
        #[arg(short, long)]
        mode: Option<ClusterMode>,

        /// Partition key (defaults to cluster.run_id)
        #[arg(long)]
        run_id: Option<String>,

        /// Print the run as JSON instead of markdown
        #[arg(long)]
        json: bool,
    },

    /// Show statistics for the stored partition
    Report {
        #[arg(long)]
        run_id: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Check whether the stored partition can be reused
    Validate {
        #[arg(long)]
        run_id: Option<String>,
    },

    /// Print the effective configuration
    Config {
        /// Print built-in defaults instead
        #[arg(long)]
        defaults: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let ctx = commands::Context { db: cli.db };

    match cli.command {
        Commands::Import { file } => commands::import::run(&ctx, &file).await?,
        Commands::Cluster {
            force,
            mode,
            run_id,
            json,
        } => commands::cluster::run(&ctx, force, mode, run_id, json).await?,
        Commands::Report { run_id, json } => commands::report::run(&ctx, run_id, json).await?,
        Commands::Validate { run_id } => commands::validate::run(&ctx, run_id).await?,
        Commands::Config { defaults } => commands::config_cmd::run(&ctx, defaults).await?,
    }

    Ok(())
}
