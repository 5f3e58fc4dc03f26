//! fieldsync CLI - capture infringements offline and deliver them later
//!
//! Submissions are queued locally first; `sync`, `retry` and `watch` push
//! them to the infringement API once it is reachable.

mod cli;
mod commands;
mod error;

use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::capture::run_capture;
use crate::commands::clear::run_clear_synced;
use crate::commands::common::CliContext;
use crate::commands::list::run_list;
use crate::commands::retry::run_retry;
use crate::commands::stats::run_stats;
use crate::commands::sync::run_sync;
use crate::commands::watch::run_watch;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "fieldsync=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let context = CliContext::resolve(cli.db_path, cli.config)?;

    match cli.command {
        Commands::Capture(args) => run_capture(args, &context).await?,
        Commands::List { json } => run_list(json, &context).await?,
        Commands::Sync => run_sync(&context).await?,
        Commands::Retry { id } => run_retry(&id, &context).await?,
        Commands::ClearSynced => run_clear_synced(&context).await?,
        Commands::Stats { json } => run_stats(json, &context).await?,
        Commands::Watch => run_watch(&context).await?,
    }

    Ok(())
}
