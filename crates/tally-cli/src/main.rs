//! Tally CLI - offline-first personal-finance ledger
//!
//! Usage:
//!   tally init                         Initialize the data directory
//!   tally book add Trip -c SGD         Create a book
//!   tally ingest "UPI-SWIGGY 88" -a -250
//!                                      Classify into the pending queue
//!   tally pending approve <id>         Turn a pending row into an entry
//!   tally sync                         Pull, merge, push
//!   tally sync --watch                 Keep syncing on changes

mod cli;
mod cloud_dir;
mod commands;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (warn)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    let app = commands::App::build(&cli)?;

    match cli.command {
        Commands::Init => commands::cmd_init(&app),
        Commands::Book { command } => commands::books::run(&app, command).await,
        Commands::Category { command } => commands::categories::run(&app, command),
        Commands::Entry { command } => commands::entries::run(&app, command).await,
        Commands::Ingest {
            description,
            amount,
            date,
            currency,
            source,
        } => commands::pending::cmd_ingest(&app, &description, amount, date, currency, &source)
            .await,
        Commands::Pending { command } => commands::pending::run(&app, command).await,
        Commands::Sync { watch } => commands::sync::run(&app, watch).await,
        Commands::Conflicts => commands::sync::cmd_conflicts(&app),
        Commands::Status => commands::status::run(&app),
        Commands::Prefs { command } => commands::prefs::run(&app, command),
    }
}
