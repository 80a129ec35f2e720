//! CLI argument definitions using clap
//!
//! This module contains all the clap structs and enums for parsing CLI
//! arguments. The actual command implementations are in the `commands`
//! module.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

/// Tally - offline-first, multi-device personal-finance ledger
#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Offline-first personal-finance ledger with sync", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Data directory (defaults to the platform data dir + "tally")
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Cloud directory; point two data dirs at the same cloud dir to
    /// sync them like two devices of one account
    #[arg(long, global = true)]
    pub cloud_dir: Option<PathBuf>,

    /// Account identity
    #[arg(long, default_value = "local", global = true)]
    pub user: String,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the data directory and local store
    Init,

    /// Manage books (one ledger per currency)
    Book {
        #[command(subcommand)]
        command: BookCommands,
    },

    /// Manage categories
    Category {
        #[command(subcommand)]
        command: CategoryCommands,
    },

    /// Manage entries
    Entry {
        #[command(subcommand)]
        command: EntryCommands,
    },

    /// Classify a transaction description into the pending queue
    Ingest {
        /// Raw transaction text, e.g. "UPI-SWIGGY BANGALORE 8839"
        description: String,

        /// Signed amount: negative = expense, positive = income
        #[arg(short, long, allow_hyphen_values = true)]
        amount: f64,

        /// Transaction date (YYYY-MM-DD, defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// ISO currency code if the source carries one
        #[arg(long)]
        currency: Option<String>,

        /// Where the text came from: sms, manual, csv
        #[arg(long, default_value = "manual")]
        source: String,
    },

    /// Review the pending-transaction queue
    Pending {
        #[command(subcommand)]
        command: PendingCommands,
    },

    /// Run a sync cycle against the cloud directory
    Sync {
        /// Keep running: auto-sync on changes and listen for remote ones
        #[arg(long)]
        watch: bool,
    },

    /// Show conflicts from the last sync
    Conflicts,

    /// Show store and sync status
    Status,

    /// Show or change preferences
    Prefs {
        #[command(subcommand)]
        command: PrefsCommands,
    },
}

#[derive(Subcommand)]
pub enum BookCommands {
    /// Create a book
    Add {
        name: String,

        /// ISO currency code of the book
        #[arg(short, long)]
        currency: String,

        /// Free-text description (feeds the classifier)
        #[arg(short, long, default_value = "")]
        description: String,
    },

    /// List books
    List {
        /// Include archived books
        #[arg(long)]
        all: bool,
    },

    /// Archive a book (hidden from lists and the classifier)
    Archive { id: String },

    /// Bring an archived book back
    Unarchive { id: String },

    /// Delete a book (tombstoned, propagates to other devices)
    Rm { id: String },

    /// Edit the locked exchange rate; renormalizes the book's entries
    Rate { id: String, rate: f64 },
}

#[derive(Subcommand)]
pub enum CategoryCommands {
    /// Create a category
    Add {
        name: String,

        /// Free-text description (feeds the classifier)
        #[arg(short, long, default_value = "")]
        description: String,

        #[arg(long, default_value = "#9e9e9e")]
        color: String,

        #[arg(long, default_value = "label")]
        icon: String,
    },

    /// List categories
    List,

    /// Delete a category ("Others" refuses)
    Rm { id: String },
}

#[derive(Subcommand)]
pub enum EntryCommands {
    /// Add an entry to a book
    Add {
        /// Book id
        #[arg(short, long)]
        book: String,

        /// Signed amount in the book's currency
        #[arg(short, long, allow_hyphen_values = true)]
        amount: f64,

        /// Category id (defaults to "Others")
        #[arg(short, long)]
        category: Option<String>,

        /// Counterparty
        #[arg(short, long, default_value = "")]
        party: String,

        /// Payment mode: upi, card, cash, bank_transfer, wallet
        #[arg(short, long, default_value = "cash")]
        mode: String,

        /// Transaction date (YYYY-MM-DD, defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,

        #[arg(long, default_value = "")]
        remarks: String,
    },

    /// List entries of a book
    List {
        /// Book id
        #[arg(short, long)]
        book: String,
    },

    /// Delete an entry
    Rm { id: String },

    /// Move entries to another book (renormalizes amounts)
    Move {
        /// Target book id
        #[arg(long)]
        to: String,

        /// Entry ids
        ids: Vec<String>,
    },
}

#[derive(Subcommand)]
pub enum PendingCommands {
    /// List transactions awaiting approval
    List,

    /// Approve as predicted, or with corrections
    Approve {
        id: String,

        /// Corrected book id
        #[arg(long)]
        book: Option<String>,

        /// Corrected category id
        #[arg(long)]
        category: Option<String>,

        /// Corrected payment mode
        #[arg(long)]
        mode: Option<String>,
    },

    /// Reject and forget
    Reject { id: String },
}

#[derive(Subcommand)]
pub enum PrefsCommands {
    /// Show current preferences
    Show,

    /// Set the default (normalization) currency
    Currency { code: String },

    /// Set the fallback payment mode
    Mode { mode: String },

    /// Enable or disable the LLM classification step
    Llm {
        #[arg(value_parser = ["on", "off"])]
        state: String,
    },

    /// Record a custom FX override
    Rate {
        from: String,
        to: String,
        rate: f64,
    },
}
