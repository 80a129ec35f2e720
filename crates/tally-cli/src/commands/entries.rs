//! Entry commands

use anyhow::{Context, Result};
use chrono::Utc;

use tally_core::{BookId, CategoryId, EntryId, NewEntry};

use super::App;
use crate::cli::EntryCommands;

pub async fn run(app: &App, command: EntryCommands) -> Result<()> {
    match command {
        EntryCommands::Add {
            book,
            amount,
            category,
            party,
            mode,
            date,
            remarks,
        } => {
            let category = match category {
                Some(id) => CategoryId::from(id.as_str()),
                None => app.store.others_category().id,
            };
            let entry = app
                .store
                .create_entry(NewEntry {
                    book_id: BookId::from(book.as_str()),
                    amount,
                    category,
                    party,
                    payment_mode: mode.parse().map_err(anyhow::Error::msg)?,
                    date: date.unwrap_or_else(|| Utc::now().date_naive()),
                    remarks,
                })
                .await?;
            println!(
                "Added entry {}: {} {} ({} {} normalized)",
                entry.id,
                entry.amount,
                entry.currency,
                entry.normalized_amount,
                entry.normalized_currency
            );
        }
        EntryCommands::List { book } => {
            let book_id = BookId::from(book.as_str());
            let book = app
                .store
                .book(&book_id)
                .with_context(|| format!("no live book {}", book_id))?;
            let entries = app.store.entries_for_book(&book_id);
            if entries.is_empty() {
                println!("No entries in {}.", book.name);
                return Ok(());
            }
            for entry in entries {
                println!(
                    "{}  {}  {:>12.2} {}  {}  {}",
                    entry.id, entry.date, entry.amount, entry.currency, entry.party, entry.remarks
                );
            }
        }
        EntryCommands::Rm { id } => {
            app.store.delete_entry(&EntryId::from(id.as_str()))?;
            println!("Deleted entry {}", id);
        }
        EntryCommands::Move { to, ids } => {
            let ids: Vec<EntryId> = ids.iter().map(|id| EntryId::from(id.as_str())).collect();
            let moved = app
                .store
                .move_entries(&ids, &BookId::from(to.as_str()))
                .await?;
            println!("Moved {} entries (amounts renormalized)", moved.len());
        }
    }
    Ok(())
}
