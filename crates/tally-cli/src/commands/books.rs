//! Book commands

use anyhow::Result;

use tally_core::BookId;

use super::App;
use crate::cli::BookCommands;

pub async fn run(app: &App, command: BookCommands) -> Result<()> {
    match command {
        BookCommands::Add {
            name,
            currency,
            description,
        } => {
            let book = app.store.create_book(&name, &description, &currency).await?;
            println!(
                "Created book {} ({}) locked at {} {} per {}",
                book.id, book.name, book.locked_exchange_rate, book.target_currency, book.currency
            );
        }
        BookCommands::List { all } => {
            let mut books = app.store.live_books();
            if all {
                books.extend(app.store.archived_books());
            }
            if books.is_empty() {
                println!("No books. Create one with `tally book add <name> -c <currency>`.");
                return Ok(());
            }
            for book in books {
                let marker = if book.archived { " [archived]" } else { "" };
                println!(
                    "{}  {}  {}  v{}{}",
                    book.id, book.name, book.currency, book.meta.version, marker
                );
            }
        }
        BookCommands::Archive { id } => {
            let book = app.store.archive_book(&BookId::from(id.as_str()))?;
            println!("Archived {}", book.name);
        }
        BookCommands::Unarchive { id } => {
            let book = app.store.unarchive_book(&BookId::from(id.as_str()))?;
            println!("Unarchived {}", book.name);
        }
        BookCommands::Rm { id } => {
            app.store.delete_book(&BookId::from(id.as_str()))?;
            println!("Deleted {} (tombstone will sync to other devices)", id);
        }
        BookCommands::Rate { id, rate } => {
            let book = app.store.set_book_rate(&BookId::from(id.as_str()), rate)?;
            let entries = app.store.entries_for_book(&book.id);
            println!(
                "Locked rate of {} is now {} {} per {}; renormalized {} entries",
                book.name,
                rate,
                book.target_currency,
                book.currency,
                entries.len()
            );
        }
    }
    Ok(())
}
