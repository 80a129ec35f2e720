//! Ingest and pending-queue commands

use anyhow::Result;
use chrono::{NaiveDate, Utc};

use tally_core::{
    ApprovalEdits, BookId, CategoryId, IngestSource, ParsedTransaction, PendingId,
};

use super::App;
use crate::cli::PendingCommands;

pub async fn cmd_ingest(
    app: &App,
    description: &str,
    amount: f64,
    date: Option<NaiveDate>,
    currency: Option<String>,
    source: &str,
) -> Result<()> {
    let source: IngestSource = source.parse().map_err(anyhow::Error::msg)?;
    let tx = ParsedTransaction {
        amount,
        description: description.to_string(),
        date: date.unwrap_or_else(|| Utc::now().date_naive()),
        currency,
        source,
    };

    match app.queue.ingest(&app.classifier, tx).await? {
        Some(pending) => {
            let p = &pending.prediction;
            let book = app.store.book(&p.book_id);
            let category = app.store.category(&p.category_id);
            println!("Queued {} for approval:", pending.id);
            println!(
                "  book:       {} ({})",
                book.map(|b| b.name).unwrap_or_default(),
                p.book_id
            );
            println!(
                "  category:   {} ({})",
                category.map(|c| c.name).unwrap_or_default(),
                p.category_id
            );
            println!("  mode:       {}", p.payment_mode);
            println!("  confidence: {:.2} ({})", p.confidence, p.bucket());
            for signal in &p.signals {
                println!("  signal:     {}", signal);
            }
            println!("Approve with `tally pending approve {}`.", pending.id);
        }
        None => println!("Already ingested; skipped as a duplicate."),
    }
    Ok(())
}

pub async fn run(app: &App, command: PendingCommands) -> Result<()> {
    match command {
        PendingCommands::List => {
            let list = app.queue.list()?;
            if list.is_empty() {
                println!("Nothing pending.");
                return Ok(());
            }
            for pending in list {
                println!(
                    "{}  {}  {:>10.2}  {}  ({:.2} {})",
                    pending.id,
                    pending.transaction.date,
                    pending.transaction.amount,
                    pending.transaction.description,
                    pending.prediction.confidence,
                    pending.prediction.bucket(),
                );
            }
        }
        PendingCommands::Approve {
            id,
            book,
            category,
            mode,
        } => {
            let edits = ApprovalEdits {
                book_id: book.map(|b| BookId::from(b.as_str())),
                category_id: category.map(|c| CategoryId::from(c.as_str())),
                payment_mode: mode
                    .map(|m| m.parse().map_err(anyhow::Error::msg))
                    .transpose()?,
                amount: None,
            };
            let entry = app
                .queue
                .approve_edited(&PendingId::from(id.as_str()), edits)
                .await?;
            println!(
                "Approved: entry {} in book {} ({} {})",
                entry.id, entry.book_id, entry.amount, entry.currency
            );
        }
        PendingCommands::Reject { id } => {
            app.queue.reject(&PendingId::from(id.as_str()))?;
            println!("Rejected {}", id);
        }
    }
    Ok(())
}
