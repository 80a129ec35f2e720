//! Status command

use anyhow::Result;

use super::App;

pub fn run(app: &App) -> Result<()> {
    let books = app.store.live_books();
    let archived = app.store.archived_books();
    let entries = app.store.live_entries();
    let categories = app.store.live_categories();
    let pending = app.queue.list()?;
    let prefs = app.store.preferences();

    println!("User:        {}", app.store.user());
    println!("Data dir:    {}", app.data_dir.display());
    println!("Cloud dir:   {}", app.cloud_dir.display());
    println!();
    println!(
        "Books:       {} live, {} archived",
        books.len(),
        archived.len()
    );
    println!("Entries:     {}", entries.len());
    println!("Categories:  {}", categories.len());
    println!("Pending:     {}", pending.len());
    println!();
    println!("Default currency: {}", prefs.default_currency);
    println!("Fallback mode:    {}", prefs.default_payment_mode);
    println!(
        "LLM step:         {}",
        if app.config.llm.enabled && prefs.llm_enabled {
            "enabled"
        } else {
            "disabled"
        }
    );
    match app.orchestrator.last_sync_time() {
        Some(t) => println!("Last sync:        {}", t.to_rfc3339()),
        None => println!("Last sync:        never (this session)"),
    }
    let conflicts = app.orchestrator.pending_conflicts();
    if !conflicts.is_empty() {
        println!("Conflicts:        {} pending review", conflicts.len());
    }
    Ok(())
}
