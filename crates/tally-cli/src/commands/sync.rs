//! Sync commands

use anyhow::Result;

use tally_core::SyncStatus;

use super::App;

pub async fn run(app: &App, watch: bool) -> Result<()> {
    match app.orchestrator.sync().await? {
        SyncStatus::Completed(report) => {
            println!(
                "Sync complete (pushed: {}, conflicts: {}, quarantined: {})",
                report.pushed, report.conflicts, report.quarantined
            );
            if report.conflicts > 0 {
                println!("Run `tally conflicts` to review.");
            }
        }
        SyncStatus::Skipped => println!("A sync is already in flight; skipped."),
    }

    if watch {
        println!("Watching for changes (ctrl-c to stop)...");
        app.orchestrator.start();
        tokio::signal::ctrl_c().await?;
        app.orchestrator.shutdown();
        println!("Stopped.");
    }
    Ok(())
}

pub fn cmd_conflicts(app: &App) -> Result<()> {
    let conflicts = app.orchestrator.pending_conflicts();
    if conflicts.is_empty() {
        println!("No pending conflicts.");
        return Ok(());
    }
    for conflict in &conflicts {
        println!(
            "{} {} field `{}`: local {} vs cloud {} (kept cloud; local v{}, cloud v{})",
            conflict.entity_kind,
            conflict.id,
            conflict.field,
            conflict.local_value,
            conflict.cloud_value,
            conflict.local_version,
            conflict.cloud_version,
        );
    }
    println!(
        "{} conflict(s). Edit the entities to resolve; edits sync like any mutation.",
        conflicts.len()
    );
    Ok(())
}
