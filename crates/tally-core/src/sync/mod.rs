//! Sync orchestrator (C5)
//!
//! The canonical cycle is pull -> merge -> apply -> push. A debounced
//! auto-sync subscribes to store changes; a real-time listener funnels
//! out-of-band cloud changes into the same merge (without pushing). At
//! most one cycle runs at a time per user: concurrent requests return
//! [`SyncStatus::Skipped`] and are not queued; the debounce will pick up
//! whatever they wanted to sync.
//!
//! A crash anywhere in the cycle loses nothing: before apply no local
//! state was written, and between apply and push the next cycle simply
//! re-merges and re-pushes.

pub mod auth;
pub mod cloud;

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::merge::{merge_collection, Conflict, MergeContext};
use crate::store::LedgerStore;
use crate::wire::{self, UserDocument};

use auth::IdentityProvider;
use cloud::CloudStore;

/// Outcome of one sync request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    Completed(SyncReport),
    /// Another sync was already in flight; nothing was queued.
    Skipped,
}

/// What a completed cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Conflicts detected this cycle (also stored for later review).
    pub conflicts: usize,
    /// Cloud entities dropped by integrity validation.
    pub quarantined: usize,
    /// False on the listener path, which never pushes.
    pub pushed: bool,
}

/// Per-user sync orchestrator. Owns the debounce and listener tasks.
pub struct SyncOrchestrator {
    store: Arc<LedgerStore>,
    cloud: Arc<dyn CloudStore>,
    identity: Arc<dyn IdentityProvider>,
    config: SyncConfig,
    /// The "syncing" flag: holding this lock is being in a sync.
    sync_gate: tokio::sync::Mutex<()>,
    last_sync: Mutex<Option<DateTime<Utc>>>,
    conflicts: Mutex<Vec<Conflict>>,
    /// Cookie written with our last push; the listener drops the matching
    /// echo exactly once.
    last_pushed_cookie: Mutex<Option<String>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncOrchestrator {
    pub fn new(
        store: Arc<LedgerStore>,
        cloud: Arc<dyn CloudStore>,
        identity: Arc<dyn IdentityProvider>,
        config: &SyncConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            cloud,
            identity,
            config: config.clone(),
            sync_gate: tokio::sync::Mutex::new(()),
            last_sync: Mutex::new(None),
            conflicts: Mutex::new(Vec::new()),
            last_pushed_cookie: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Canonical sync: pull -> merge -> apply -> push, under the overall
    /// time budget. Idempotent: re-running a completed sync is a no-op
    /// modulo timestamps.
    pub async fn sync(&self) -> Result<SyncStatus> {
        let _guard = match self.sync_gate.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("Sync already in flight; skipping");
                return Ok(SyncStatus::Skipped);
            }
        };

        match timeout(self.config.budget(), self.sync_cycle(None, true)).await {
            Ok(result) => result,
            Err(_) => Err(Error::SyncTimeout(self.config.budget_secs)),
        }
    }

    /// Conflicts accumulated across cycles, for user review. Manual
    /// resolutions are ordinary mutations; clear this after showing them.
    pub fn pending_conflicts(&self) -> Vec<Conflict> {
        self.conflicts.lock().expect("conflict lock poisoned").clone()
    }

    pub fn clear_conflicts(&self) {
        self.conflicts.lock().expect("conflict lock poisoned").clear();
    }

    pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        *self.last_sync.lock().expect("sync time lock poisoned")
    }

    /// Spawn the debounced auto-sync and the real-time listener.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().expect("task lock poisoned");

        // Debounced auto-sync: any store mutation schedules a sync; rapid
        // mutations collapse into one. Merge-applies are already silent.
        let orchestrator = Arc::clone(self);
        let mut changes = self.store.subscribe_changes();
        let debounce = self.config.debounce();
        tasks.push(tokio::spawn(async move {
            while changes.recv().await.is_some() {
                loop {
                    match timeout(debounce, changes.recv()).await {
                        Ok(Some(_)) => continue, // more changes; restart window
                        Ok(None) => return,      // store dropped
                        Err(_) => break,         // quiet for a full window
                    }
                }
                match orchestrator.sync().await {
                    Ok(SyncStatus::Completed(report)) => {
                        debug!(conflicts = report.conflicts, "Auto-sync complete")
                    }
                    Ok(SyncStatus::Skipped) => debug!("Auto-sync skipped"),
                    Err(e) => warn!(error = %e, "Auto-sync failed"),
                }
            }
        }));

        // Real-time listener.
        if let Some(user) = self.identity.current_user() {
            let orchestrator = Arc::clone(self);
            let mut rx = self.cloud.subscribe(&user);
            tasks.push(tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(doc) => orchestrator.handle_remote_change(doc).await,
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "Listener lagged; continuing");
                        }
                        Err(broadcast::error::RecvError::Closed) => return,
                    }
                }
            }));
        }
    }

    /// Sign-out teardown: cancel the debounce timer and listener, clear
    /// the conflict set and the read cache. The subsystem is then dropped
    /// and rebuilt for the next identity.
    pub fn shutdown(&self) {
        for task in self.tasks.lock().expect("task lock poisoned").drain(..) {
            task.abort();
        }
        self.clear_conflicts();
        self.store.clear_cache();
        info!("Sync orchestrator shut down");
    }

    /// Listener path: same merge machinery, no push.
    async fn handle_remote_change(&self, doc: UserDocument) {
        {
            let mut cookie = self
                .last_pushed_cookie
                .lock()
                .expect("cookie lock poisoned");
            if cookie.is_some() && doc.sync_cookie == *cookie {
                *cookie = None;
                debug!("Dropped listener echo of our own push");
                return;
            }
        }

        // Re-entrancy guard: an active sync already sees the latest cloud
        // state on its own pull, so this event can be dropped.
        let _guard = match self.sync_gate.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("Listener event dropped; sync in flight");
                return;
            }
        };

        match timeout(self.config.budget(), self.sync_cycle(Some(doc), false)).await {
            Ok(Ok(SyncStatus::Completed(report))) => {
                debug!(conflicts = report.conflicts, "Applied remote change")
            }
            Ok(Ok(SyncStatus::Skipped)) => {}
            Ok(Err(e)) => warn!(error = %e, "Failed to apply remote change"),
            Err(_) => warn!("Timed out applying remote change"),
        }
    }

    /// Steps 2-9. `provided` short-circuits the pull (listener path);
    /// `push` distinguishes the canonical cycle from listener applies.
    async fn sync_cycle(
        &self,
        provided: Option<UserDocument>,
        push: bool,
    ) -> Result<SyncStatus> {
        let user = self.identity.current_user().ok_or(Error::AuthMissing)?;

        // Step 2: force-refresh the token. A permanent failure tears the
        // session down; sync is disabled until the next sign-in.
        if push {
            let refresh = self
                .with_retry("token refresh", || self.identity.refresh_token(true))
                .await;
            if let Err(e) = refresh {
                if e.is_auth_permanent() {
                    warn!(error = %e, "Session expired; signing out");
                    self.identity.sign_out();
                }
                return Err(e);
            }
        }

        // Step 3: pull.
        let doc = match provided {
            Some(doc) => Some(doc),
            None => {
                self.with_retry("pull", || self.cloud.read_user_doc(&user))
                    .await?
            }
        };
        let parsed = doc.as_ref().map(wire::document_to_domain).unwrap_or_default();
        if parsed.quarantined > 0 {
            warn!(
                quarantined = parsed.quarantined,
                "Cloud payload had invalid entities; merging the rest"
            );
        }

        // Step 4: local state *including tombstones*, plus the ancestor
        // snapshot from the last reconcile.
        let (local_books, local_entries, local_categories) = self.store.snapshot_all();
        let (base_books, base_entries, base_categories) = self.store.merge_base()?;

        // Step 5: merge each collection.
        let ctx = MergeContext {
            user: user.clone(),
            now: Utc::now(),
        };
        let books_out = merge_collection(&local_books, &parsed.books, &base_books, &ctx);
        let entries_out = merge_collection(&local_entries, &parsed.entries, &base_entries, &ctx);
        let categories_out =
            merge_collection(&local_categories, &parsed.categories, &base_categories, &ctx);

        // Step 6: surface conflicts; the merged result already reflects
        // cloud-wins defaults, so the local view converges regardless.
        let cycle_conflicts = books_out.conflicts.len()
            + entries_out.conflicts.len()
            + categories_out.conflicts.len();
        if cycle_conflicts > 0 {
            let mut stored = self.conflicts.lock().expect("conflict lock poisoned");
            stored.extend(books_out.conflicts.iter().cloned());
            stored.extend(entries_out.conflicts.iter().cloned());
            stored.extend(categories_out.conflicts.iter().cloned());
            info!(conflicts = cycle_conflicts, "Merge produced conflicts");
        }

        let (books, entries, categories) = (
            books_out.merged,
            entries_out.merged,
            categories_out.merged,
        );

        // Step 7: apply locally with change notifications suspended.
        self.store
            .apply_merged(books.clone(), entries.clone(), categories.clone())?;

        // Step 8: push the kernel output verbatim, with the echo cookie
        // set before the write. Only after the write lands does the local
        // replica record the push as a sync point, for every item, live
        // or tombstoned, so a crash in between re-pushes next cycle.
        if push {
            let cookie = generate_cookie();
            *self
                .last_pushed_cookie
                .lock()
                .expect("cookie lock poisoned") = Some(cookie.clone());
            let doc = wire::document_from_domain(
                &books,
                &entries,
                &categories,
                Utc::now(),
                Some(cookie),
            );
            self.with_retry("push", || self.cloud.write_user_doc(&user, &doc))
                .await?;
            self.store.mark_synced(&books, &entries, &categories)?;
        }

        // Step 9: commit.
        *self.last_sync.lock().expect("sync time lock poisoned") = Some(Utc::now());
        Ok(SyncStatus::Completed(SyncReport {
            conflicts: cycle_conflicts,
            quarantined: parsed.quarantined,
            pushed: push,
        }))
    }

    /// Retry transient errors with the configured backoff. Exhausted
    /// permission denials are reclassified as a revoked session.
    async fn with_retry<T, Fut>(&self, step: &str, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let out_of_attempts = attempt + 1 >= self.config.max_attempts();
                    if e.is_transient() && !out_of_attempts {
                        let delay = self.config.backoff(attempt).unwrap_or_default();
                        warn!(step, attempt, error = %e, "Transient error; backing off");
                        sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    if matches!(e, Error::PermissionDenied(_)) {
                        warn!(step, "Persistent permission denial; treating as revoked session");
                        self.identity.sign_out();
                        return Err(Error::AuthExpired(format!(
                            "persistent permission denial during {}",
                            step
                        )));
                    }
                    return Err(e);
                }
            }
        }
    }
}

fn generate_cookie() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}
