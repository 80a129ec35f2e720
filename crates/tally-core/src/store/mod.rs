//! Entity model & tombstone store (C1)
//!
//! This module is organized by domain:
//! - `books` - Book CRUD, archive, rate edits
//! - `entries` - Entry CRUD, bulk move/copy
//! - `categories` - Category CRUD and the default "Others"
//!
//! The store owns the read cache and the FX service, persists the three
//! replicated collections as wire-format blobs in the key-value local
//! store, and enforces the write invariants: versions never regress,
//! tombstones are never resurrected by an update, every entry references
//! an existing book and category, and an entry's currency always equals
//! its book's currency (by derivation).
//!
//! Mutations emit a typed change event after the write commits; the sync
//! orchestrator subscribes for its debounced auto-sync. Merge-initiated
//! writes go through [`LedgerStore::apply_merged`], which suspends the
//! events to avoid push loops.

mod books;
mod categories;
mod entries;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::debug;

use crate::cache::ReadCache;
use crate::config::CoreConfig;
use crate::error::{Error, Result};
use crate::fx::FxService;
use crate::ids::UserId;
use crate::kv::{keys, LocalStore};
use crate::models::{Book, Category, Entry, EntityKind, UserPreferences};
use crate::wire::{self, WireBook, WireCategory, WireEntry};

pub use entries::NewEntry;

/// What a mutation did, for change subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOp {
    Created,
    Updated,
    Deleted,
}

/// Emitted after every committed user-initiated mutation.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub kind: EntityKind,
    pub op: ChangeOp,
    pub id: String,
}

pub(crate) struct State {
    pub(crate) books: BTreeMap<String, Book>,
    pub(crate) entries: BTreeMap<String, Entry>,
    pub(crate) categories: BTreeMap<String, Category>,
    pub(crate) prefs: UserPreferences,
}

/// The per-user store. Built fresh on sign-in, dropped on sign-out.
pub struct LedgerStore {
    user: UserId,
    kv: Arc<dyn LocalStore>,
    pub(crate) cache: ReadCache,
    pub(crate) fx: Arc<FxService>,
    state: RwLock<State>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ChangeEvent>>>,
    /// Non-zero while merge-apply is writing; events are swallowed.
    suspend_depth: AtomicU32,
}

impl LedgerStore {
    /// Load the user's collections from local storage.
    pub fn open(
        user: UserId,
        kv: Arc<dyn LocalStore>,
        fx: Arc<FxService>,
        config: &CoreConfig,
    ) -> Result<Arc<Self>> {
        let books = load_collection::<WireBook, Book>(&*kv, keys::BOOKS, "book", |w| {
            w.to_domain()
        })?;
        let entries = load_collection::<WireEntry, Entry>(&*kv, keys::ENTRIES, "entry", |w| {
            w.to_domain()
        })?;
        let categories =
            load_collection::<WireCategory, Category>(&*kv, keys::CATEGORIES, "category", |w| {
                w.to_domain()
            })?;

        let prefs = match kv.get(keys::PREFERENCES)? {
            Some(blob) => serde_json::from_str(&blob)?,
            None => UserPreferences::default(),
        };

        let store = Self {
            user,
            kv,
            cache: ReadCache::new(config.cache.ttl()),
            fx,
            state: RwLock::new(State {
                books: books.into_iter().map(|b| (b.id.to_string(), b)).collect(),
                entries: entries.into_iter().map(|e| (e.id.to_string(), e)).collect(),
                categories: categories
                    .into_iter()
                    .map(|c| (c.id.to_string(), c))
                    .collect(),
                prefs,
            }),
            subscribers: Mutex::new(Vec::new()),
            suspend_depth: AtomicU32::new(0),
        };
        Ok(Arc::new(store))
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    /// Drop every cached read. Part of the sign-out teardown.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().expect("store lock poisoned")
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().expect("store lock poisoned")
    }

    // ------------------------------------------------------------------
    // Change notification
    // ------------------------------------------------------------------

    /// Register a change subscriber. The sync orchestrator uses this for
    /// its debounced auto-sync.
    pub fn subscribe_changes(&self) -> mpsc::UnboundedReceiver<ChangeEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .push(tx);
        rx
    }

    pub(crate) fn notify(&self, kind: EntityKind, op: ChangeOp, id: &str) {
        if self.suspend_depth.load(Ordering::SeqCst) > 0 {
            return;
        }
        let event = ChangeEvent {
            kind,
            op,
            id: id.to_string(),
        };
        let mut subscribers = self.subscribers.lock().expect("subscriber lock poisoned");
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn suspend_notifications(&self) -> SuspendGuard<'_> {
        self.suspend_depth.fetch_add(1, Ordering::SeqCst);
        SuspendGuard(self)
    }

    // ------------------------------------------------------------------
    // Preferences
    // ------------------------------------------------------------------

    pub fn preferences(&self) -> UserPreferences {
        self.read().prefs.clone()
    }

    pub fn update_preferences(
        &self,
        apply: impl FnOnce(&mut UserPreferences),
    ) -> Result<UserPreferences> {
        let mut state = self.write();
        let previous = state.prefs.clone();
        apply(&mut state.prefs);
        let blob = serde_json::to_string(&state.prefs)?;
        if let Err(e) = self.kv.put(keys::PREFERENCES, &blob) {
            state.prefs = previous;
            return Err(e);
        }
        Ok(state.prefs.clone())
    }

    /// Record a user FX override for (from, to).
    pub fn set_custom_rate(&self, from: &str, to: &str, rate: f64) -> Result<()> {
        if rate <= 0.0 {
            return Err(Error::Validation(format!(
                "custom rate must be positive, got {}",
                rate
            )));
        }
        self.update_preferences(|prefs| {
            prefs
                .custom_rates
                .insert(UserPreferences::rate_key(from, to), rate);
        })?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Sync support
    // ------------------------------------------------------------------

    /// Everything, tombstones included. This is the merge kernel's local
    /// input; filtering tombstones here would lose deletions.
    pub fn snapshot_all(&self) -> (Vec<Book>, Vec<Entry>, Vec<Category>) {
        let state = self.read();
        (
            state.books.values().cloned().collect(),
            state.entries.values().cloned().collect(),
            state.categories.values().cloned().collect(),
        )
    }

    /// The snapshot captured at the last reconcile point: the kernel's
    /// common ancestor. Empty collections before the first sync.
    pub fn merge_base(&self) -> Result<(Vec<Book>, Vec<Entry>, Vec<Category>)> {
        let books = load_collection::<WireBook, Book>(&*self.kv, BASE_BOOKS, "book", |w| {
            w.to_domain()
        })?;
        let entries =
            load_collection::<WireEntry, Entry>(&*self.kv, BASE_ENTRIES, "entry", |w| {
                w.to_domain()
            })?;
        let categories = load_collection::<WireCategory, Category>(
            &*self.kv,
            BASE_CATEGORIES,
            "category",
            |w| w.to_domain(),
        )?;
        Ok((books, entries, categories))
    }

    /// Replace the three collections with a merge result.
    ///
    /// Change notifications are suspended for the duration so the apply
    /// step of a sync cannot re-trigger auto-sync. All cache patterns are
    /// invalidated.
    pub fn apply_merged(
        &self,
        books: Vec<Book>,
        entries: Vec<Entry>,
        categories: Vec<Category>,
    ) -> Result<()> {
        let _suspend = self.suspend_notifications();

        let mut state = self.write();
        state.books = books.iter().map(|b| (b.id.to_string(), b.clone())).collect();
        state.entries = entries
            .iter()
            .map(|e| (e.id.to_string(), e.clone()))
            .collect();
        state.categories = categories
            .iter()
            .map(|c| (c.id.to_string(), c.clone()))
            .collect();

        self.persist_books(&state)?;
        self.persist_entries(&state)?;
        self.persist_categories(&state)?;
        drop(state);

        self.cache.invalidate("books");
        self.cache.invalidate("entries");
        self.cache.invalidate("categories");
        debug!(
            books = books.len(),
            entries = entries.len(),
            categories = categories.len(),
            "Applied merged collections"
        );
        Ok(())
    }

    /// Record a successful push: every local entity still at its pushed
    /// version, live or tombstoned, gets `last_synced_version = version`,
    /// and the pushed snapshot becomes the common ancestor for the next
    /// merge. Entities mutated while the push was in flight keep their
    /// pending status and go out with the next cycle.
    pub fn mark_synced(
        &self,
        pushed_books: &[Book],
        pushed_entries: &[Entry],
        pushed_categories: &[Category],
    ) -> Result<()> {
        let _suspend = self.suspend_notifications();

        let mut state = self.write();
        for pushed in pushed_books {
            if let Some(book) = state.books.get_mut(pushed.id.as_str()) {
                if book.meta.version == pushed.meta.version {
                    book.meta.last_synced_version = book.meta.version;
                }
            }
        }
        for pushed in pushed_entries {
            if let Some(entry) = state.entries.get_mut(pushed.id.as_str()) {
                if entry.meta.version == pushed.meta.version {
                    entry.meta.last_synced_version = entry.meta.version;
                }
            }
        }
        for pushed in pushed_categories {
            if let Some(category) = state.categories.get_mut(pushed.id.as_str()) {
                if category.meta.version == pushed.meta.version {
                    category.meta.last_synced_version = category.meta.version;
                }
            }
        }

        self.persist_books(&state)?;
        self.persist_entries(&state)?;
        self.persist_categories(&state)?;

        self.kv.put(
            BASE_BOOKS,
            &serde_json::to_string(
                &pushed_books.iter().map(WireBook::from_domain).collect::<Vec<_>>(),
            )?,
        )?;
        self.kv.put(
            BASE_ENTRIES,
            &serde_json::to_string(
                &pushed_entries
                    .iter()
                    .map(WireEntry::from_domain)
                    .collect::<Vec<_>>(),
            )?,
        )?;
        self.kv.put(
            BASE_CATEGORIES,
            &serde_json::to_string(
                &pushed_categories
                    .iter()
                    .map(WireCategory::from_domain)
                    .collect::<Vec<_>>(),
            )?,
        )?;
        drop(state);

        self.cache.invalidate("books");
        self.cache.invalidate("entries");
        self.cache.invalidate("categories");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    pub(crate) fn persist_books(&self, state: &State) -> Result<()> {
        let wire: Vec<WireBook> = state.books.values().map(WireBook::from_domain).collect();
        self.kv.put(keys::BOOKS, &serde_json::to_string(&wire)?)
    }

    pub(crate) fn persist_entries(&self, state: &State) -> Result<()> {
        let wire: Vec<WireEntry> = state.entries.values().map(WireEntry::from_domain).collect();
        self.kv.put(keys::ENTRIES, &serde_json::to_string(&wire)?)
    }

    pub(crate) fn persist_categories(&self, state: &State) -> Result<()> {
        let wire: Vec<WireCategory> = state
            .categories
            .values()
            .map(WireCategory::from_domain)
            .collect();
        self.kv.put(keys::CATEGORIES, &serde_json::to_string(&wire)?)
    }
}

/// Local keys for the common-ancestor snapshot.
const BASE_BOOKS: &str = "sync_base_books";
const BASE_ENTRIES: &str = "sync_base_entries";
const BASE_CATEGORIES: &str = "sync_base_categories";

struct SuspendGuard<'a>(&'a LedgerStore);

impl Drop for SuspendGuard<'_> {
    fn drop(&mut self) {
        self.0.suspend_depth.fetch_sub(1, Ordering::SeqCst);
    }
}

fn load_collection<W, T>(
    kv: &dyn LocalStore,
    key: &str,
    kind: &str,
    parse: impl Fn(&W) -> Result<T>,
) -> Result<Vec<T>>
where
    W: serde::de::DeserializeOwned,
{
    match kv.get(key)? {
        Some(blob) => {
            let wire: Vec<W> = serde_json::from_str(&blob)?;
            let (parsed, quarantined) = wire::parse_lenient(&wire, kind, parse);
            if quarantined > 0 {
                tracing::warn!(key, quarantined, "Dropped corrupt rows from local blob");
            }
            Ok(parsed)
        }
        None => Ok(Vec::new()),
    }
}
