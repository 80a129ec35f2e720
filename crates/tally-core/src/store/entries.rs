//! Entry operations

use std::collections::HashSet;

use chrono::NaiveDate;
use serde_json::json;
use tracing::info;

use crate::error::{Error, Result};
use crate::fx::round_half_even;
use crate::ids::{BookId, CategoryId, EntryId};
use crate::models::{Book, Entry, EntityKind, EntryPatch, PaymentMode, SyncMeta};

use super::{ChangeOp, LedgerStore};

/// Input for `create_entry`. Currency is absent on purpose: an entry
/// always takes its book's currency.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub book_id: BookId,
    pub amount: f64,
    pub category: CategoryId,
    pub party: String,
    pub payment_mode: PaymentMode,
    pub date: NaiveDate,
    pub remarks: String,
}

impl LedgerStore {
    /// Create an entry in a live, unarchived book. The normalized amount
    /// is computed here with the book's rate so aggregation never needs a
    /// per-query FX lookup.
    pub async fn create_entry(&self, new: NewEntry) -> Result<Entry> {
        let (book, target_currency, overrides) = {
            let state = self.read();
            let book = state
                .books
                .get(new.book_id.as_str())
                .ok_or_else(|| Error::NotFound(format!("book {}", new.book_id)))?;
            if book.meta.deleted {
                return Err(Error::Validation(format!(
                    "cannot write an entry into deleted book {}",
                    new.book_id
                )));
            }
            if book.archived {
                return Err(Error::Validation(format!(
                    "cannot write an entry into archived book {}",
                    new.book_id
                )));
            }
            self.require_live_category(&state, &new.category)?;
            (
                book.clone(),
                state.prefs.default_currency.clone(),
                state.prefs.custom_rates.clone(),
            )
        };

        let rate = self
            .fx
            .rate(&book.currency, &target_currency, Some(&book), &overrides)
            .await?;

        let now = self.now();
        let entry = Entry {
            id: EntryId::generate(),
            meta: SyncMeta::new(self.user(), now),
            book_id: book.id.clone(),
            amount: new.amount,
            currency: book.currency.clone(),
            category: new.category,
            party: new.party,
            payment_mode: new.payment_mode,
            date: new.date,
            normalized_amount: round_half_even(new.amount * rate, 4),
            normalized_currency: target_currency,
            conversion_rate: rate,
            remarks: new.remarks,
        };

        let mut state = self.write();
        // The book or category may have vanished while the rate fetch ran.
        match state.books.get(entry.book_id.as_str()) {
            Some(b) if !b.meta.deleted && !b.archived => {}
            _ => {
                return Err(Error::Validation(format!(
                    "book {} is no longer writable",
                    entry.book_id
                )))
            }
        }
        self.require_live_category(&state, &entry.category)?;
        state.entries.insert(entry.id.to_string(), entry.clone());
        if let Err(e) = self.persist_entries(&state) {
            state.entries.remove(entry.id.as_str());
            return Err(e);
        }
        drop(state);

        self.invalidate_entry_patterns(&entry.book_id);
        self.notify(EntityKind::Entry, ChangeOp::Created, entry.id.as_str());
        Ok(entry)
    }

    /// Apply a patch to a live entry. An amount change renormalizes at the
    /// book's current rate.
    pub async fn update_entry(&self, id: &EntryId, patch: EntryPatch) -> Result<Entry> {
        let (entry, book, target_currency, overrides) = {
            let state = self.read();
            let entry = state
                .entries
                .get(id.as_str())
                .ok_or_else(|| Error::NotFound(format!("entry {}", id)))?;
            if entry.meta.deleted {
                return Err(Error::Validation(format!("entry {} is deleted", id)));
            }
            if let Some(category) = &patch.category {
                self.require_live_category(&state, category)?;
            }
            let book = state
                .books
                .get(entry.book_id.as_str())
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("book {}", entry.book_id)))?;
            (
                entry.clone(),
                book,
                state.prefs.default_currency.clone(),
                state.prefs.custom_rates.clone(),
            )
        };

        // Renormalize only when the amount actually changes.
        let normalization = match patch.amount {
            Some(amount) if amount != entry.amount => {
                let rate = self
                    .fx
                    .rate(&book.currency, &target_currency, Some(&book), &overrides)
                    .await?;
                Some((amount, rate))
            }
            _ => None,
        };

        let now = self.now();
        let user = self.user().clone();
        let mut state = self.write();
        let current = state
            .entries
            .get_mut(id.as_str())
            .ok_or_else(|| Error::NotFound(format!("entry {}", id)))?;
        if current.meta.deleted {
            return Err(Error::Validation(format!("entry {} is deleted", id)));
        }
        let previous = current.clone();

        if let Some((amount, rate)) = normalization {
            current.amount = amount;
            current.conversion_rate = rate;
            current.normalized_amount = round_half_even(amount * rate, 4);
            current.normalized_currency = target_currency;
        }
        if let Some(category) = patch.category {
            current.category = category;
        }
        if let Some(party) = patch.party {
            current.party = party;
        }
        if let Some(payment_mode) = patch.payment_mode {
            current.payment_mode = payment_mode;
        }
        if let Some(date) = patch.date {
            current.date = date;
        }
        if let Some(remarks) = patch.remarks {
            current.remarks = remarks;
        }
        current.meta.touch(&user, now);
        let updated = current.clone();

        if let Err(e) = self.persist_entries(&state) {
            state.entries.insert(id.to_string(), previous);
            return Err(e);
        }
        drop(state);

        self.invalidate_entry_patterns(&updated.book_id);
        self.notify(EntityKind::Entry, ChangeOp::Updated, id.as_str());
        Ok(updated)
    }

    /// Tombstone an entry.
    pub fn delete_entry(&self, id: &EntryId) -> Result<()> {
        let mut state = self.write();
        let entry = state
            .entries
            .get(id.as_str())
            .ok_or_else(|| Error::NotFound(format!("entry {}", id)))?;
        if entry.meta.deleted {
            return Ok(());
        }
        let previous = entry.clone();
        let book_id = entry.book_id.clone();
        let now = self.now();
        let user = self.user().clone();

        let entry = state.entries.get_mut(id.as_str()).expect("checked above");
        entry.meta.bury(&user, now);

        if let Err(e) = self.persist_entries(&state) {
            state.entries.insert(id.to_string(), previous);
            return Err(e);
        }
        drop(state);

        self.invalidate_entry_patterns(&book_id);
        self.notify(EntityKind::Entry, ChangeOp::Deleted, id.as_str());
        Ok(())
    }

    /// Move entries into another book: `book_id` changes *and* the
    /// normalized amount is recomputed with the target book's rate. Both
    /// the source and target books' cache patterns are invalidated.
    pub async fn move_entries(&self, ids: &[EntryId], target: &BookId) -> Result<Vec<Entry>> {
        let (target_book, rate, target_currency) = self.prepare_target(target).await?;

        let now = self.now();
        let user = self.user().clone();
        let mut state = self.write();

        let mut previous = Vec::new();
        let mut moved = Vec::new();
        let mut source_books: HashSet<String> = HashSet::new();
        for id in ids {
            let entry = state
                .entries
                .get(id.as_str())
                .ok_or_else(|| Error::NotFound(format!("entry {}", id)))?;
            if entry.meta.deleted {
                return Err(Error::Validation(format!("entry {} is deleted", id)));
            }
            previous.push(entry.clone());
        }
        for id in ids {
            let entry = state.entries.get_mut(id.as_str()).expect("validated above");
            source_books.insert(entry.book_id.to_string());
            entry.book_id = target_book.id.clone();
            entry.currency = target_book.currency.clone();
            entry.conversion_rate = rate;
            entry.normalized_amount = round_half_even(entry.amount * rate, 4);
            entry.normalized_currency = target_currency.clone();
            entry.meta.touch(&user, now);
            moved.push(entry.clone());
        }

        if let Err(e) = self.persist_entries(&state) {
            for entry in previous {
                state.entries.insert(entry.id.to_string(), entry);
            }
            return Err(e);
        }
        drop(state);

        for source in &source_books {
            self.cache.invalidate(&format!("entries:bookId:{}", source));
        }
        self.invalidate_entry_patterns(target);
        for entry in &moved {
            self.notify(EntityKind::Entry, ChangeOp::Updated, entry.id.as_str());
        }
        info!(count = moved.len(), target = %target, "Moved entries");
        Ok(moved)
    }

    /// Copy entries into another book as fresh entities (new ids, version
    /// 1), normalized at the target book's rate.
    pub async fn copy_entries(&self, ids: &[EntryId], target: &BookId) -> Result<Vec<Entry>> {
        let (target_book, rate, target_currency) = self.prepare_target(target).await?;

        let now = self.now();
        let mut state = self.write();

        let mut copies = Vec::new();
        for id in ids {
            let entry = state
                .entries
                .get(id.as_str())
                .ok_or_else(|| Error::NotFound(format!("entry {}", id)))?;
            if entry.meta.deleted {
                return Err(Error::Validation(format!("entry {} is deleted", id)));
            }
            let mut copy = entry.clone();
            copy.id = EntryId::generate();
            copy.meta = SyncMeta::new(self.user(), now);
            copy.book_id = target_book.id.clone();
            copy.currency = target_book.currency.clone();
            copy.conversion_rate = rate;
            copy.normalized_amount = round_half_even(copy.amount * rate, 4);
            copy.normalized_currency = target_currency.clone();
            copies.push(copy);
        }
        for copy in &copies {
            state.entries.insert(copy.id.to_string(), copy.clone());
        }

        if let Err(e) = self.persist_entries(&state) {
            for copy in &copies {
                state.entries.remove(copy.id.as_str());
            }
            return Err(e);
        }
        drop(state);

        self.invalidate_entry_patterns(target);
        for copy in &copies {
            self.notify(EntityKind::Entry, ChangeOp::Created, copy.id.as_str());
        }
        Ok(copies)
    }

    async fn prepare_target(&self, target: &BookId) -> Result<(Book, f64, String)> {
        let (book, target_currency, overrides) = {
            let state = self.read();
            let book = state
                .books
                .get(target.as_str())
                .ok_or_else(|| Error::NotFound(format!("book {}", target)))?;
            if book.meta.deleted {
                return Err(Error::Validation(format!("book {} is deleted", target)));
            }
            if book.archived {
                return Err(Error::Validation(format!("book {} is archived", target)));
            }
            (
                book.clone(),
                state.prefs.default_currency.clone(),
                state.prefs.custom_rates.clone(),
            )
        };
        let rate = self
            .fx
            .rate(&book.currency, &target_currency, Some(&book), &overrides)
            .await?;
        Ok((book, rate, target_currency))
    }

    fn invalidate_entry_patterns(&self, book_id: &BookId) {
        self.cache
            .invalidate(&format!("entries:bookId:{}", book_id));
        self.cache.invalidate("entries");
    }

    // ------------------------------------------------------------------
    // Read views
    // ------------------------------------------------------------------

    /// Live entries across all books.
    pub fn live_entries(&self) -> Vec<Entry> {
        let cache_key = format!("entries:userId:{}", self.user());
        if let Some(value) = self.cache.get(&cache_key) {
            if let Ok(entries) = serde_json::from_value::<Vec<Entry>>(value) {
                return entries;
            }
        }

        let entries: Vec<Entry> = self
            .read()
            .entries
            .values()
            .filter(|e| !e.meta.deleted)
            .cloned()
            .collect();
        self.cache.put(&cache_key, json!(entries));
        entries
    }

    /// Live entries of one book.
    pub fn entries_for_book(&self, book_id: &BookId) -> Vec<Entry> {
        let cache_key = format!("entries:bookId:{}", book_id);
        if let Some(value) = self.cache.get(&cache_key) {
            if let Ok(entries) = serde_json::from_value::<Vec<Entry>>(value) {
                return entries;
            }
        }

        let entries: Vec<Entry> = self
            .read()
            .entries
            .values()
            .filter(|e| !e.meta.deleted && e.book_id == *book_id)
            .cloned()
            .collect();
        self.cache.put(&cache_key, json!(entries));
        entries
    }

    /// Everything, tombstones included (sync path).
    pub fn all_entries(&self) -> Vec<Entry> {
        self.read().entries.values().cloned().collect()
    }

    /// A live entry by id.
    pub fn entry(&self, id: &EntryId) -> Option<Entry> {
        self.read()
            .entries
            .get(id.as_str())
            .filter(|e| !e.meta.deleted)
            .cloned()
    }

    /// Most recently created live entries, newest first. Few-shot fodder
    /// for the LLM classifier and learning signals.
    pub fn recent_entries(&self, limit: usize) -> Vec<Entry> {
        let mut entries: Vec<Entry> = self
            .read()
            .entries
            .values()
            .filter(|e| !e.meta.deleted)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.meta.created_at.cmp(&a.meta.created_at));
        entries.truncate(limit);
        entries
    }
}
