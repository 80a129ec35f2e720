//! Book operations

use serde_json::json;
use tracing::info;

use crate::error::{Error, Result};
use crate::fx::round_half_even;
use crate::ids::BookId;
use crate::models::{Book, BookPatch, EntityKind, SyncMeta};

use super::{ChangeOp, LedgerStore};

impl LedgerStore {
    /// Create a book, locking its exchange rate against the user's default
    /// currency at creation time.
    pub async fn create_book(
        &self,
        name: &str,
        description: &str,
        currency: &str,
    ) -> Result<Book> {
        if name.trim().is_empty() {
            return Err(Error::Validation("book name must not be empty".into()));
        }
        if currency.trim().is_empty() {
            return Err(Error::Validation("book currency is mandatory".into()));
        }

        let currency = currency.trim().to_uppercase();
        let (target_currency, overrides) = {
            let state = self.read();
            (
                state.prefs.default_currency.clone(),
                state.prefs.custom_rates.clone(),
            )
        };
        let rate = self
            .fx
            .rate(&currency, &target_currency, None, &overrides)
            .await?;

        let now = self.now();
        let book = Book {
            id: BookId::generate(),
            meta: SyncMeta::new(self.user(), now),
            name: name.trim().to_string(),
            description: description.to_string(),
            currency,
            locked_exchange_rate: rate,
            target_currency,
            rate_locked_at: now,
            archived: false,
            archived_at: None,
        };

        let mut state = self.write();
        state.books.insert(book.id.to_string(), book.clone());
        if let Err(e) = self.persist_books(&state) {
            state.books.remove(book.id.as_str());
            return Err(e);
        }
        drop(state);

        self.cache.invalidate("books");
        self.notify(EntityKind::Book, ChangeOp::Created, book.id.as_str());
        info!(book = %book.id, rate = book.locked_exchange_rate, "Created book");
        Ok(book)
    }

    /// Apply a patch to a live book. Tombstones cannot be edited, and
    /// deletion never travels through update.
    pub fn update_book(&self, id: &BookId, patch: BookPatch) -> Result<Book> {
        let mut state = self.write();
        let book = state
            .books
            .get(id.as_str())
            .ok_or_else(|| Error::NotFound(format!("book {}", id)))?;
        if book.meta.deleted {
            return Err(Error::Validation(format!("book {} is deleted", id)));
        }
        if patch.name.is_none() && patch.description.is_none() {
            return Ok(book.clone());
        }
        if patch.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(Error::Validation("book name must not be empty".into()));
        }

        let previous = book.clone();
        let now = self.now();
        let user = self.user().clone();
        let book = state.books.get_mut(id.as_str()).expect("checked above");
        if let Some(name) = patch.name {
            book.name = name.trim().to_string();
        }
        if let Some(description) = patch.description {
            book.description = description;
        }
        book.meta.touch(&user, now);
        let updated = book.clone();

        if let Err(e) = self.persist_books(&state) {
            state.books.insert(id.to_string(), previous);
            return Err(e);
        }
        drop(state);

        self.cache.invalidate("books");
        self.notify(EntityKind::Book, ChangeOp::Updated, id.as_str());
        Ok(updated)
    }

    /// Hide a book from active lists and the classifier. Data stays.
    pub fn archive_book(&self, id: &BookId) -> Result<Book> {
        self.set_archived(id, true)
    }

    pub fn unarchive_book(&self, id: &BookId) -> Result<Book> {
        self.set_archived(id, false)
    }

    fn set_archived(&self, id: &BookId, archived: bool) -> Result<Book> {
        let mut state = self.write();
        let book = state
            .books
            .get(id.as_str())
            .ok_or_else(|| Error::NotFound(format!("book {}", id)))?;
        if book.meta.deleted {
            return Err(Error::Validation(format!("book {} is deleted", id)));
        }
        let previous = book.clone();
        let now = self.now();

        let book = state.books.get_mut(id.as_str()).expect("checked above");
        book.archived = archived;
        book.archived_at = archived.then_some(now);
        book.meta.touch(&self.user().clone(), now);
        let updated = book.clone();

        if let Err(e) = self.persist_books(&state) {
            state.books.insert(id.to_string(), previous);
            return Err(e);
        }
        drop(state);

        self.cache.invalidate("books");
        self.notify(EntityKind::Book, ChangeOp::Updated, id.as_str());
        Ok(updated)
    }

    /// Tombstone a book. The tombstone is retained and keeps syncing so
    /// the deletion reaches every replica.
    pub fn delete_book(&self, id: &BookId) -> Result<()> {
        let mut state = self.write();
        let book = state
            .books
            .get(id.as_str())
            .ok_or_else(|| Error::NotFound(format!("book {}", id)))?;
        if book.meta.deleted {
            return Ok(());
        }
        let previous = book.clone();
        let now = self.now();

        let book = state.books.get_mut(id.as_str()).expect("checked above");
        book.meta.bury(&self.user().clone(), now);

        if let Err(e) = self.persist_books(&state) {
            state.books.insert(id.to_string(), previous);
            return Err(e);
        }
        drop(state);

        self.cache.invalidate("books");
        self.notify(EntityKind::Book, ChangeOp::Deleted, id.as_str());
        info!(book = %id, "Deleted book");
        Ok(())
    }

    /// Edit a book's locked exchange rate. Every entry of the book whose
    /// currency matches is renormalized at the new rate, and the book's
    /// entry cache pattern is invalidated.
    pub fn set_book_rate(&self, id: &BookId, rate: f64) -> Result<Book> {
        if rate <= 0.0 {
            return Err(Error::Validation(format!(
                "exchange rate must be positive, got {}",
                rate
            )));
        }

        let mut state = self.write();
        let book = state
            .books
            .get(id.as_str())
            .ok_or_else(|| Error::NotFound(format!("book {}", id)))?;
        if book.meta.deleted {
            return Err(Error::Validation(format!("book {} is deleted", id)));
        }
        let previous_book = book.clone();
        let book_currency = book.currency.clone();
        let target_currency = book.target_currency.clone();
        let now = self.now();
        let user = self.user().clone();

        let book = state.books.get_mut(id.as_str()).expect("checked above");
        book.locked_exchange_rate = rate;
        book.rate_locked_at = now;
        book.meta.touch(&user, now);
        let updated = book.clone();

        // Renormalize the book's entries at the new rate.
        let mut previous_entries = Vec::new();
        let mut recomputed = 0;
        for entry in state.entries.values_mut() {
            if entry.book_id != *id || entry.meta.deleted || entry.currency != book_currency {
                continue;
            }
            previous_entries.push(entry.clone());
            entry.conversion_rate = rate;
            entry.normalized_amount = round_half_even(entry.amount * rate, 4);
            entry.normalized_currency = target_currency.clone();
            entry.meta.touch(&user, now);
            recomputed += 1;
        }

        let persisted = self
            .persist_books(&state)
            .and_then(|_| self.persist_entries(&state));
        if let Err(e) = persisted {
            state.books.insert(id.to_string(), previous_book);
            for entry in previous_entries {
                state.entries.insert(entry.id.to_string(), entry);
            }
            return Err(e);
        }
        drop(state);

        self.cache.invalidate("books");
        self.cache.invalidate(&format!("entries:bookId:{}", id));
        self.cache.invalidate("entries");
        self.notify(EntityKind::Book, ChangeOp::Updated, id.as_str());
        info!(book = %id, rate, recomputed, "Updated locked rate");
        Ok(updated)
    }

    // ------------------------------------------------------------------
    // Read views
    // ------------------------------------------------------------------

    /// Live view: excludes tombstones and archived books.
    pub fn live_books(&self) -> Vec<Book> {
        let cache_key = format!("books:userId:{}", self.user());
        if let Some(value) = self.cache.get(&cache_key) {
            if let Ok(books) = serde_json::from_value::<Vec<Book>>(value) {
                return books;
            }
        }

        let state = self.read();
        let books: Vec<Book> = state
            .books
            .values()
            .filter(|b| !b.meta.deleted && !b.archived)
            .cloned()
            .collect();
        drop(state);

        self.cache.put(&cache_key, json!(books));
        books
    }

    /// Archived, non-deleted books.
    pub fn archived_books(&self) -> Vec<Book> {
        self.read()
            .books
            .values()
            .filter(|b| !b.meta.deleted && b.archived)
            .cloned()
            .collect()
    }

    /// Everything, tombstones included (sync path).
    pub fn all_books(&self) -> Vec<Book> {
        self.read().books.values().cloned().collect()
    }

    /// A live (non-deleted) book by id, archived or not.
    pub fn book(&self, id: &BookId) -> Option<Book> {
        self.read()
            .books
            .get(id.as_str())
            .filter(|b| !b.meta.deleted)
            .cloned()
    }

    /// Books the classifier may propose: owned, live, not archived.
    pub fn classifier_candidate_books(&self) -> Vec<Book> {
        let user = self.user().clone();
        self.read()
            .books
            .values()
            .filter(|b| !b.meta.deleted && !b.archived && b.meta.user_id == user)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::store;
    use super::*;

    #[tokio::test]
    async fn create_book_locks_rate_at_creation() {
        let s = store();
        let book = s.create_book("Singapore", "Trip to SG", "SGD").await.unwrap();
        assert_eq!(book.currency, "SGD");
        assert_eq!(book.locked_exchange_rate, 54.31);
        assert_eq!(book.target_currency, "INR");
        assert_eq!(book.meta.version, 1);
        assert_eq!(book.meta.last_synced_version, 0);
    }

    #[tokio::test]
    async fn create_book_same_currency_locks_identity_rate() {
        let s = store();
        let book = s.create_book("Daily", "", "INR").await.unwrap();
        assert_eq!(book.locked_exchange_rate, 1.0);
    }

    #[tokio::test]
    async fn create_book_requires_name_and_currency() {
        let s = store();
        assert!(matches!(
            s.create_book("  ", "", "INR").await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            s.create_book("Food", "", "").await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn update_bumps_version() {
        let s = store();
        let book = s.create_book("Food", "", "INR").await.unwrap();
        let updated = s
            .update_book(
                &book.id,
                BookPatch {
                    name: Some("Food & Drink".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.name, "Food & Drink");
        assert_eq!(updated.meta.version, 2);
    }

    #[tokio::test]
    async fn empty_patch_is_a_noop() {
        let s = store();
        let book = s.create_book("Food", "", "INR").await.unwrap();
        let same = s.update_book(&book.id, BookPatch::default()).unwrap();
        assert_eq!(same.meta.version, 1);
    }

    #[tokio::test]
    async fn archive_hides_from_live_view() {
        let s = store();
        let book = s.create_book("Oct", "", "INR").await.unwrap();
        s.archive_book(&book.id).unwrap();

        assert!(s.live_books().is_empty());
        assert_eq!(s.archived_books().len(), 1);
        // Archived is not deleted: the book is still addressable.
        assert!(s.book(&book.id).is_some());

        s.unarchive_book(&book.id).unwrap();
        assert_eq!(s.live_books().len(), 1);
    }

    #[tokio::test]
    async fn delete_leaves_a_tombstone() {
        let s = store();
        let book = s.create_book("Food", "", "INR").await.unwrap();
        s.delete_book(&book.id).unwrap();

        assert!(s.live_books().is_empty());
        assert!(s.book(&book.id).is_none());

        let all = s.all_books();
        assert_eq!(all.len(), 1);
        assert!(all[0].meta.deleted);
        assert!(all[0].meta.deleted_at.is_some());
        assert_eq!(all[0].meta.version, 2);
    }

    #[tokio::test]
    async fn update_rejects_tombstone() {
        let s = store();
        let book = s.create_book("Food", "", "INR").await.unwrap();
        s.delete_book(&book.id).unwrap();
        assert!(matches!(
            s.update_book(
                &book.id,
                BookPatch {
                    name: Some("Zombie".to_string()),
                    ..Default::default()
                }
            ),
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn cache_reflects_mutation_immediately() {
        let s = store();
        let book = s.create_book("Food", "", "INR").await.unwrap();
        assert_eq!(s.live_books().len(), 1); // primes the cache

        s.update_book(
            &book.id,
            BookPatch {
                name: Some("Renamed".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(s.live_books()[0].name, "Renamed");

        s.delete_book(&book.id).unwrap();
        assert!(s.live_books().is_empty());
    }

    #[tokio::test]
    async fn set_book_rate_recomputes_entries() {
        use crate::store::NewEntry;

        let s = store();
        let book = s.create_book("Singapore", "", "SGD").await.unwrap();
        let cat = s.live_categories()[0].clone();
        for amount in [-10.0, -25.5, 40.0] {
            s.create_entry(NewEntry {
                book_id: book.id.clone(),
                amount,
                category: cat.id.clone(),
                party: String::new(),
                payment_mode: Default::default(),
                date: chrono::NaiveDate::from_ymd_opt(2024, 10, 1).unwrap(),
                remarks: String::new(),
            })
            .await
            .unwrap();
        }

        let updated = s.set_book_rate(&book.id, 70.0).unwrap();
        assert_eq!(updated.locked_exchange_rate, 70.0);
        assert_eq!(updated.meta.version, 2);
        assert!(updated.rate_locked_at >= book.rate_locked_at);

        for entry in s.entries_for_book(&book.id) {
            assert_eq!(entry.conversion_rate, 70.0);
            assert_eq!(
                entry.normalized_amount,
                crate::fx::round_half_even(entry.amount * 70.0, 4)
            );
        }
    }

    #[tokio::test]
    async fn rate_must_be_positive() {
        let s = store();
        let book = s.create_book("Food", "", "INR").await.unwrap();
        assert!(matches!(
            s.set_book_rate(&book.id, -1.0),
            Err(Error::Validation(_))
        ));
    }
}
