//! Wire model for the per-user cloud document and the persisted local blobs
//!
//! The wire types are deliberately distinct from the domain types: crossing
//! the boundary is a total `domain -> wire` function (timestamps become
//! ISO-8601 UTC strings, rationals stay JSON numbers) and a *validating*
//! `wire -> domain` parse. An entity that fails envelope validation is
//! quarantined, meaning excluded from this round with a warning, so one corrupt
//! row never aborts a sync.
//!
//! Tombstones and archived books serialize like any other entity; their
//! flags are what distinguishes them.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};
use crate::ids::{BookId, CategoryId, EntryId, UserId};
use crate::models::{Book, Category, Entry, PaymentMode, SyncMeta};

/// The whole-document payload read from and written to the cloud store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserDocument {
    #[serde(default)]
    pub books: Vec<WireBook>,
    #[serde(default)]
    pub entries: Vec<WireEntry>,
    #[serde(default)]
    pub categories: Vec<WireCategory>,
    /// ISO-8601 instant of the last write.
    #[serde(default)]
    pub last_updated: String,
    /// Cookie written by the pushing replica; lets its own listener
    /// recognize the echo of a push and drop it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_cookie: Option<String>,
}

/// Envelope fields shared by every wire entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMeta {
    pub user_id: String,
    pub version: u64,
    pub last_synced_version: u64,
    pub last_modified_by: String,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireBook {
    pub id: String,
    #[serde(flatten)]
    pub meta: WireMeta,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub currency: String,
    pub locked_exchange_rate: f64,
    pub target_currency: String,
    pub rate_locked_at: String,
    #[serde(default)]
    pub archived: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEntry {
    pub id: String,
    #[serde(flatten)]
    pub meta: WireMeta,
    pub book_id: String,
    pub amount: f64,
    pub currency: String,
    pub category: String,
    #[serde(default)]
    pub party: String,
    pub payment_mode: PaymentMode,
    /// Calendar date, `YYYY-MM-DD`.
    pub date: String,
    pub normalized_amount: f64,
    pub normalized_currency: String,
    pub conversion_rate: f64,
    #[serde(default)]
    pub remarks: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireCategory {
    pub id: String,
    #[serde(flatten)]
    pub meta: WireMeta,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub icon: String,
}

fn to_iso(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn from_iso(s: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Integrity(format!("bad timestamp in {}: {}", field, e)))
}

impl WireMeta {
    fn from_domain(meta: &SyncMeta) -> Self {
        Self {
            user_id: meta.user_id.to_string(),
            version: meta.version,
            last_synced_version: meta.last_synced_version,
            last_modified_by: meta.last_modified_by.to_string(),
            created_at: to_iso(meta.created_at),
            updated_at: to_iso(meta.updated_at),
            deleted: meta.deleted,
            deleted_at: meta.deleted_at.map(to_iso),
        }
    }

    /// Envelope validation: the quarantine gate for cloud payloads.
    fn to_domain(&self, id: &str) -> Result<SyncMeta> {
        if id.is_empty() {
            return Err(Error::Integrity("empty entity id".to_string()));
        }
        if self.user_id.is_empty() {
            return Err(Error::Integrity(format!("{}: empty user_id", id)));
        }
        if self.version == 0 {
            return Err(Error::Integrity(format!("{}: version must be >= 1", id)));
        }
        if self.last_synced_version > self.version {
            return Err(Error::Integrity(format!(
                "{}: last_synced_version {} exceeds version {}",
                id, self.last_synced_version, self.version
            )));
        }
        if self.deleted && self.deleted_at.is_none() {
            return Err(Error::Integrity(format!(
                "{}: tombstone without deleted_at",
                id
            )));
        }
        Ok(SyncMeta {
            user_id: UserId::from(self.user_id.clone()),
            version: self.version,
            last_synced_version: self.last_synced_version,
            last_modified_by: UserId::from(self.last_modified_by.clone()),
            created_at: from_iso(&self.created_at, "created_at")?,
            updated_at: from_iso(&self.updated_at, "updated_at")?,
            deleted: self.deleted,
            deleted_at: self
                .deleted_at
                .as_deref()
                .map(|s| from_iso(s, "deleted_at"))
                .transpose()?,
        })
    }
}

impl WireBook {
    pub fn from_domain(book: &Book) -> Self {
        Self {
            id: book.id.to_string(),
            meta: WireMeta::from_domain(&book.meta),
            name: book.name.clone(),
            description: book.description.clone(),
            currency: book.currency.clone(),
            locked_exchange_rate: book.locked_exchange_rate,
            target_currency: book.target_currency.clone(),
            rate_locked_at: to_iso(book.rate_locked_at),
            archived: book.archived,
            archived_at: book.archived_at.map(to_iso),
        }
    }

    pub fn to_domain(&self) -> Result<Book> {
        if self.currency.is_empty() {
            return Err(Error::Integrity(format!("{}: empty currency", self.id)));
        }
        Ok(Book {
            id: BookId::from(self.id.clone()),
            meta: self.meta.to_domain(&self.id)?,
            name: self.name.clone(),
            description: self.description.clone(),
            currency: self.currency.clone(),
            locked_exchange_rate: self.locked_exchange_rate,
            target_currency: self.target_currency.clone(),
            rate_locked_at: from_iso(&self.rate_locked_at, "rate_locked_at")?,
            archived: self.archived,
            archived_at: self
                .archived_at
                .as_deref()
                .map(|s| from_iso(s, "archived_at"))
                .transpose()?,
        })
    }
}

impl WireEntry {
    pub fn from_domain(entry: &Entry) -> Self {
        Self {
            id: entry.id.to_string(),
            meta: WireMeta::from_domain(&entry.meta),
            book_id: entry.book_id.to_string(),
            amount: entry.amount,
            currency: entry.currency.clone(),
            category: entry.category.to_string(),
            party: entry.party.clone(),
            payment_mode: entry.payment_mode,
            date: entry.date.format("%Y-%m-%d").to_string(),
            normalized_amount: entry.normalized_amount,
            normalized_currency: entry.normalized_currency.clone(),
            conversion_rate: entry.conversion_rate,
            remarks: entry.remarks.clone(),
        }
    }

    pub fn to_domain(&self) -> Result<Entry> {
        if self.book_id.is_empty() {
            return Err(Error::Integrity(format!("{}: empty book_id", self.id)));
        }
        if self.category.is_empty() {
            return Err(Error::Integrity(format!("{}: empty category", self.id)));
        }
        let date = NaiveDate::parse_from_str(&self.date, "%Y-%m-%d")
            .map_err(|e| Error::Integrity(format!("{}: bad date: {}", self.id, e)))?;
        Ok(Entry {
            id: EntryId::from(self.id.clone()),
            meta: self.meta.to_domain(&self.id)?,
            book_id: BookId::from(self.book_id.clone()),
            amount: self.amount,
            currency: self.currency.clone(),
            category: CategoryId::from(self.category.clone()),
            party: self.party.clone(),
            payment_mode: self.payment_mode,
            date,
            normalized_amount: self.normalized_amount,
            normalized_currency: self.normalized_currency.clone(),
            conversion_rate: self.conversion_rate,
            remarks: self.remarks.clone(),
        })
    }
}

impl WireCategory {
    pub fn from_domain(category: &Category) -> Self {
        Self {
            id: category.id.to_string(),
            meta: WireMeta::from_domain(&category.meta),
            name: category.name.clone(),
            description: category.description.clone(),
            color: category.color.clone(),
            icon: category.icon.clone(),
        }
    }

    pub fn to_domain(&self) -> Result<Category> {
        if self.name.is_empty() {
            return Err(Error::Integrity(format!("{}: empty name", self.id)));
        }
        Ok(Category {
            id: CategoryId::from(self.id.clone()),
            meta: self.meta.to_domain(&self.id)?,
            name: self.name.clone(),
            description: self.description.clone(),
            color: self.color.clone(),
            icon: self.icon.clone(),
        })
    }
}

/// Parse a wire collection, quarantining entities that fail validation.
/// Returns the parsed entities and how many were dropped.
pub fn parse_lenient<W, T>(
    items: &[W],
    kind: &str,
    parse: impl Fn(&W) -> Result<T>,
) -> (Vec<T>, usize) {
    let mut parsed = Vec::with_capacity(items.len());
    let mut quarantined = 0;
    for item in items {
        match parse(item) {
            Ok(entity) => parsed.push(entity),
            Err(e) => {
                quarantined += 1;
                warn!(kind, error = %e, "Quarantined entity from payload");
            }
        }
    }
    (parsed, quarantined)
}

/// Serialize the three domain collections into a cloud document.
pub fn document_from_domain(
    books: &[Book],
    entries: &[Entry],
    categories: &[Category],
    now: DateTime<Utc>,
    sync_cookie: Option<String>,
) -> UserDocument {
    UserDocument {
        books: books.iter().map(WireBook::from_domain).collect(),
        entries: entries.iter().map(WireEntry::from_domain).collect(),
        categories: categories.iter().map(WireCategory::from_domain).collect(),
        last_updated: to_iso(now),
        sync_cookie,
    }
}

/// Parsed cloud document with quarantine accounting.
#[derive(Debug, Clone, Default)]
pub struct ParsedDocument {
    pub books: Vec<Book>,
    pub entries: Vec<Entry>,
    pub categories: Vec<Category>,
    pub quarantined: usize,
}

/// Parse a cloud document leniently; corrupt entities are dropped with a
/// warning so the rest of the sync proceeds.
pub fn document_to_domain(doc: &UserDocument) -> ParsedDocument {
    let (books, q1) = parse_lenient(&doc.books, "book", WireBook::to_domain);
    let (entries, q2) = parse_lenient(&doc.entries, "entry", WireEntry::to_domain);
    let (categories, q3) = parse_lenient(&doc.categories, "category", WireCategory::to_domain);
    ParsedDocument {
        books,
        entries,
        categories,
        quarantined: q1 + q2 + q3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_book() -> Book {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap();
        Book {
            id: BookId::from("b1"),
            meta: SyncMeta {
                user_id: UserId::from("u1"),
                version: 3,
                last_synced_version: 2,
                last_modified_by: UserId::from("u1"),
                created_at: t,
                updated_at: t,
                deleted: false,
                deleted_at: None,
            },
            name: "Travel".to_string(),
            description: "Trips".to_string(),
            currency: "SGD".to_string(),
            locked_exchange_rate: 54.31,
            target_currency: "INR".to_string(),
            rate_locked_at: t,
            archived: false,
            archived_at: None,
        }
    }

    fn sample_entry() -> Entry {
        let t = Utc.with_ymd_and_hms(2024, 3, 2, 9, 0, 0).unwrap();
        Entry {
            id: EntryId::from("e1"),
            meta: SyncMeta {
                user_id: UserId::from("u1"),
                version: 1,
                last_synced_version: 0,
                last_modified_by: UserId::from("u1"),
                created_at: t,
                updated_at: t,
                deleted: false,
                deleted_at: None,
            },
            book_id: BookId::from("b1"),
            amount: -42.5,
            currency: "SGD".to_string(),
            category: CategoryId::from("c1"),
            party: "Hawker stall".to_string(),
            payment_mode: PaymentMode::Cash,
            date: NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(),
            normalized_amount: -2308.18,
            normalized_currency: "INR".to_string(),
            conversion_rate: 54.31,
            remarks: String::new(),
        }
    }

    #[test]
    fn book_roundtrip() {
        let book = sample_book();
        let wire = WireBook::from_domain(&book);
        assert_eq!(wire.rate_locked_at, "2024-03-01T08:30:00.000Z");
        let back = wire.to_domain().unwrap();
        assert_eq!(back, book);
    }

    #[test]
    fn entry_roundtrip_preserves_date_and_amounts() {
        let entry = sample_entry();
        let wire = WireEntry::from_domain(&entry);
        assert_eq!(wire.date, "2024-03-02");
        let back = wire.to_domain().unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn tombstone_serializes_like_any_entity() {
        let mut book = sample_book();
        book.meta.deleted = true;
        book.meta.deleted_at = Some(book.meta.updated_at);

        let doc = document_from_domain(&[book], &[], &[], Utc::now(), None);
        let json = serde_json::to_string(&doc).unwrap();
        let parsed: UserDocument = serde_json::from_str(&json).unwrap();
        let out = document_to_domain(&parsed);
        assert_eq!(out.quarantined, 0);
        assert!(out.books[0].meta.deleted);
        assert!(out.books[0].meta.deleted_at.is_some());
    }

    #[test]
    fn zero_version_is_quarantined() {
        let mut wire = WireBook::from_domain(&sample_book());
        wire.meta.version = 0;
        let doc = UserDocument {
            books: vec![wire, WireBook::from_domain(&sample_book())],
            ..Default::default()
        };
        let out = document_to_domain(&doc);
        assert_eq!(out.quarantined, 1);
        assert_eq!(out.books.len(), 1);
    }

    #[test]
    fn lsv_above_version_is_quarantined() {
        let mut wire = WireBook::from_domain(&sample_book());
        wire.meta.last_synced_version = wire.meta.version + 1;
        let out = document_to_domain(&UserDocument {
            books: vec![wire],
            ..Default::default()
        });
        assert_eq!(out.quarantined, 1);
        assert!(out.books.is_empty());
    }

    #[test]
    fn tombstone_without_timestamp_is_quarantined() {
        let mut wire = WireBook::from_domain(&sample_book());
        wire.meta.deleted = true;
        wire.meta.deleted_at = None;
        let out = document_to_domain(&UserDocument {
            books: vec![wire],
            ..Default::default()
        });
        assert_eq!(out.quarantined, 1);
    }

    #[test]
    fn bad_timestamp_is_quarantined_not_fatal() {
        let mut wire = WireEntry::from_domain(&sample_entry());
        wire.meta.created_at = "yesterday-ish".to_string();
        let out = document_to_domain(&UserDocument {
            entries: vec![wire, WireEntry::from_domain(&sample_entry())],
            ..Default::default()
        });
        assert_eq!(out.quarantined, 1);
        assert_eq!(out.entries.len(), 1);
    }

    #[test]
    fn document_json_shape() {
        let doc = document_from_domain(
            &[sample_book()],
            &[sample_entry()],
            &[],
            Utc.with_ymd_and_hms(2024, 3, 2, 10, 0, 0).unwrap(),
            Some("cookie-1".to_string()),
        );
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["last_updated"], "2024-03-02T10:00:00.000Z");
        assert_eq!(value["sync_cookie"], "cookie-1");
        assert_eq!(value["books"][0]["currency"], "SGD");
        // Envelope fields are flattened into the entity object.
        assert_eq!(value["books"][0]["version"], 3);
        assert_eq!(value["entries"][0]["amount"], -42.5);
    }
}
