//! Domain models for Tally

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ids::{BookId, CategoryId, EntryId, PendingId, UserId};

/// Replication envelope shared by every synced entity.
///
/// `version` increases on every mutation; `last_synced_version` is the cloud
/// version this replica last reconciled against and may lag `version`. The
/// `deleted`/`deleted_at` pair is the tombstone discriminator: a tombstoned
/// entity keeps syncing like any other so deletions propagate to every
/// device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMeta {
    pub user_id: UserId,
    pub version: u64,
    pub last_synced_version: u64,
    pub last_modified_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl SyncMeta {
    /// Envelope for a freshly created entity: version 1, never synced.
    pub fn new(user: &UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user.clone(),
            version: 1,
            last_synced_version: 0,
            last_modified_by: user.clone(),
            created_at: now,
            updated_at: now,
            deleted: false,
            deleted_at: None,
        }
    }

    /// Bump for a mutation: version + 1, updated stamp, writer identity.
    pub fn touch(&mut self, user: &UserId, now: DateTime<Utc>) {
        self.version += 1;
        self.updated_at = now;
        self.last_modified_by = user.clone();
    }

    /// Turn the envelope into a tombstone.
    pub fn bury(&mut self, user: &UserId, now: DateTime<Utc>) {
        self.touch(user, now);
        self.deleted = true;
        self.deleted_at = Some(now);
    }

    /// Whether this replica has mutations the cloud has not seen.
    pub fn locally_changed(&self) -> bool {
        self.version > self.last_synced_version
    }
}

/// A named ledger in a single currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: BookId,
    pub meta: SyncMeta,
    pub name: String,
    /// Free text; feeds the classifier's semantic matching.
    pub description: String,
    /// ISO currency code, fixed at creation.
    pub currency: String,
    /// Rate captured at creation against the user's default currency.
    /// Changes only through an explicit rate edit.
    pub locked_exchange_rate: f64,
    /// The currency the locked rate converts *to*.
    pub target_currency: String,
    pub rate_locked_at: DateTime<Utc>,
    /// Hidden from active lists and the classifier, data preserved.
    /// Distinct from deletion.
    pub archived: bool,
    pub archived_at: Option<DateTime<Utc>>,
}

/// A single ledger line within exactly one book.
///
/// The amount sign encodes direction: income (+) vs expense (-).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub meta: SyncMeta,
    pub book_id: BookId,
    pub amount: f64,
    /// Always equals the owning book's currency; derived, never user-set.
    pub currency: String,
    pub category: CategoryId,
    /// Free-text counterparty.
    pub party: String,
    pub payment_mode: PaymentMode,
    /// User-supplied transaction date, distinct from `created_at`.
    pub date: NaiveDate,
    /// `amount * conversion_rate`, denormalized so aggregation never needs
    /// a per-query FX lookup.
    pub normalized_amount: f64,
    pub normalized_currency: String,
    /// The rate actually used for normalization.
    pub conversion_rate: f64,
    pub remarks: String,
}

/// A user-owned bucket assigned to entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub meta: SyncMeta,
    pub name: String,
    /// Free text; feeds the classifier's semantic matching.
    pub description: String,
    pub color: String,
    pub icon: String,
}

/// Name of the undeletable system category every user falls back to.
pub const OTHERS_CATEGORY_NAME: &str = "Others";

impl Category {
    /// Whether this is the system-provided "Others" fallback.
    pub fn is_default_others(&self) -> bool {
        self.name == OTHERS_CATEGORY_NAME && self.meta.user_id == UserId::default_owner()
    }
}

/// Payment instrument inferred for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMode {
    Upi,
    Card,
    #[default]
    Cash,
    BankTransfer,
    Wallet,
}

impl PaymentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upi => "upi",
            Self::Card => "card",
            Self::Cash => "cash",
            Self::BankTransfer => "bank_transfer",
            Self::Wallet => "wallet",
        }
    }
}

impl std::str::FromStr for PaymentMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "upi" => Ok(Self::Upi),
            "card" => Ok(Self::Card),
            "cash" => Ok(Self::Cash),
            "bank_transfer" | "transfer" | "bank" => Ok(Self::BankTransfer),
            "wallet" => Ok(Self::Wallet),
            _ => Err(format!("Unknown payment mode: {}", s)),
        }
    }
}

impl std::fmt::Display for PaymentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a transaction reached the ingest pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IngestSource {
    Sms,
    #[default]
    Manual,
    Csv,
}

impl IngestSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sms => "sms",
            Self::Manual => "manual",
            Self::Csv => "csv",
        }
    }
}

impl std::str::FromStr for IngestSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sms" => Ok(Self::Sms),
            "manual" => Ok(Self::Manual),
            "csv" => Ok(Self::Csv),
            _ => Err(format!("Unknown ingest source: {}", s)),
        }
    }
}

impl std::fmt::Display for IngestSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A transaction parsed out of an SMS, CSV row, or manual entry, before
/// classification and user approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedTransaction {
    /// Negative = expense, positive = income
    pub amount: f64,
    pub description: String,
    pub date: NaiveDate,
    /// ISO code when the source carries one (e.g. an SMS with "SGD 12.50")
    pub currency: Option<String>,
    pub source: IngestSource,
}

/// Confidence bucket for a prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    /// Bucket a raw [0, 1] score: high >= 0.80, medium >= 0.50.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.80 {
            Self::High
        } else if score >= 0.50 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The classifier's proposal for a pending transaction.
///
/// Every id in here references an entity that existed in the local replica
/// at the moment of prediction; classification never creates entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub book_id: BookId,
    pub category_id: CategoryId,
    pub payment_mode: PaymentMode,
    /// Raw score in [0, 1].
    pub confidence: f64,
    /// Which scoring axes fired, for display and debugging.
    pub signals: Vec<String>,
}

impl Prediction {
    pub fn bucket(&self) -> Confidence {
        Confidence::from_score(self.confidence)
    }
}

/// A parsed transaction awaiting user approval. Local-only, never
/// replicated; destroyed on approve (which creates an [`Entry`]) or reject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingTransaction {
    pub id: PendingId,
    pub user_id: UserId,
    pub transaction: ParsedTransaction,
    pub prediction: Prediction,
    /// SHA-256 over (date, amount, description); re-ingesting the same
    /// source line is a no-op.
    pub ingest_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Patch for `update_book`. `None` fields are left untouched.
///
/// Neither the locked rate (edited through `set_book_rate`, which also
/// recomputes entries) nor the archive flag (its own operation) nor the
/// tombstone flag appear here.
#[derive(Debug, Clone, Default)]
pub struct BookPatch {
    pub name: Option<String>,
    pub description: Option<String>,
}

/// Patch for `update_entry`.
#[derive(Debug, Clone, Default)]
pub struct EntryPatch {
    pub amount: Option<f64>,
    pub category: Option<CategoryId>,
    pub party: Option<String>,
    pub payment_mode: Option<PaymentMode>,
    pub date: Option<NaiveDate>,
    pub remarks: Option<String>,
}

/// Patch for `update_category`.
#[derive(Debug, Clone, Default)]
pub struct CategoryPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
    pub icon: Option<String>,
}

/// Per-user preferences, persisted locally as a single blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPreferences {
    /// Normalization target and FX default.
    pub default_currency: String,
    /// Fallback when no payment-mode keyword fires.
    pub default_payment_mode: PaymentMode,
    /// Whether the optional LLM classification step may run.
    pub llm_enabled: bool,
    /// User rate overrides keyed "FROM:TO".
    pub custom_rates: HashMap<String, f64>,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            default_currency: "INR".to_string(),
            default_payment_mode: PaymentMode::Cash,
            llm_enabled: false,
            custom_rates: HashMap::new(),
        }
    }
}

impl UserPreferences {
    /// Key format used by `custom_rates`.
    pub fn rate_key(from: &str, to: &str) -> String {
        format!("{}:{}", from.to_uppercase(), to.to_uppercase())
    }
}

/// Entity kinds, used by conflict descriptors and cache keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Book,
    Entry,
    Category,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Book => "book",
            Self::Entry => "entry",
            Self::Category => "category",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> SyncMeta {
        SyncMeta::new(&UserId::from("user-1"), Utc::now())
    }

    #[test]
    fn new_meta_starts_unsynced() {
        let m = meta();
        assert_eq!(m.version, 1);
        assert_eq!(m.last_synced_version, 0);
        assert!(!m.deleted);
        assert!(m.deleted_at.is_none());
        assert!(m.locally_changed());
    }

    #[test]
    fn touch_bumps_version_and_writer() {
        let mut m = meta();
        let editor = UserId::from("user-2");
        let now = Utc::now();
        m.touch(&editor, now);
        assert_eq!(m.version, 2);
        assert_eq!(m.last_modified_by, editor);
        assert_eq!(m.updated_at, now);
    }

    #[test]
    fn bury_sets_tombstone_pair() {
        let mut m = meta();
        let now = Utc::now();
        m.bury(&UserId::from("user-1"), now);
        assert!(m.deleted);
        assert_eq!(m.deleted_at, Some(now));
        assert_eq!(m.version, 2);
    }

    #[test]
    fn locally_changed_tracks_sync_point() {
        let mut m = meta();
        m.last_synced_version = m.version;
        assert!(!m.locally_changed());
        m.touch(&UserId::from("user-1"), Utc::now());
        assert!(m.locally_changed());
    }

    #[test]
    fn confidence_buckets() {
        assert_eq!(Confidence::from_score(0.95), Confidence::High);
        assert_eq!(Confidence::from_score(0.80), Confidence::High);
        assert_eq!(Confidence::from_score(0.79), Confidence::Medium);
        assert_eq!(Confidence::from_score(0.50), Confidence::Medium);
        assert_eq!(Confidence::from_score(0.49), Confidence::Low);
        assert_eq!(Confidence::from_score(0.0), Confidence::Low);
    }

    #[test]
    fn payment_mode_roundtrip() {
        for mode in [
            PaymentMode::Upi,
            PaymentMode::Card,
            PaymentMode::Cash,
            PaymentMode::BankTransfer,
            PaymentMode::Wallet,
        ] {
            let parsed: PaymentMode = mode.as_str().parse().unwrap();
            assert_eq!(parsed, mode);
        }
        assert!("telepathy".parse::<PaymentMode>().is_err());
    }

    #[test]
    fn ingest_source_roundtrip() {
        for source in [IngestSource::Sms, IngestSource::Manual, IngestSource::Csv] {
            let parsed: IngestSource = source.as_str().parse().unwrap();
            assert_eq!(parsed, source);
        }
    }

    #[test]
    fn default_others_detection() {
        let now = Utc::now();
        let mut cat = Category {
            id: CategoryId::generate(),
            meta: SyncMeta::new(&UserId::default_owner(), now),
            name: OTHERS_CATEGORY_NAME.to_string(),
            description: "Everything else".to_string(),
            color: "#9e9e9e".to_string(),
            icon: "more_horiz".to_string(),
        };
        assert!(cat.is_default_others());

        cat.meta.user_id = UserId::from("user-1");
        assert!(!cat.is_default_others());
    }

    #[test]
    fn rate_key_is_case_insensitive() {
        assert_eq!(UserPreferences::rate_key("sgd", "inr"), "SGD:INR");
    }
}
