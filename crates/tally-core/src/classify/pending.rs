//! Pending transaction lifecycle
//!
//! Ingest parses land here with a prediction attached and wait for the
//! user. Approve writes a real entry (re-validated by the store) and
//! teaches the learning store; edit-then-approve teaches the corrected
//! mapping; reject un-teaches it. Either way the pending row is destroyed.
//! Pending transactions are local-only and never replicated.

use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::ids::{BookId, CategoryId, PendingId};
use crate::kv::{keys, LocalStore};
use crate::models::{Entry, ParsedTransaction, PaymentMode, PendingTransaction};
use crate::store::{LedgerStore, NewEntry};

use super::learning::{normalize_merchant, LearningStore};
use super::Classifier;

/// Hash for ingest deduplication: same (date, amount, description) means
/// the same source line.
pub fn ingest_hash(tx: &ParsedTransaction) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tx.date.format("%Y-%m-%d").to_string());
    hasher.update("|");
    hasher.update(format!("{:.4}", tx.amount));
    hasher.update("|");
    hasher.update(tx.description.trim().to_lowercase());
    hex::encode(hasher.finalize())
}

/// Fields the user may change at approval time.
#[derive(Debug, Clone, Default)]
pub struct ApprovalEdits {
    pub book_id: Option<BookId>,
    pub category_id: Option<CategoryId>,
    pub payment_mode: Option<PaymentMode>,
    pub amount: Option<f64>,
}

impl ApprovalEdits {
    fn is_empty(&self) -> bool {
        self.book_id.is_none()
            && self.category_id.is_none()
            && self.payment_mode.is_none()
            && self.amount.is_none()
    }
}

/// The queue of transactions awaiting user approval.
pub struct PendingQueue {
    kv: Arc<dyn LocalStore>,
    store: Arc<LedgerStore>,
    learning: Arc<LearningStore>,
}

impl PendingQueue {
    pub fn new(
        kv: Arc<dyn LocalStore>,
        store: Arc<LedgerStore>,
        learning: Arc<LearningStore>,
    ) -> Self {
        Self {
            kv,
            store,
            learning,
        }
    }

    /// Classify and queue a parsed transaction. Returns `None` when the
    /// same source line was already ingested.
    pub async fn ingest(
        &self,
        classifier: &Classifier,
        tx: ParsedTransaction,
    ) -> Result<Option<PendingTransaction>> {
        let hash = ingest_hash(&tx);
        let mut list = self.load()?;
        if list.iter().any(|p| p.ingest_hash == hash) {
            debug!(hash = %hash, "Duplicate ingest skipped");
            return Ok(None);
        }

        let prediction = classifier.classify(&tx).await?;
        let pending = PendingTransaction {
            id: PendingId::generate(),
            user_id: self.store.user().clone(),
            transaction: tx,
            prediction,
            ingest_hash: hash,
            created_at: Utc::now(),
        };
        list.push(pending.clone());
        self.save(&list)?;
        Ok(Some(pending))
    }

    pub fn list(&self) -> Result<Vec<PendingTransaction>> {
        self.load()
    }

    pub fn get(&self, id: &PendingId) -> Result<PendingTransaction> {
        self.load()?
            .into_iter()
            .find(|p| p.id == *id)
            .ok_or_else(|| Error::NotFound(format!("pending transaction {}", id)))
    }

    /// Approve as predicted.
    pub async fn approve(&self, id: &PendingId) -> Result<Entry> {
        self.approve_edited(id, ApprovalEdits::default()).await
    }

    /// Approve with user corrections. The entry is written through the
    /// store (which re-validates the referenced book and category), and
    /// the final ids (corrected or not) are what the learning store
    /// records.
    pub async fn approve_edited(&self, id: &PendingId, edits: ApprovalEdits) -> Result<Entry> {
        let pending = self.get(id)?;
        let corrected = !edits.is_empty();

        let book_id = edits.book_id.unwrap_or(pending.prediction.book_id.clone());
        let category_id = edits
            .category_id
            .unwrap_or(pending.prediction.category_id.clone());
        let entry = self
            .store
            .create_entry(NewEntry {
                book_id,
                amount: edits.amount.unwrap_or(pending.transaction.amount),
                category: category_id,
                party: normalize_merchant(&pending.transaction.description),
                payment_mode: edits
                    .payment_mode
                    .unwrap_or(pending.prediction.payment_mode),
                date: pending.transaction.date,
                remarks: pending.transaction.description.clone(),
            })
            .await?;

        self.learning.record_approval(
            &pending.transaction.description,
            &entry.book_id,
            &entry.category,
        )?;

        let mut list = self.load()?;
        list.retain(|p| p.id != *id);
        self.save(&list)?;
        info!(pending = %id, entry = %entry.id, corrected, "Approved pending transaction");
        Ok(entry)
    }

    /// Reject: un-teach the mapping and destroy the pending row.
    pub fn reject(&self, id: &PendingId) -> Result<()> {
        let pending = self.get(id)?;
        self.learning
            .record_rejection(&pending.transaction.description)?;

        let mut list = self.load()?;
        list.retain(|p| p.id != *id);
        self.save(&list)?;
        info!(pending = %id, "Rejected pending transaction");
        Ok(())
    }

    fn load(&self) -> Result<Vec<PendingTransaction>> {
        match self.kv.get(keys::PENDING)? {
            Some(blob) => Ok(serde_json::from_str(&blob)?),
            None => Ok(Vec::new()),
        }
    }

    fn save(&self, list: &[PendingTransaction]) -> Result<()> {
        self.kv.put(keys::PENDING, &serde_json::to_string(list)?)
    }
}
