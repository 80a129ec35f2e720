//! Merchant learning data (local-only)
//!
//! On approval the classifier records (merchant-normalized-form, book,
//! category) and bumps a success counter; an edit-then-approve records the
//! *corrected* mapping; a rejection decrements and eventually drops the
//! mapping. Nothing here replicates; learning is per-device.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::ids::{BookId, CategoryId};
use crate::kv::{keys, LocalStore};

/// Reduce a raw transaction description to a stable merchant key:
/// uppercase, payment prefixes and trailing reference junk stripped.
pub fn normalize_merchant(description: &str) -> String {
    const PREFIXES: &[&str] = &[
        "UPI-", "UPI/", "POS ", "POS/", "NEFT-", "NEFT/", "IMPS-", "IMPS/", "ACH-", "ATM-",
    ];

    let mut text = description.trim().to_uppercase();
    for prefix in PREFIXES {
        if let Some(rest) = text.strip_prefix(prefix) {
            text = rest.to_string();
            break;
        }
    }

    let tokens: Vec<&str> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        // Reference numbers and store codes carry no merchant identity.
        .filter(|t| !t.chars().all(|c| c.is_ascii_digit()))
        .take(4)
        .collect();
    tokens.join(" ")
}

/// One learned merchant association.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MerchantMapping {
    /// Normalized merchant form, the lookup key.
    pub pattern: String,
    pub book_id: BookId,
    pub category_id: CategoryId,
    pub approvals: u32,
    pub rejections: u32,
    pub updated_at: DateTime<Utc>,
}

impl MerchantMapping {
    /// A mapping outvoted by rejections stops firing.
    pub fn is_active(&self) -> bool {
        self.approvals > self.rejections
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LearningData {
    mappings: Vec<MerchantMapping>,
}

/// Persistent store for merchant mappings.
pub struct LearningStore {
    kv: Arc<dyn LocalStore>,
    data: Mutex<LearningData>,
}

impl LearningStore {
    pub fn open(kv: Arc<dyn LocalStore>) -> Result<Self> {
        let data = match kv.get(keys::LEARNING)? {
            Some(blob) => serde_json::from_str(&blob)?,
            None => LearningData::default(),
        };
        Ok(Self {
            kv,
            data: Mutex::new(data),
        })
    }

    /// The active mapping for a description, if any.
    pub fn lookup(&self, description: &str) -> Option<MerchantMapping> {
        let pattern = normalize_merchant(description);
        if pattern.is_empty() {
            return None;
        }
        self.data
            .lock()
            .expect("learning lock poisoned")
            .mappings
            .iter()
            .find(|m| m.pattern == pattern && m.is_active())
            .cloned()
    }

    /// Record an approval. If the user corrected the prediction, the
    /// corrected ids replace the learned ones.
    pub fn record_approval(
        &self,
        description: &str,
        book_id: &BookId,
        category_id: &CategoryId,
    ) -> Result<()> {
        let pattern = normalize_merchant(description);
        if pattern.is_empty() {
            return Ok(());
        }

        let mut data = self.data.lock().expect("learning lock poisoned");
        match data.mappings.iter_mut().find(|m| m.pattern == pattern) {
            Some(mapping) => {
                if mapping.book_id != *book_id || mapping.category_id != *category_id {
                    // Edit-then-approve: learn the correction.
                    mapping.book_id = book_id.clone();
                    mapping.category_id = category_id.clone();
                }
                mapping.approvals += 1;
                mapping.updated_at = Utc::now();
            }
            None => data.mappings.push(MerchantMapping {
                pattern: pattern.clone(),
                book_id: book_id.clone(),
                category_id: category_id.clone(),
                approvals: 1,
                rejections: 0,
                updated_at: Utc::now(),
            }),
        }
        debug!(pattern = %pattern, "Recorded merchant approval");
        self.persist(&data)
    }

    /// Record a rejection; mappings that fall to or below their rejection
    /// count are dropped entirely.
    pub fn record_rejection(&self, description: &str) -> Result<()> {
        let pattern = normalize_merchant(description);
        if pattern.is_empty() {
            return Ok(());
        }

        let mut data = self.data.lock().expect("learning lock poisoned");
        if let Some(mapping) = data.mappings.iter_mut().find(|m| m.pattern == pattern) {
            mapping.rejections += 1;
            mapping.updated_at = Utc::now();
            if !mapping.is_active() {
                data.mappings.retain(|m| m.pattern != pattern);
                debug!(pattern = %pattern, "Dropped outvoted merchant mapping");
            }
        }
        self.persist(&data)
    }

    fn persist(&self, data: &LearningData) -> Result<()> {
        self.kv.put(keys::LEARNING, &serde_json::to_string(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;

    fn store() -> LearningStore {
        LearningStore::open(Arc::new(MemoryStore::new())).unwrap()
    }

    #[test]
    fn normalization_strips_prefixes_and_refs() {
        assert_eq!(
            normalize_merchant("UPI-SWIGGY BANGALORE 883920021"),
            "SWIGGY BANGALORE"
        );
        assert_eq!(normalize_merchant("POS NETFLIX.COM 4432"), "NETFLIX COM");
        assert_eq!(normalize_merchant("  starbucks coffee  "), "STARBUCKS COFFEE");
        assert_eq!(normalize_merchant("123456"), "");
    }

    #[test]
    fn approval_creates_and_strengthens_mapping() {
        let s = store();
        let book = BookId::from("b1");
        let cat = CategoryId::from("c1");

        s.record_approval("UPI-SWIGGY 1234", &book, &cat).unwrap();
        s.record_approval("UPI-SWIGGY 9999", &book, &cat).unwrap();

        let mapping = s.lookup("swiggy order").map(|m| m.approvals);
        // Different normalized form; no match.
        assert_eq!(mapping, None);

        let mapping = s.lookup("UPI-SWIGGY 555").unwrap();
        assert_eq!(mapping.approvals, 2);
        assert_eq!(mapping.book_id, book);
    }

    #[test]
    fn correction_overwrites_mapping() {
        let s = store();
        s.record_approval("NETFLIX", &BookId::from("b1"), &CategoryId::from("c1"))
            .unwrap();
        s.record_approval("NETFLIX", &BookId::from("b1"), &CategoryId::from("c2"))
            .unwrap();

        let mapping = s.lookup("NETFLIX").unwrap();
        assert_eq!(mapping.category_id, CategoryId::from("c2"));
        assert_eq!(mapping.approvals, 2);
    }

    #[test]
    fn rejection_drops_outvoted_mapping() {
        let s = store();
        s.record_approval("NETFLIX", &BookId::from("b1"), &CategoryId::from("c1"))
            .unwrap();
        assert!(s.lookup("NETFLIX").is_some());

        s.record_rejection("NETFLIX").unwrap();
        assert!(s.lookup("NETFLIX").is_none());
    }

    #[test]
    fn learning_persists_across_reopen() {
        let kv: Arc<dyn LocalStore> = Arc::new(MemoryStore::new());
        {
            let s = LearningStore::open(kv.clone()).unwrap();
            s.record_approval("ZOMATO", &BookId::from("b1"), &CategoryId::from("c1"))
                .unwrap();
        }
        let reopened = LearningStore::open(kv).unwrap();
        assert!(reopened.lookup("ZOMATO").is_some());
    }
}
