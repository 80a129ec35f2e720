//! Pattern-keyed read cache
//!
//! A mapping from string keys to serializable values with a TTL. Query
//! paths put derived results here; every store mutation invalidates the
//! patterns that may contain the affected entity, so a read after a
//! mutation never observes the pre-mutation value.
//!
//! Keys are colon-joined fragments (`entries:bookId:<id>`,
//! `books:userId:<uid>`); an invalidation pattern matches a key when it
//! equals the key or is a prefix of it.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;

struct Slot {
    inserted: Instant,
    value: Value,
}

/// In-memory TTL cache with prefix-pattern invalidation.
pub struct ReadCache {
    ttl: Duration,
    slots: Mutex<HashMap<String, Slot>>,
}

impl ReadCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch a cached value. Expired slots are dropped lazily here.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut slots = self.slots.lock().expect("cache lock poisoned");
        match slots.get(key) {
            Some(slot) if slot.inserted.elapsed() < self.ttl => Some(slot.value.clone()),
            Some(_) => {
                slots.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: &str, value: Value) {
        let mut slots = self.slots.lock().expect("cache lock poisoned");
        slots.insert(
            key.to_string(),
            Slot {
                inserted: Instant::now(),
                value,
            },
        );
    }

    /// Remove every key the pattern covers (exact match or prefix).
    pub fn invalidate(&self, pattern: &str) {
        let mut slots = self.slots.lock().expect("cache lock poisoned");
        slots.retain(|key, _| !(key == pattern || key.starts_with(pattern)));
    }

    /// Drop everything, e.g. on identity change.
    pub fn clear(&self) {
        self.slots.lock().expect("cache lock poisoned").clear();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }
}
