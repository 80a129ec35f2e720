//! Cloud document store seam
//!
//! A per-user, whole-document read/write interface plus a change
//! subscription. The store itself enforces that only the authenticated
//! user reaches their own document; the core just supplies the identity.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::{Error, Result};
use crate::ids::UserId;
use crate::wire::UserDocument;

/// External cloud store collaborator.
#[async_trait]
pub trait CloudStore: Send + Sync {
    /// The user's document, or `None` before the first push.
    async fn read_user_doc(&self, user: &UserId) -> Result<Option<UserDocument>>;

    /// Atomically replace the user's document.
    async fn write_user_doc(&self, user: &UserId, doc: &UserDocument) -> Result<()>;

    /// Subscribe to document changes. Dropping the receiver unsubscribes.
    fn subscribe(&self, user: &UserId) -> broadcast::Receiver<UserDocument>;
}

/// In-memory cloud store. The reference implementation for tests and the
/// backbone of the two-device integration scenarios.
#[derive(Default)]
pub struct MemoryCloud {
    docs: RwLock<HashMap<String, UserDocument>>,
    channels: Mutex<HashMap<String, broadcast::Sender<UserDocument>>>,
    /// Errors to inject into upcoming calls, front first.
    failures: Mutex<VecDeque<Error>>,
}

impl MemoryCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an error for the next read or write (retry-path testing).
    pub fn inject_failure(&self, error: Error) {
        self.failures
            .lock()
            .expect("cloud lock poisoned")
            .push_back(error);
    }

    fn take_failure(&self) -> Option<Error> {
        self.failures
            .lock()
            .expect("cloud lock poisoned")
            .pop_front()
    }

    fn sender(&self, user: &UserId) -> broadcast::Sender<UserDocument> {
        let mut channels = self.channels.lock().expect("cloud lock poisoned");
        channels
            .entry(user.to_string())
            .or_insert_with(|| broadcast::channel(16).0)
            .clone()
    }
}

#[async_trait]
impl CloudStore for MemoryCloud {
    async fn read_user_doc(&self, user: &UserId) -> Result<Option<UserDocument>> {
        if let Some(error) = self.take_failure() {
            return Err(error);
        }
        Ok(self
            .docs
            .read()
            .expect("cloud lock poisoned")
            .get(user.as_str())
            .cloned())
    }

    async fn write_user_doc(&self, user: &UserId, doc: &UserDocument) -> Result<()> {
        if let Some(error) = self.take_failure() {
            return Err(error);
        }
        self.docs
            .write()
            .expect("cloud lock poisoned")
            .insert(user.to_string(), doc.clone());
        // Fan out to listeners; no listener is fine.
        let _ = self.sender(user).send(doc.clone());
        Ok(())
    }

    fn subscribe(&self, user: &UserId) -> broadcast::Receiver<UserDocument> {
        self.sender(user).subscribe()
    }
}
