//! Directory-backed cloud document store
//!
//! One JSON document per user inside a shared directory. Two data
//! directories pointed at the same cloud directory behave like two
//! devices of the same account: handy for demos, tests, and syncing
//! between machines over a synced folder.
//!
//! Writes are atomic (tempfile in the same directory, then rename). The
//! subscription is a poll: a background task watches the file's modified
//! time and re-reads on change.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use tally_core::{CloudStore, Error, Result, UserDocument, UserId};

pub struct DirCloud {
    root: PathBuf,
    poll_interval: Duration,
}

impl DirCloud {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            poll_interval: Duration::from_secs(2),
        })
    }

    fn doc_path(&self, user: &UserId) -> PathBuf {
        self.root.join(format!("{}.json", user))
    }

    fn read_doc(path: &Path) -> Result<Option<UserDocument>> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(Some(serde_json::from_str(&text).map_err(|e| {
                Error::Integrity(format!("{}: {}", path.display(), e))
            })?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl CloudStore for DirCloud {
    async fn read_user_doc(&self, user: &UserId) -> Result<Option<UserDocument>> {
        Self::read_doc(&self.doc_path(user))
    }

    async fn write_user_doc(&self, user: &UserId, doc: &UserDocument) -> Result<()> {
        let path = self.doc_path(user);
        let json = serde_json::to_string_pretty(doc)?;

        // Write-then-rename so a reader never sees a torn document.
        let tmp = tempfile::NamedTempFile::new_in(&self.root)?;
        std::fs::write(tmp.path(), json)?;
        tmp.persist(&path).map_err(|e| Error::Io(e.error))?;
        debug!(path = %path.display(), "Wrote cloud document");
        Ok(())
    }

    fn subscribe(&self, user: &UserId) -> broadcast::Receiver<UserDocument> {
        let (tx, rx) = broadcast::channel(16);
        let path = self.doc_path(user);
        let interval = self.poll_interval;

        tokio::spawn(async move {
            let mut last_seen: Option<SystemTime> = None;
            loop {
                tokio::time::sleep(interval).await;
                if tx.receiver_count() == 0 {
                    return;
                }
                let modified = match std::fs::metadata(&path).and_then(|m| m.modified()) {
                    Ok(modified) => modified,
                    Err(_) => continue, // not written yet
                };
                if last_seen == Some(modified) {
                    continue;
                }
                last_seen = Some(modified);
                match Self::read_doc(&path) {
                    Ok(Some(doc)) => {
                        let _ = tx.send(doc);
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "Could not read cloud document"),
                }
            }
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(cookie: &str) -> UserDocument {
        UserDocument {
            sync_cookie: Some(cookie.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let cloud = DirCloud::new(dir.path()).unwrap();
        let user = UserId::from("u1");

        assert!(cloud.read_user_doc(&user).await.unwrap().is_none());
        cloud.write_user_doc(&user, &doc("c1")).await.unwrap();
        let read = cloud.read_user_doc(&user).await.unwrap().unwrap();
        assert_eq!(read.sync_cookie.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn overwrite_replaces_document() {
        let dir = tempfile::tempdir().unwrap();
        let cloud = DirCloud::new(dir.path()).unwrap();
        let user = UserId::from("u1");

        cloud.write_user_doc(&user, &doc("c1")).await.unwrap();
        cloud.write_user_doc(&user, &doc("c2")).await.unwrap();
        let read = cloud.read_user_doc(&user).await.unwrap().unwrap();
        assert_eq!(read.sync_cookie.as_deref(), Some("c2"));
    }

    #[tokio::test]
    async fn corrupt_document_is_an_integrity_error() {
        let dir = tempfile::tempdir().unwrap();
        let cloud = DirCloud::new(dir.path()).unwrap();
        let user = UserId::from("u1");

        std::fs::write(dir.path().join("u1.json"), "{not json").unwrap();
        assert!(matches!(
            cloud.read_user_doc(&user).await,
            Err(Error::Integrity(_))
        ));
    }
}
