//! Key-value local storage
//!
//! The replicated collections, preferences, pending transactions, and
//! learning data persist as JSON blobs under fixed top-level keys. Reads
//! and writes are atomic per key; there is no cross-key transactional
//! coupling.

use std::collections::HashMap;
use std::sync::RwLock;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use tracing::info;

use crate::error::Result;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Top-level keys the core stores under.
pub mod keys {
    pub const BOOKS: &str = "books";
    pub const ENTRIES: &str = "entries";
    pub const CATEGORIES: &str = "categories";
    pub const PREFERENCES: &str = "preferences";
    pub const PENDING: &str = "pending";
    pub const LEARNING: &str = "learning";
}

/// Atomic per-key blob storage.
pub trait LocalStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn put(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory store for tests and throwaway sessions.
#[derive(Default)]
pub struct MemoryStore {
    blobs: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .blobs
            .read()
            .expect("store lock poisoned")
            .get(key)
            .cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.blobs
            .write()
            .expect("store lock poisoned")
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.blobs
            .write()
            .expect("store lock poisoned")
            .remove(key);
        Ok(())
    }
}

/// SQLite-backed store: one `kv` table, pooled connections.
#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
    db_path: String,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &str) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder().max_size(10).build(manager)?;

        let store = Self {
            pool,
            db_path: path.to_string(),
        };
        store.run_migrations()?;
        Ok(store)
    }

    /// Create a throwaway on-disk database (for testing)
    ///
    /// Note: Uses a temporary file rather than `:memory:` because every
    /// pooled connection would otherwise get its own empty database.
    pub fn in_memory() -> Result<Self> {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!("tally_test_{}_{}.db", std::process::id(), id));
        let _ = std::fs::remove_file(&path);

        Self::open(&path.to_string_lossy())
    }

    /// Get the path to the database file
    pub fn path(&self) -> &str {
        &self.db_path
    }

    fn conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            "#,
        )?;
        info!(path = %self.db_path, "Local store ready");
        Ok(())
    }
}

impl LocalStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT value FROM kv WHERE key = ?1")?;
        let mut rows = stmt.query_map([key], |row| row.get::<_, String>(0))?;
        match rows.next() {
            Some(value) => Ok(Some(value?)),
            None => Ok(None),
        }
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO kv (key, value, updated_at)
            VALUES (?1, ?2, datetime('now'))
            ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = datetime('now')
            "#,
            [key, value],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM kv WHERE key = ?1", [key])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(store: &dyn LocalStore) {
        assert_eq!(store.get("books").unwrap(), None);
        store.put("books", r#"[{"id":"b1"}]"#).unwrap();
        assert_eq!(store.get("books").unwrap().unwrap(), r#"[{"id":"b1"}]"#);

        store.put("books", "[]").unwrap();
        assert_eq!(store.get("books").unwrap().unwrap(), "[]");

        store.remove("books").unwrap();
        assert_eq!(store.get("books").unwrap(), None);
    }

    #[test]
    fn memory_store_roundtrip() {
        roundtrip(&MemoryStore::new());
    }

    #[test]
    fn sqlite_store_roundtrip() {
        let store = SqliteStore::in_memory().unwrap();
        roundtrip(&store);
    }

    #[test]
    fn sqlite_store_persists_across_handles() {
        let store = SqliteStore::in_memory().unwrap();
        store.put("preferences", r#"{"default_currency":"INR"}"#).unwrap();

        let reopened = SqliteStore::open(store.path()).unwrap();
        assert_eq!(
            reopened.get("preferences").unwrap().unwrap(),
            r#"{"default_currency":"INR"}"#
        );
    }

    #[test]
    fn keys_are_independent() {
        let store = MemoryStore::new();
        store.put(keys::BOOKS, "[1]").unwrap();
        store.put(keys::ENTRIES, "[2]").unwrap();
        assert_eq!(store.get(keys::BOOKS).unwrap().unwrap(), "[1]");
        assert_eq!(store.get(keys::ENTRIES).unwrap().unwrap(), "[2]");
    }
}
