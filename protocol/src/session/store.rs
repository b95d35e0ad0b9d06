//! Durable session storage.
//!
//! The whole session is one JSON record under one key. A single `insert`
//! replaces it, so no reader can ever pair a key id with another session's
//! keys or expiry.
//!
//! Keys are stored base64-encoded but NOT encrypted. On a device, put the
//! database somewhere only this process can read.

use std::path::Path;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};

use super::error::StoreError;
use crate::config::{SESSION_RECORD_KEY, SESSION_TREE};

/// Persisted form of a session.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub key_id: String,
    pub enc_key_b64: String,
    pub mac_key_b64: String,
    pub expires_at_ms: i64,
}

impl std::fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRecord")
            .field("key_id", &self.key_id)
            .field("expires_at_ms", &self.expires_at_ms)
            .finish_non_exhaustive()
    }
}

/// Where the session key manager keeps its one session.
pub trait SessionStore: Send + Sync {
    fn load(&self) -> Result<Option<SessionRecord>, StoreError>;

    /// Replace the stored record atomically.
    fn save(&self, record: &SessionRecord) -> Result<(), StoreError>;

    fn clear(&self) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// sled
// ---------------------------------------------------------------------------

/// sled-backed store: tree [`SESSION_TREE`], key [`SESSION_RECORD_KEY`].
#[derive(Debug, Clone)]
pub struct SledSessionStore {
    db: Db,
    tree: Tree,
}

impl SledSessionStore {
    /// Open or create the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::from_db(sled::open(path)?)
    }

    /// In-memory database, removed on drop.
    pub fn open_temporary() -> Result<Self, StoreError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self, StoreError> {
        let tree = db.open_tree(SESSION_TREE)?;
        Ok(Self { db, tree })
    }
}

impl SessionStore for SledSessionStore {
    fn load(&self) -> Result<Option<SessionRecord>, StoreError> {
        match self.tree.get(SESSION_RECORD_KEY)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StoreError::Corrupt(e.to_string())),
            None => Ok(None),
        }
    }

    fn save(&self, record: &SessionRecord) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(record).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        self.tree.insert(SESSION_RECORD_KEY, bytes)?;
        self.db.flush()?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.tree.remove(SESSION_RECORD_KEY)?;
        self.db.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

/// Process-local store. Sessions die with the process.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    record: Mutex<Option<SessionRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: SessionRecord) -> Self {
        Self {
            record: Mutex::new(Some(record)),
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self.record.lock().clone())
    }

    fn save(&self, record: &SessionRecord) -> Result<(), StoreError> {
        *self.record.lock() = Some(record.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.record.lock() = None;
        Ok(())
    }
}
