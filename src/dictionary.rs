//! Shared key/value dictionary with write-through persistence.
//!
//! Reads hit an in-memory map loaded once at startup; every mutation is
//! written to the database before the map is updated.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::db::Database;
use crate::error::Result;

/// Bot-wide string dictionary.
pub struct Dictionary {
    entries: RwLock<HashMap<String, String>>,
    db: Database,
}

impl Dictionary {
    /// Load all entries from the database.
    pub async fn load(db: Database) -> Result<Self> {
        let entries = db.dictionary().load_all().await?.into_iter().collect();
        Ok(Dictionary {
            entries: RwLock::new(entries),
            db,
        })
    }

    /// Look up a key.
    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.read().get(key).cloned()
    }

    /// Insert or replace an entry.
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.db.dictionary().set(key, value).await?;
        self.entries
            .write()
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    /// Remove an entry. Returns whether it existed.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.db.dictionary().delete(key).await?;
        Ok(self.entries.write().remove(key).is_some())
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}
