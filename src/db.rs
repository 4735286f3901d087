//! Persistent storage for rooms, permissions, plugin toggles, and the
//! shared dictionary.
//!
//! Async SQLite access via SQLx. All writes are write-through: callers keep
//! their own in-memory view and hit the database only on mutation.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::{info, warn};

use crate::error::Result;

static MEMDB_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Database handle with connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connection acquire timeout - prevents connection storms from blocking indefinitely.
    const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Maximum time a connection can remain idle before being closed.
    const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Open a database, running migrations if needed.
    ///
    /// `":memory:"` opens a private in-memory database, used by tests.
    pub async fn connect(path: &str) -> Result<Self> {
        let pool = if path == ":memory:" {
            // Use a uniquely named shared-cache memory database per call.
            // `file::memory:` is global-ish and will collide across parallel tests.
            let id = MEMDB_COUNTER.fetch_add(1, Ordering::Relaxed);
            let memdb_uri = format!(
                "file:kappabot-memdb-{}-{}?mode=memory&cache=shared",
                std::process::id(),
                id
            );

            let options = SqliteConnectOptions::new()
                .filename(&memdb_uri)
                .shared_cache(true)
                .create_if_missing(true);

            SqlitePoolOptions::new()
                .max_connections(1)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(Some(Self::IDLE_TIMEOUT))
                .connect_with(options)
                .await?
        } else {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    if let Err(e) = std::fs::create_dir_all(parent) {
                        warn!(path = %parent.display(), error = %e, "failed to create database directory");
                    }
                }
            }

            let options = SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true);

            SqlitePoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(Some(Self::IDLE_TIMEOUT))
                .connect_with(options)
                .await?
        };

        info!(path = %path, "database connected");

        sqlx::migrate!("./migrations").run(&pool).await.map_err(sqlx::Error::from)?;

        // WAL mode allows reads to happen while writes are in progress.
        sqlx::query("PRAGMA journal_mode=WAL").execute(&pool).await?;
        sqlx::query("PRAGMA synchronous=NORMAL")
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }

    /// Get reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Repository for joined rooms.
    pub fn channels(&self) -> ChannelRepository<'_> {
        ChannelRepository { pool: &self.pool }
    }

    /// Repository for per-room permission lists.
    pub fn acl(&self) -> AclRepository<'_> {
        AclRepository { pool: &self.pool }
    }

    /// Repository for per-room plugin toggles.
    pub fn plugins(&self) -> PluginRepository<'_> {
        PluginRepository { pool: &self.pool }
    }

    /// Repository for the shared key/value dictionary.
    pub fn dictionary(&self) -> DictionaryRepository<'_> {
        DictionaryRepository { pool: &self.pool }
    }
}

/// Repository for the set of rooms the bot has joined.
pub struct ChannelRepository<'a> {
    pool: &'a SqlitePool,
}

impl ChannelRepository<'_> {
    /// All stored room names.
    pub async fn list(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT name FROM channel ORDER BY name")
            .fetch_all(self.pool)
            .await?;
        Ok(rows.iter().map(|row| row.get("name")).collect())
    }

    /// Record a joined room. Idempotent.
    pub async fn add(&self, name: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO channel (name) VALUES (?)")
            .bind(name)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Remove a room and all of its associated state.
    pub async fn remove(&self, name: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM channel WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM acl WHERE channel = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM plugin WHERE channel = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

/// Repository for permission lists.
pub struct AclRepository<'a> {
    pool: &'a SqlitePool,
}

impl AclRepository<'_> {
    /// All (permission, ident) pairs stored for a room.
    pub async fn load(&self, channel: &str) -> Result<Vec<(String, String)>> {
        let rows =
            sqlx::query("SELECT permission, user_ident FROM acl WHERE channel = ?")
                .bind(channel)
                .fetch_all(self.pool)
                .await?;
        Ok(rows
            .iter()
            .map(|row| (row.get("permission"), row.get("user_ident")))
            .collect())
    }

    /// Grant a permission to an ident. Idempotent.
    pub async fn allow(&self, channel: &str, permission: &str, ident: &str) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO acl (channel, permission, user_ident) VALUES (?, ?, ?)",
        )
        .bind(channel)
        .bind(permission)
        .bind(ident)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Revoke a permission from an ident.
    pub async fn deny(&self, channel: &str, permission: &str, ident: &str) -> Result<()> {
        sqlx::query(
            "DELETE FROM acl WHERE channel = ? AND permission = ? AND user_ident = ?",
        )
        .bind(channel)
        .bind(permission)
        .bind(ident)
        .execute(self.pool)
        .await?;
        Ok(())
    }
}

/// Repository for plugin toggles.
pub struct PluginRepository<'a> {
    pool: &'a SqlitePool,
}

impl PluginRepository<'_> {
    /// Names of plugins enabled in a room.
    pub async fn load(&self, channel: &str) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT plugin FROM plugin WHERE channel = ?")
            .bind(channel)
            .fetch_all(self.pool)
            .await?;
        Ok(rows.iter().map(|row| row.get("plugin")).collect())
    }

    /// Mark a plugin enabled in a room. Idempotent.
    pub async fn enable(&self, channel: &str, plugin: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO plugin (channel, plugin) VALUES (?, ?)")
            .bind(channel)
            .bind(plugin)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Mark a plugin disabled in a room.
    pub async fn disable(&self, channel: &str, plugin: &str) -> Result<()> {
        sqlx::query("DELETE FROM plugin WHERE channel = ? AND plugin = ?")
            .bind(channel)
            .bind(plugin)
            .execute(self.pool)
            .await?;
        Ok(())
    }
}

/// Repository for the shared dictionary.
pub struct DictionaryRepository<'a> {
    pool: &'a SqlitePool,
}

impl DictionaryRepository<'_> {
    /// Load the full dictionary.
    pub async fn load_all(&self) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query("SELECT keyname, value FROM dictionary")
            .fetch_all(self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| (row.get("keyname"), row.get("value")))
            .collect())
    }

    /// Insert or replace an entry.
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO dictionary (keyname, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Remove an entry.
    pub async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM dictionary WHERE keyname = ?")
            .bind(key)
            .execute(self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channels_round_trip() {
        let db = Database::connect(":memory:").await.unwrap();
        db.channels().add("somechan").await.unwrap();
        db.channels().add("somechan").await.unwrap();
        db.channels().add("another").await.unwrap();

        assert_eq!(db.channels().list().await.unwrap(), vec!["another", "somechan"]);

        db.channels().remove("somechan").await.unwrap();
        assert_eq!(db.channels().list().await.unwrap(), vec!["another"]);
    }

    #[tokio::test]
    async fn removing_channel_drops_dependent_rows() {
        let db = Database::connect(":memory:").await.unwrap();
        db.channels().add("chan").await.unwrap();
        db.acl().allow("chan", "echo", "$mods").await.unwrap();
        db.plugins().enable("chan", "echo").await.unwrap();

        db.channels().remove("chan").await.unwrap();
        assert!(db.acl().load("chan").await.unwrap().is_empty());
        assert!(db.plugins().load("chan").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn acl_allow_and_deny() {
        let db = Database::connect(":memory:").await.unwrap();
        db.acl().allow("chan", "echo", "someone").await.unwrap();
        db.acl().allow("chan", "echo", "someone").await.unwrap();
        db.acl().allow("chan", "echo", "$subs").await.unwrap();

        let mut entries = db.acl().load("chan").await.unwrap();
        entries.sort();
        assert_eq!(
            entries,
            vec![
                ("echo".to_owned(), "$subs".to_owned()),
                ("echo".to_owned(), "someone".to_owned()),
            ]
        );

        db.acl().deny("chan", "echo", "someone").await.unwrap();
        assert_eq!(db.acl().load("chan").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn dictionary_write_through() {
        let db = Database::connect(":memory:").await.unwrap();
        db.dictionary().set("greeting", "hello").await.unwrap();
        db.dictionary().set("greeting", "howdy").await.unwrap();

        let entries = db.dictionary().load_all().await.unwrap();
        assert_eq!(entries, vec![("greeting".to_owned(), "howdy".to_owned())]);

        db.dictionary().delete("greeting").await.unwrap();
        assert!(db.dictionary().load_all().await.unwrap().is_empty());
    }
}
