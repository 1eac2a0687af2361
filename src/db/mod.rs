//! Database module for LinguaSync
//!
//! Provides SQLite persistence for saved records and the settings document.
//! Implements `LocalStore`; callers serialize multi-step sequences through
//! the sync `MutationGate`.

use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

// Connection pooling
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;

use crate::sync::models::{RecordEntry, RecordMap, SettingsDocument};
use crate::sync::store::LocalStore;

/// Settings-table key of the settings document
const SETTINGS_KEY: &str = "user_settings";

/// Settings-table key of the pre-settings free-text prompt
const LEGACY_PROMPT_KEY: &str = "custom_prompt";

/// Database error types
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for DbError {
    fn from(e: serde_json::Error) -> Self {
        DbError::Serialization(e.to_string())
    }
}

pub type DbResult<T> = Result<T, DbError>;

/// Database manager for thread-safe SQLite access
#[derive(Clone)]
pub struct Database {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl Database {
    /// Open (or create) the database file and apply the schema
    pub fn new(db_path: PathBuf) -> DbResult<Self> {
        let manager = SqliteConnectionManager::file(&db_path)
            .with_init(|conn| conn.execute_batch("PRAGMA busy_timeout = 5000;"));

        let pool = Pool::builder()
            .max_size(8)
            .min_idle(Some(1))
            .connection_timeout(std::time::Duration::from_secs(10))
            .build(manager)?;

        let conn = pool.get()?;
        conn.execute_batch(r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
        "#)?;
        conn.execute_batch(include_str!("schema.sql"))?;
        drop(conn);

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Create an in-memory database (for testing)
    ///
    /// Every SQLite memory connection is its own database, so the pool holds
    /// exactly one connection that never expires.
    pub fn in_memory() -> DbResult<Self> {
        let manager = SqliteConnectionManager::memory();

        let pool = Pool::builder()
            .max_size(1)
            .min_idle(Some(1))
            .idle_timeout(None)
            .max_lifetime(None)
            .build(manager)?;

        let conn = pool.get()?;
        conn.execute_batch(include_str!("schema.sql"))?;
        drop(conn);

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> DbResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    // ========================================================================
    // Settings table
    // ========================================================================

    /// Read a JSON value from the settings table
    pub fn get_setting<T: serde::de::DeserializeOwned>(&self, key: &str) -> DbResult<Option<T>> {
        let conn = self.get_conn()?;

        let raw: Option<String> = conn
            .query_row("SELECT value FROM settings WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Write a JSON value to the settings table
    pub fn set_setting<T: Serialize>(&self, key: &str, value: &T) -> DbResult<()> {
        let json = serde_json::to_string(value)?;
        let conn = self.get_conn()?;

        conn.execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, json],
        )?;

        Ok(())
    }

    /// Remove a key from the settings table
    pub fn delete_setting(&self, key: &str) -> DbResult<()> {
        let conn = self.get_conn()?;
        conn.execute("DELETE FROM settings WHERE key = ?1", params![key])?;
        Ok(())
    }

    /// Store a pre-settings free-text prompt, as legacy installs did
    #[cfg(test)]
    pub(crate) fn set_legacy_prompt(&self, prompt: &str) -> DbResult<()> {
        self.set_setting(LEGACY_PROMPT_KEY, &prompt)
    }

    // ========================================================================
    // Records table
    // ========================================================================

    /// Number of stored records, tombstones included
    pub fn record_count(&self) -> DbResult<i64> {
        let conn = self.get_conn()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?)
    }
}

impl LocalStore for Database {
    fn get_records(&self) -> DbResult<RecordMap> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare("SELECT id, body FROM records")?;

        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut records = RecordMap::new();
        for row in rows {
            let (id, body) = row?;
            let mut entry: RecordEntry = serde_json::from_str(&body)?;
            // Row key is canonical
            entry.id = id.clone();
            records.insert(id, entry);
        }

        Ok(records)
    }

    fn put_records(&self, records: &RecordMap) -> DbResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM records", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO records (id, body, updated_at, is_deleted) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (id, entry) in records {
                let body = serde_json::to_string(entry)?;
                stmt.execute(params![id, body, entry.updated_at, entry.is_deleted])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn get_settings(&self) -> DbResult<Option<SettingsDocument>> {
        if let Some(settings) = self.get_setting::<SettingsDocument>(SETTINGS_KEY)? {
            return Ok(Some(settings));
        }

        // Installs that predate the settings document only kept a prompt
        let legacy: Option<String> = self.get_setting(LEGACY_PROMPT_KEY)?;
        Ok(legacy
            .filter(|prompt| !prompt.is_empty())
            .map(SettingsDocument::from_legacy_prompt))
    }

    fn put_settings(&self, settings: &SettingsDocument) -> DbResult<()> {
        self.set_setting(SETTINGS_KEY, settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn entry(id: &str, word: &str, updated_at: i64) -> RecordEntry {
        let payload = json!({ "word": word });
        let mut entry = RecordEntry::new(id.to_string(), payload.as_object().unwrap().clone(), updated_at);
        entry.updated_at = updated_at;
        entry
    }

    #[test]
    fn test_records_roundtrip_keeps_tombstones() {
        let db = Database::in_memory().unwrap();

        let mut records = RecordMap::new();
        records.insert("a".to_string(), entry("a", "apple", 10));
        let mut gone = entry("b", "banana", 20);
        gone.mark_deleted(30);
        records.insert("b".to_string(), gone);

        db.put_records(&records).unwrap();
        let loaded = db.get_records().unwrap();

        assert_eq!(loaded, records);
        assert!(loaded["b"].is_deleted);
        assert_eq!(db.record_count().unwrap(), 2);
    }

    #[test]
    fn test_put_records_replaces_whole_map() {
        let db = Database::in_memory().unwrap();

        let mut first = RecordMap::new();
        first.insert("a".to_string(), entry("a", "apple", 1));
        first.insert("b".to_string(), entry("b", "banana", 1));
        db.put_records(&first).unwrap();

        let mut second = RecordMap::new();
        second.insert("c".to_string(), entry("c", "cherry", 2));
        db.put_records(&second).unwrap();

        let loaded = db.get_records().unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains_key("c"));
    }

    #[test]
    fn test_settings_absent_on_fresh_store() {
        let db = Database::in_memory().unwrap();
        assert!(db.get_settings().unwrap().is_none());
    }

    #[test]
    fn test_settings_roundtrip() {
        let db = Database::in_memory().unwrap();

        let mut settings = SettingsDocument::default().stamped(77);
        settings.custom_prompt = Some("Explain like a pirate".to_string());
        settings.shortcuts.explain = "x".to_string();
        db.put_settings(&settings).unwrap();

        assert_eq!(db.get_settings().unwrap(), Some(settings));
    }

    #[test]
    fn test_legacy_prompt_migrates_to_settings() {
        let db = Database::in_memory().unwrap();
        db.set_legacy_prompt("old prompt").unwrap();

        let settings = db.get_settings().unwrap().unwrap();
        assert_eq!(settings.custom_prompt.as_deref(), Some("old prompt"));
        assert_eq!(settings.updated_at, None);
        assert!(settings.show_buttons);

        // A real settings document takes precedence
        let newer = SettingsDocument::default().stamped(5);
        db.put_settings(&newer).unwrap();
        assert_eq!(db.get_settings().unwrap(), Some(newer));
    }

    #[test]
    fn test_file_database_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("lingua.db");

        {
            let db = Database::new(path.clone()).unwrap();
            let mut records = RecordMap::new();
            records.insert("a".to_string(), entry("a", "apple", 3));
            db.put_records(&records).unwrap();
        }

        let db = Database::new(path).unwrap();
        let loaded = db.get_records().unwrap();
        assert_eq!(loaded["a"].word(), Some("apple"));
    }

    #[test]
    fn test_delete_setting() {
        let db = Database::in_memory().unwrap();
        db.set_setting("oauth_refresh_token", &"secret").unwrap();
        db.delete_setting("oauth_refresh_token").unwrap();

        let value: Option<String> = db.get_setting("oauth_refresh_token").unwrap();
        assert!(value.is_none());
    }
}
