//! User data store
//!
//! One SQLite database with three relations:
//!
//! ```text
//! settings        (chat_id, key)        -> value
//! current_history (chat_id)             -> history document (JSON)
//! saved_chats     (chat_id, chat_name)  -> history document (JSON), saved_at
//! ```
//!
//! The connection sits behind a mutex, so every statement (and every transaction)
//! against a row is serialized. Documents are always replaced whole.

mod history;
mod settings;
mod snapshots;

pub use history::HistoryStore;
pub use settings::{EffectiveSettings, SettingKey, SettingsStore};
pub use snapshots::{Forgotten, SnapshotMatch, SnapshotStore};

use crate::error::Result;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Shared handle to the user database
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create the database
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        let db = Self::with_connection(conn)?;

        info!("User database opened: {}", path.display());
        Ok(db)
    }

    /// Private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                chat_id INTEGER NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (chat_id, key)
            );

            CREATE TABLE IF NOT EXISTS current_history (
                chat_id INTEGER PRIMARY KEY,
                chat_history TEXT NOT NULL DEFAULT '[]'
            );

            CREATE TABLE IF NOT EXISTS saved_chats (
                chat_id INTEGER NOT NULL,
                chat_name TEXT NOT NULL,
                chat_history TEXT NOT NULL,
                saved_at INTEGER NOT NULL,
                PRIMARY KEY (chat_id, chat_name)
            );
            "#,
        )?;

        Ok(())
    }

    /// Create the user's empty history row; existing users are left alone
    pub fn init_user(&self, chat_id: i64) -> Result<()> {
        let created = self.conn().execute(
            "INSERT OR IGNORE INTO current_history (chat_id) VALUES (?1)",
            params![chat_id],
        )?;
        if created > 0 {
            info!("Initialized user {}", chat_id);
        } else {
            debug!("User {} already initialized", chat_id);
        }
        Ok(())
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        // Interrupted transactions are rolled back by SQLite; a poisoned lock still
        // guards a consistent connection.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_user_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.init_user(42).unwrap();
        db.init_user(42).unwrap();

        let rows: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM current_history", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("userdata.db");
        Database::open(&path).unwrap();
        assert!(path.exists());
    }
}
