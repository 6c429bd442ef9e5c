//! Named saved chats
//!
//! Saving moves the current history into a snapshot and leaves the user with an empty
//! conversation; loading moves it back and deletes the snapshot. Names are looked up
//! by case-sensitive substring, and a lookup only acts when exactly one name matches.

use super::Database;
use crate::error::{BotError, Result};
use rusqlite::{params, OptionalExtension, Transaction};
use std::sync::Arc;
use tracing::info;

/// Outcome of a substring lookup over snapshot names
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotMatch<T> {
    Found(T),
    NotFound,
    /// Every matching name, in list order
    Ambiguous(Vec<String>),
}

impl<T> SnapshotMatch<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, SnapshotMatch::Found(_))
    }
}

/// What `forget` removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Forgotten {
    /// The current history only
    Current,
    /// Every snapshot and the current history
    All { snapshots: usize },
    /// One snapshot; the current history is untouched
    Snapshot(String),
}

/// Snapshot store backed by the `saved_chats` table
#[derive(Clone)]
pub struct SnapshotStore {
    db: Arc<Database>,
}

impl SnapshotStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Move the current history into snapshot `name`
    ///
    /// An existing snapshot with the same name is overwritten.
    pub fn save(&self, chat_id: i64, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(BotError::EmptyName);
        }

        let mut conn = self.db.conn();
        let tx = conn.transaction()?;

        let document: String = tx
            .query_row(
                "SELECT chat_history FROM current_history WHERE chat_id = ?1",
                params![chat_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(BotError::UserNotInitialized(chat_id))?;

        tx.execute(
            "INSERT OR REPLACE INTO saved_chats (chat_id, chat_name, chat_history, saved_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![chat_id, name, document, chrono::Utc::now().timestamp_millis()],
        )?;
        clear_current(&tx, chat_id)?;
        tx.commit()?;

        info!("Chat {} saved history as '{}'", chat_id, name);
        Ok(())
    }

    /// Replace the current history with the single snapshot matching `pattern`
    ///
    /// The snapshot is deleted once loaded. Nothing changes unless exactly one name
    /// matches.
    pub fn load(&self, chat_id: i64, pattern: &str) -> Result<SnapshotMatch<String>> {
        let mut conn = self.db.conn();
        let tx = conn.transaction()?;

        let name = match single_match(&tx, chat_id, pattern)? {
            SnapshotMatch::Found(name) => name,
            SnapshotMatch::NotFound => return Ok(SnapshotMatch::NotFound),
            SnapshotMatch::Ambiguous(names) => return Ok(SnapshotMatch::Ambiguous(names)),
        };

        let rows = tx.execute(
            "UPDATE current_history
             SET chat_history = (SELECT chat_history FROM saved_chats
                                 WHERE chat_id = ?1 AND chat_name = ?2)
             WHERE chat_id = ?1",
            params![chat_id, name],
        )?;
        if rows == 0 {
            return Err(BotError::UserNotInitialized(chat_id));
        }
        delete_snapshot(&tx, chat_id, &name)?;
        tx.commit()?;

        info!("Chat {} loaded '{}'", chat_id, name);
        Ok(SnapshotMatch::Found(name))
    }

    /// Forget the current history (empty pattern), everything (`all`, any case) or the
    /// single snapshot matching `pattern`
    pub fn forget(&self, chat_id: i64, pattern: &str) -> Result<SnapshotMatch<Forgotten>> {
        let pattern = pattern.trim();
        let mut conn = self.db.conn();
        let tx = conn.transaction()?;

        let forgotten = if pattern.is_empty() {
            clear_current(&tx, chat_id)?;
            Forgotten::Current
        } else if pattern.eq_ignore_ascii_case("all") {
            clear_current(&tx, chat_id)?;
            let snapshots = tx.execute(
                "DELETE FROM saved_chats WHERE chat_id = ?1",
                params![chat_id],
            )?;
            Forgotten::All { snapshots }
        } else {
            match single_match(&tx, chat_id, pattern)? {
                SnapshotMatch::Found(name) => {
                    delete_snapshot(&tx, chat_id, &name)?;
                    Forgotten::Snapshot(name)
                }
                SnapshotMatch::NotFound => return Ok(SnapshotMatch::NotFound),
                SnapshotMatch::Ambiguous(names) => return Ok(SnapshotMatch::Ambiguous(names)),
            }
        };
        tx.commit()?;

        info!("Chat {} forgot {:?}", chat_id, forgotten);
        Ok(SnapshotMatch::Found(forgotten))
    }

    /// Snapshot names, oldest save first
    pub fn list(&self, chat_id: i64) -> Result<Vec<String>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT chat_name FROM saved_chats WHERE chat_id = ?1 ORDER BY saved_at, chat_name",
        )?;
        let names = stmt
            .query_map(params![chat_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(names)
    }
}

fn single_match(tx: &Transaction<'_>, chat_id: i64, pattern: &str) -> Result<SnapshotMatch<String>> {
    let mut stmt = tx.prepare(
        "SELECT chat_name FROM saved_chats
         WHERE chat_id = ?1 AND instr(chat_name, ?2) > 0
         ORDER BY saved_at, chat_name",
    )?;
    let mut names = stmt
        .query_map(params![chat_id, pattern], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;

    Ok(match names.len() {
        0 => SnapshotMatch::NotFound,
        1 => SnapshotMatch::Found(names.remove(0)),
        _ => SnapshotMatch::Ambiguous(names),
    })
}

fn clear_current(tx: &Transaction<'_>, chat_id: i64) -> Result<()> {
    let rows = tx.execute(
        "UPDATE current_history SET chat_history = '[]' WHERE chat_id = ?1",
        params![chat_id],
    )?;
    if rows == 0 {
        return Err(BotError::UserNotInitialized(chat_id));
    }
    Ok(())
}

fn delete_snapshot(tx: &Transaction<'_>, chat_id: i64, name: &str) -> Result<()> {
    tx.execute(
        "DELETE FROM saved_chats WHERE chat_id = ?1 AND chat_name = ?2",
        params![chat_id, name],
    )?;
    Ok(())
}
