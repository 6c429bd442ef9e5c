//! Current conversation per user

use super::Database;
use crate::error::{BotError, Result};
use crate::turn::{parse_history, serialize_history, Turn};
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;
use tracing::debug;

/// History store backed by the `current_history` table
///
/// There is no append: callers read, change the document in memory and replace it.
#[derive(Clone)]
pub struct HistoryStore {
    db: Arc<Database>,
}

impl HistoryStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Current history, empty for a user who has not talked yet
    pub fn get(&self, chat_id: i64) -> Result<Vec<Turn>> {
        let document: Option<String> = self
            .db
            .conn()
            .query_row(
                "SELECT chat_history FROM current_history WHERE chat_id = ?1",
                params![chat_id],
                |row| row.get(0),
            )
            .optional()?;

        let document = document.ok_or(BotError::UserNotInitialized(chat_id))?;
        Ok(parse_history(&document)?)
    }

    /// Overwrite the whole document
    pub fn replace(&self, chat_id: i64, history: &[Turn]) -> Result<()> {
        let document = serialize_history(history)?;
        let rows = self.db.conn().execute(
            "UPDATE current_history SET chat_history = ?1 WHERE chat_id = ?2",
            params![document, chat_id],
        )?;
        if rows == 0 {
            return Err(BotError::UserNotInitialized(chat_id));
        }
        debug!("Stored {} turns for chat {}", history.len(), chat_id);
        Ok(())
    }

    pub fn clear(&self, chat_id: i64) -> Result<()> {
        self.replace(chat_id, &[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (Arc<Database>, HistoryStore) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        (db.clone(), HistoryStore::new(db))
    }

    #[test]
    fn test_new_user_has_empty_history() {
        let (db, store) = store();
        db.init_user(1).unwrap();
        assert!(store.get(1).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_user_is_an_error() {
        let (_db, store) = store();
        assert!(matches!(store.get(99), Err(BotError::UserNotInitialized(99))));
        assert!(matches!(
            store.replace(99, &[Turn::user("hi")]),
            Err(BotError::UserNotInitialized(99))
        ));
    }

    #[test]
    fn test_replace_and_clear() {
        let (db, store) = store();
        db.init_user(1).unwrap();

        let history = vec![
            Turn::system("You are a helpful assistant"),
            Turn::user("Привет"),
            Turn::assistant("Здравствуйте!"),
        ];
        store.replace(1, &history).unwrap();
        assert_eq!(store.get(1).unwrap(), history);

        store.clear(1).unwrap();
        assert!(store.get(1).unwrap().is_empty());
    }

    #[test]
    fn test_users_are_isolated() {
        let (db, store) = store();
        db.init_user(1).unwrap();
        db.init_user(2).unwrap();
        store.replace(1, &[Turn::user("one")]).unwrap();
        assert!(store.get(2).unwrap().is_empty());
    }

    #[test]
    fn test_reinit_keeps_history() {
        let (db, store) = store();
        db.init_user(1).unwrap();
        store.replace(1, &[Turn::user("still here")]).unwrap();
        db.init_user(1).unwrap();
        assert_eq!(store.get(1).unwrap(), vec![Turn::user("still here")]);
    }
}
