//! Per-user setting overrides

use super::Database;
use crate::config::Defaults;
use crate::error::{BotError, Result};
use rusqlite::{params, OptionalExtension};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

/// Settings a user can override
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingKey {
    Model,
    Prompt,
    Temperature,
    MaxTokens,
    MaxHistoryTokens,
}

impl SettingKey {
    pub const ALL: [SettingKey; 5] = [
        SettingKey::Model,
        SettingKey::Prompt,
        SettingKey::Temperature,
        SettingKey::MaxTokens,
        SettingKey::MaxHistoryTokens,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Prompt => "prompt",
            Self::Temperature => "temperature",
            Self::MaxTokens => "max_tokens",
            Self::MaxHistoryTokens => "max_history_tokens",
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettingKey {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or(())
    }
}

/// Settings after defaults are applied
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveSettings {
    pub model: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub max_history_tokens: usize,
}

/// Settings store backed by the `settings` table
#[derive(Clone)]
pub struct SettingsStore {
    db: Arc<Database>,
}

impl SettingsStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn get(&self, chat_id: i64, key: SettingKey) -> Result<Option<String>> {
        let value = self
            .db
            .conn()
            .query_row(
                "SELECT value FROM settings WHERE chat_id = ?1 AND key = ?2",
                params![chat_id, key.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Upsert; last write wins
    pub fn set(&self, chat_id: i64, key: SettingKey, value: &str) -> Result<()> {
        self.db.conn().execute(
            "INSERT OR REPLACE INTO settings (chat_id, key, value) VALUES (?1, ?2, ?3)",
            params![chat_id, key.as_str(), value],
        )?;
        info!("User {} set {} = {:?}", chat_id, key, value);
        Ok(())
    }

    /// Delete the override so the default applies again
    pub fn remove(&self, chat_id: i64, key: SettingKey) -> Result<()> {
        self.db.conn().execute(
            "DELETE FROM settings WHERE chat_id = ?1 AND key = ?2",
            params![chat_id, key.as_str()],
        )?;
        info!("User {} reset {} to default", chat_id, key);
        Ok(())
    }

    /// Every key with its stored value, `None` meaning default
    pub fn overview(&self, chat_id: i64) -> Result<Vec<(SettingKey, Option<String>)>> {
        SettingKey::ALL
            .into_iter()
            .map(|key| Ok((key, self.get(chat_id, key)?)))
            .collect()
    }

    /// Stored overrides merged over `defaults`
    ///
    /// A stored value that does not parse fails with `BotError::Configuration`; it is
    /// never silently replaced by the default.
    pub fn load_effective(&self, chat_id: i64, defaults: &Defaults) -> Result<EffectiveSettings> {
        Ok(EffectiveSettings {
            model: self
                .get(chat_id, SettingKey::Model)?
                .unwrap_or_else(|| defaults.model.clone()),
            prompt: self
                .get(chat_id, SettingKey::Prompt)?
                .unwrap_or_else(|| defaults.prompt.clone()),
            temperature: self.temperature(chat_id, defaults.temperature)?,
            max_tokens: self.parsed(chat_id, SettingKey::MaxTokens, defaults.max_tokens)?,
            max_history_tokens: self.parsed(
                chat_id,
                SettingKey::MaxHistoryTokens,
                defaults.max_history_tokens,
            )?,
        })
    }

    /// NaN and infinities parse as `f32` but serialize to `null` in the request body
    fn temperature(&self, chat_id: i64, default: f32) -> Result<f32> {
        let temperature = self.parsed(chat_id, SettingKey::Temperature, default)?;
        if temperature.is_finite() {
            return Ok(temperature);
        }
        Err(BotError::Configuration {
            key: SettingKey::Temperature.to_string(),
            value: self
                .get(chat_id, SettingKey::Temperature)?
                .unwrap_or_else(|| temperature.to_string()),
        })
    }

    fn parsed<T: FromStr>(&self, chat_id: i64, key: SettingKey, default: T) -> Result<T> {
        match self.get(chat_id, key)? {
            None => Ok(default),
            Some(value) => value.trim().parse().map_err(|_| BotError::Configuration {
                key: key.to_string(),
                value,
            }),
        }
    }
}
