//! Configuration management
//!
//! Everything the bot needs is read once at startup and passed down explicitly.

use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_PROMPT: &str = "You are a helpful assistant";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 3000;
pub const DEFAULT_MAX_HISTORY_TOKENS: usize = 4096;

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
const DEFAULT_TRANSCRIPT_LANGUAGE: &str = "en";

/// Values used when a user has no override stored for a setting
#[derive(Debug, Clone, PartialEq)]
pub struct Defaults {
    pub model: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub max_history_tokens: usize,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            prompt: DEFAULT_PROMPT.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            max_history_tokens: DEFAULT_MAX_HISTORY_TOKENS,
        }
    }
}

/// Bot configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Telegram bot token
    pub bot_token: String,

    /// Telegram username of the bot owner (always allowed, manages the allow list)
    pub owner: String,

    /// API key for the inference provider
    pub openai_api_key: String,

    /// Base URL of the OpenAI-compatible API
    pub openai_base_url: String,

    /// SQLite database path for user data
    pub db_path: PathBuf,

    /// File holding allowed usernames, one per line
    pub allowed_users_path: PathBuf,

    /// Upper bound for any single external call
    pub request_timeout: Duration,

    /// Preferred transcript language for video summaries
    pub transcript_language: String,

    /// Per-setting defaults
    pub defaults: Defaults,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// `YAPPARI_ENV_FILE` names an extra dotenv file to read before the usual `.env`.
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = std::env::var("YAPPARI_ENV_FILE") {
            dotenvy::from_filename(path).ok();
        }
        dotenvy::dotenv().ok();

        let bot_token = std::env::var("BOT_TOKEN").ok();
        let owner = std::env::var("BOT_OWNER").ok();
        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();

        let missing: Vec<&str> = [
            ("BOT_TOKEN", bot_token.is_none()),
            ("BOT_OWNER", owner.is_none()),
            ("OPENAI_API_KEY", openai_api_key.is_none()),
        ]
        .iter()
        .filter(|(_, absent)| *absent)
        .map(|(name, _)| *name)
        .collect();

        let (Some(bot_token), Some(owner), Some(openai_api_key)) = (bot_token, owner, openai_api_key)
        else {
            bail!("Missing required environment variables: {}", missing.join(", "));
        };

        let openai_base_url = std::env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_OPENAI_BASE_URL.to_string());

        let db_path = std::env::var("YAPPARI_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::data_local_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("yappari")
                    .join("userdata.db")
            });

        let allowed_users_path = std::env::var("YAPPARI_ALLOWED_USERS")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                db_path
                    .parent()
                    .map(|p| p.join("allowed_users.txt"))
                    .unwrap_or_else(|| PathBuf::from("allowed_users.txt"))
            });

        let request_timeout =
            parse_timeout(std::env::var("YAPPARI_REQUEST_TIMEOUT_SECS").ok().as_deref())?;

        let transcript_language = std::env::var("YAPPARI_TRANSCRIPT_LANGUAGE")
            .unwrap_or_else(|_| DEFAULT_TRANSCRIPT_LANGUAGE.to_string());

        Ok(Self {
            bot_token,
            owner: owner.trim().trim_start_matches('@').to_lowercase(),
            openai_api_key,
            openai_base_url,
            db_path,
            allowed_users_path,
            request_timeout,
            transcript_language,
            defaults: Defaults::from_env()?,
        })
    }
}

impl Defaults {
    /// Defaults with optional `YAPPARI_DEFAULT_*` overrides
    pub fn from_env() -> Result<Self> {
        let mut defaults = Self::default();

        if let Ok(model) = std::env::var("YAPPARI_DEFAULT_MODEL") {
            defaults.model = model;
        }
        if let Ok(prompt) = std::env::var("YAPPARI_DEFAULT_PROMPT") {
            defaults.prompt = prompt;
        }
        if let Ok(v) = std::env::var("YAPPARI_DEFAULT_TEMPERATURE") {
            defaults.temperature = v
                .parse()
                .ok()
                .filter(|t: &f32| t.is_finite())
                .ok_or_else(|| anyhow::anyhow!("YAPPARI_DEFAULT_TEMPERATURE is not a number: {}", v))?;
        }
        if let Ok(v) = std::env::var("YAPPARI_DEFAULT_MAX_TOKENS") {
            defaults.max_tokens = v
                .parse()
                .map_err(|_| anyhow::anyhow!("YAPPARI_DEFAULT_MAX_TOKENS is not an integer: {}", v))?;
        }
        if let Ok(v) = std::env::var("YAPPARI_DEFAULT_MAX_HISTORY_TOKENS") {
            defaults.max_history_tokens = v.parse().map_err(|_| {
                anyhow::anyhow!("YAPPARI_DEFAULT_MAX_HISTORY_TOKENS is not an integer: {}", v)
            })?;
        }

        Ok(defaults)
    }
}

/// `YAPPARI_REQUEST_TIMEOUT_SECS` as a duration; unset means the default
fn parse_timeout(value: Option<&str>) -> Result<Duration> {
    match value {
        None => Ok(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)),
        Some(v) => match v.trim().parse::<u64>() {
            Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
            _ => bail!("YAPPARI_REQUEST_TIMEOUT_SECS is not a positive integer: {}", v),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_documented_defaults() {
        let defaults = Defaults::default();
        assert_eq!(defaults.model, "gpt-4o-mini");
        assert_eq!(defaults.prompt, "You are a helpful assistant");
        assert!((defaults.temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(defaults.max_tokens, 3000);
        assert_eq!(defaults.max_history_tokens, 4096);
    }

    #[test]
    fn test_request_timeout_parsing() {
        assert_eq!(parse_timeout(None).unwrap(), Duration::from_secs(120));
        assert_eq!(parse_timeout(Some("30")).unwrap(), Duration::from_secs(30));
        assert_eq!(parse_timeout(Some(" 45 ")).unwrap(), Duration::from_secs(45));
    }

    #[test]
    fn test_malformed_request_timeout_is_rejected() {
        for raw in ["soon", "", "0", "-5", "1.5"] {
            let err = parse_timeout(Some(raw)).unwrap_err().to_string();
            assert!(err.contains("YAPPARI_REQUEST_TIMEOUT_SECS"), "{}", err);
        }
    }
}
