//! Error types
//!
//! `BotError` is what every store and orchestrator returns. `ExternalError` covers the
//! inference and transcript providers. Snapshot name lookups that match nothing or too
//! much are not errors; they come back as `SnapshotMatch` outcomes.

use thiserror::Error;

/// Failures of the inference or transcript provider
#[derive(Error, Debug)]
pub enum ExternalError {
    #[error("Rate limited by the inference provider")]
    RateLimited,
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Transcripts are disabled for video ID {0}")]
    TranscriptsDisabled(String),
    #[error("No transcript found for video ID {video_id} in language '{language}'")]
    NoTranscriptForLanguage { video_id: String, language: String },
    #[error("No transcript is available for video ID {0}")]
    NoTranscriptAvailable(String),
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

/// Bot errors
#[derive(Error, Debug)]
pub enum BotError {
    #[error("Setting '{key}' has an invalid value: {value}")]
    Configuration { key: String, value: String },
    #[error("Chat name must not be empty")]
    EmptyName,
    #[error("User {0} has not been initialized")]
    UserNotInitialized(i64),
    #[error("{0} did not answer in time")]
    Timeout(&'static str),
    #[error(transparent)]
    External(#[from] ExternalError),
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BotError>;

impl BotError {
    /// True for failures coming from the inference or transcript provider
    pub fn is_external(&self) -> bool {
        matches!(self, BotError::External(_) | BotError::Timeout(_))
    }

    /// Text shown to the chat user
    pub fn user_message(&self) -> String {
        match self {
            BotError::Configuration { key, value } => format!(
                "⚙️ Setting '{}' has an invalid value '{}'. Fix it with /s {} <value> or /s {} default.",
                key, value, key, key
            ),
            BotError::EmptyName => "❔ Please provide a name for the chat history.".to_string(),
            BotError::UserNotInitialized(_) => "👋 Send /start first.".to_string(),
            BotError::Timeout(service) => {
                format!("⌛ {} took too long. Try again? (also, better clear history)", service)
            }
            BotError::External(ExternalError::RateLimited)
            | BotError::External(ExternalError::Api { .. })
            | BotError::External(ExternalError::Http(_))
            | BotError::External(ExternalError::MalformedResponse(_)) => {
                "❌ OpenAI error. Try again? (also, better clear history)".to_string()
            }
            BotError::External(e) => format!("❌ {}.", e),
            BotError::Storage(_) | BotError::Serialization(_) | BotError::Io(_) => {
                "💥 Internal error, check the logs.".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_classification() {
        assert!(BotError::External(ExternalError::RateLimited).is_external());
        assert!(BotError::Timeout("OpenAI").is_external());
        assert!(!BotError::EmptyName.is_external());
    }

    #[test]
    fn test_transcript_errors_are_user_readable() {
        let err = BotError::External(ExternalError::TranscriptsDisabled("dQw4w9WgXcQ".into()));
        assert_eq!(
            err.user_message(),
            "❌ Transcripts are disabled for video ID dQw4w9WgXcQ."
        );
    }
}
