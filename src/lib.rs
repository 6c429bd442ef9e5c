//! YAPPARI
//!
//! Yet Another Prompt-based Personal Assistant Robot, Indeed: a Telegram chat bot in
//! front of an OpenAI-compatible model.
//!
//! # Features
//!
//! - **Chat**: per-user history kept under a token budget, oldest turns evicted first
//! - **Snapshots**: save, load, forget and list named conversations
//! - **Settings**: per-user model, prompt, temperature and token limits
//! - **Video summaries**: YouTube transcripts summarized without bloating history
//! - **Image recognition**: photos described by a vision model
//!
//! # Architecture
//!
//! ```text
//! Telegram ──► telegram ──► Assistant ──► OpenAI
//!                 │            │
//!                 │            ├── Trimmer (Tokenizer)
//!                 │            ├── YouTube transcripts
//!                 │            └── Settings / History (SQLite)
//!                 ├── Snapshots (SQLite)
//!                 └── AccessList (file)
//! ```

pub mod access;
pub mod assistant;
pub mod config;
pub mod error;
pub mod openai;
pub mod store;
pub mod telegram;
pub mod tokenizer;
pub mod trimmer;
pub mod turn;
pub mod youtube;


pub use access::{AccessList, AccessUpdate};
pub use assistant::{Assistant, AssistantConfig};
pub use config::{Config, Defaults};
pub use error::{BotError, ExternalError, Result};
pub use openai::{CompletionRequest, InferenceClient, OpenAiClient};
pub use store::{
    Database, EffectiveSettings, Forgotten, HistoryStore, SettingKey, SettingsStore,
    SnapshotMatch, SnapshotStore,
};
pub use tokenizer::{BpeTokenizer, TokenCounter, Tokenizer};
pub use trimmer::{history_tokens, trim_history};
pub use turn::{Content, ContentPart, ImageRef, Turn};
pub use youtube::{
    extract_video_id, fetch_transcript, TranscriptProvider, TranscriptTrack, YoutubeTranscripts,
};
