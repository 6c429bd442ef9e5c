//! Request orchestration
//!
//! Three request shapes share one lifecycle: load settings and history, seed a system
//! turn into an empty history, call the model, record the exchange, trim, persist.
//!
//! ```text
//! query          history + user turn            -> model -> + assistant turn
//! summarize      prompt + transcript (+ questions) -> model -> + 4 bookkeeping turns
//! describe image history + caption/image turn   -> model -> + 4 bookkeeping turns
//! ```
//!
//! Transcripts and images are never written to the stored history; markers take
//! their place.

use crate::config::{Config, Defaults};
use crate::error::{BotError, ExternalError, Result};
use crate::openai::{CompletionRequest, InferenceClient};
use crate::store::{Database, EffectiveSettings, HistoryStore, SettingsStore};
use crate::tokenizer::Tokenizer;
use crate::trimmer::trim_history;
use crate::turn::Turn;
use crate::youtube::{extract_video_id, fetch_transcript, TranscriptProvider};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

pub const DEFAULT_IMAGE_CAPTION: &str = "What's in this image?";

pub const TRANSCRIPT_OMITTED: &str = "[FULL_VIDEO_TRANSCRIPT,OMITTED_IN_CHAT_HISTORY]";
pub const SUMMARY_FOLLOWS: &str = "[YOUR_SUMMARY_OF_A_VIDEO_TRANSCRIPT]:";
pub const PICTURE_OMITTED: &str = "[PICTURE,OMITTED_IN_CHAT_HISTORY]";
pub const DESCRIPTION_FOLLOWS: &str = "[YOUR_DESCRIPTION_OF_AN_IMAGE]:";

/// Orchestrator settings taken from the bot config
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    pub defaults: Defaults,
    pub transcript_language: String,
    /// Bound on each inference or transcript call
    pub call_timeout: Duration,
}

impl AssistantConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            defaults: config.defaults.clone(),
            transcript_language: config.transcript_language.clone(),
            call_timeout: config.request_timeout,
        }
    }
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            defaults: Defaults::default(),
            transcript_language: "en".to_string(),
            call_timeout: Duration::from_secs(120),
        }
    }
}

/// Conversation orchestrator
pub struct Assistant {
    settings: SettingsStore,
    history: HistoryStore,
    inference: Arc<dyn InferenceClient>,
    transcripts: Arc<dyn TranscriptProvider>,
    tokenizer: Arc<dyn Tokenizer>,
    config: AssistantConfig,
    /// One lock per user: requests from the same user run one at a time
    user_locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl Assistant {
    pub fn new(
        db: Arc<Database>,
        inference: Arc<dyn InferenceClient>,
        transcripts: Arc<dyn TranscriptProvider>,
        tokenizer: Arc<dyn Tokenizer>,
        config: AssistantConfig,
    ) -> Self {
        Self {
            settings: SettingsStore::new(db.clone()),
            history: HistoryStore::new(db),
            inference,
            transcripts,
            tokenizer,
            config,
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Plain chat: the message goes to the model with the whole history
    ///
    /// The user turn is stored before the model is called, so a failed call does not
    /// lose the question.
    pub async fn query(&self, chat_id: i64, text: &str) -> Result<String> {
        let _guard = self.lock_user(chat_id).await;
        let (settings, mut history) = self.prepare(chat_id)?;

        history.push(Turn::user(text));
        let mut history = self.trim(&settings, history)?;
        self.history.replace(chat_id, &history)?;

        let request = CompletionRequest {
            model: settings.model.clone(),
            messages: history.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        };
        let reply = self
            .bounded("OpenAI", self.inference.complete(&request))
            .await?;

        history.push(Turn::assistant(reply.as_str()));
        let history = self.trim(&settings, history)?;
        self.history.replace(chat_id, &history)?;

        info!("Chat {}: answered query ({} turns in history)", chat_id, history.len());
        Ok(reply)
    }

    /// Summarize a video from its transcript, optionally answering `questions`
    ///
    /// The model sees only the prompt, the transcript and the questions; the stored
    /// history is not sent. Nothing but the seed is stored when this fails.
    pub async fn summarize_video(&self, chat_id: i64, link: &str, questions: &str) -> Result<String> {
        let _guard = self.lock_user(chat_id).await;
        let (settings, history) = self.prepare(chat_id)?;

        let video_id = extract_video_id(link);
        let transcript = self
            .bounded(
                "YouTube",
                fetch_transcript(
                    self.transcripts.as_ref(),
                    &video_id,
                    &self.config.transcript_language,
                ),
            )
            .await?;
        debug!("Chat {}: transcript for {} is {} chars", chat_id, video_id, transcript.len());

        let mut messages = vec![
            Turn::system(settings.prompt.as_str()),
            Turn::system(format!(
                "Summarize the following video based on it's transcript:\n\n{}",
                transcript
            )),
        ];
        let questions = questions.trim();
        if !questions.is_empty() {
            messages.push(Turn::user(questions));
        }

        let request = CompletionRequest {
            model: settings.model.clone(),
            messages,
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        };
        let summary = self
            .bounded("OpenAI", self.inference.complete(&request))
            .await?
            .trim()
            .to_string();

        let request_line = if questions.is_empty() {
            link.to_string()
        } else {
            format!("{} {}", link, questions)
        };
        let mut history = history;
        history.extend([
            Turn::user(request_line),
            Turn::system(TRANSCRIPT_OMITTED),
            Turn::system(SUMMARY_FOLLOWS),
            Turn::assistant(summary.as_str()),
        ]);
        let history = self.trim(&settings, history)?;
        self.history.replace(chat_id, &history)?;

        info!("Chat {}: summarized video {}", chat_id, video_id);
        Ok(summary)
    }

    /// Describe an image; `caption` is the question, with a default when absent
    pub async fn describe_image(
        &self,
        chat_id: i64,
        jpeg: &[u8],
        caption: Option<&str>,
    ) -> Result<String> {
        let caption = caption
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_IMAGE_CAPTION);

        let _guard = self.lock_user(chat_id).await;
        let (settings, mut history) = self.prepare(chat_id)?;

        let mut messages = history.clone();
        messages.push(Turn::user_with_image(caption, jpeg));

        let request = CompletionRequest {
            model: settings.model.clone(),
            messages,
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        };
        let description = self
            .bounded("OpenAI", self.inference.complete(&request))
            .await?;

        history.extend([
            Turn::system(PICTURE_OMITTED),
            Turn::user(caption),
            Turn::system(DESCRIPTION_FOLLOWS),
            Turn::assistant(description.as_str()),
        ]);
        let history = self.trim(&settings, history)?;
        self.history.replace(chat_id, &history)?;

        info!("Chat {}: described image ({} bytes)", chat_id, jpeg.len());
        Ok(description)
    }

    /// Effective settings and history, seeding an empty history with the prompt
    fn prepare(&self, chat_id: i64) -> Result<(EffectiveSettings, Vec<Turn>)> {
        let mut history = self.history.get(chat_id)?;
        let settings = self.settings.load_effective(chat_id, &self.config.defaults)?;

        if history.is_empty() {
            history.push(Turn::system(settings.prompt.as_str()));
            self.history.replace(chat_id, &history)?;
            debug!("Chat {}: seeded history with system prompt", chat_id);
        }

        Ok((settings, history))
    }

    fn trim(&self, settings: &EffectiveSettings, history: Vec<Turn>) -> Result<Vec<Turn>> {
        Ok(trim_history(
            self.tokenizer.as_ref(),
            &settings.model,
            settings.max_history_tokens,
            history,
        )?)
    }

    /// Run an external call under the configured timeout
    async fn bounded<T>(
        &self,
        service: &'static str,
        call: impl Future<Output = std::result::Result<T, ExternalError>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.config.call_timeout, call).await {
            Ok(result) => result.map_err(|e| {
                warn!("{} call failed: {}", service, e);
                BotError::External(e)
            }),
            Err(_) => {
                warn!("{} call timed out after {:?}", service, self.config.call_timeout);
                Err(BotError::Timeout(service))
            }
        }
    }

    /// Idle locks (held by nothing but the map) are dropped on the way in
    async fn lock_user(&self, chat_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.user_locks.lock().await;
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(chat_id).or_default().clone()
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::TokenCounter;
    use crate::youtube::TranscriptTrack;
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl InferenceClient for Echo {
        async fn complete(
            &self,
            request: &CompletionRequest,
        ) -> std::result::Result<String, ExternalError> {
            Ok(format!("{} messages", request.messages.len()))
        }
    }

    struct NoTranscripts;

    #[async_trait]
    impl TranscriptProvider for NoTranscripts {
        async fn list_tracks(
            &self,
            video_id: &str,
        ) -> std::result::Result<Vec<TranscriptTrack>, ExternalError> {
            Err(ExternalError::NoTranscriptAvailable(video_id.to_string()))
        }

        async fn fetch_track(
            &self,
            track: &TranscriptTrack,
        ) -> std::result::Result<Vec<String>, ExternalError> {
            Err(ExternalError::NoTranscriptAvailable(track.language_code.clone()))
        }
    }

    fn assistant() -> Assistant {
        assistant_on(Arc::new(Database::open_in_memory().unwrap()))
    }

    fn assistant_on(db: Arc<Database>) -> Assistant {
        Assistant::new(
            db,
            Arc::new(Echo),
            Arc::new(NoTranscripts),
            Arc::new(TokenCounter::new()),
            AssistantConfig::default(),
        )
    }

    async fn tracked_users(assistant: &Assistant) -> usize {
        assistant.user_locks.lock().await.len()
    }

    #[tokio::test]
    async fn test_idle_user_locks_are_pruned() {
        let assistant = assistant();
        for chat_id in 0..100 {
            drop(assistant.lock_user(chat_id).await);
        }
        assert!(tracked_users(&assistant).await <= 1);
    }

    #[tokio::test]
    async fn test_held_lock_survives_pruning() {
        let assistant = assistant();
        let held = assistant.lock_user(1).await;
        drop(assistant.lock_user(2).await);
        drop(assistant.lock_user(3).await);
        // 1 is held, 3 was just used
        assert_eq!(tracked_users(&assistant).await, 2);

        // Same user still serialises after other users came and went
        let waiter = assistant.user_locks.lock().await.get(&1).cloned().unwrap();
        assert!(waiter.try_lock().is_err());
        drop(held);
        assert!(waiter.try_lock().is_ok());
    }

    #[tokio::test]
    async fn test_queries_leave_no_idle_locks_behind() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        for chat_id in 1..=20 {
            db.init_user(chat_id).unwrap();
        }
        let assistant = assistant_on(db);
        for chat_id in 1..=20 {
            assert_eq!(assistant.query(chat_id, "hi").await.unwrap(), "2 messages");
        }
        assert!(tracked_users(&assistant).await <= 1);
    }
}
