//! Telegram front end
//!
//! Thin glue between Telegram updates and the assistant: access checks, command
//! parsing, progress notices and reply chunking. Every message is handled in its own
//! task; the assistant serialises requests from the same user.
//!
//! Uses explicit Dispatcher pattern for reliable message polling.

use anyhow::{Context, Result};
use std::sync::Arc;
use teloxide::{
    dispatching::{Dispatcher, UpdateFilterExt},
    dptree,
    error_handlers::LoggingErrorHandler,
    net::Download,
    prelude::*,
    types::{ChatAction, ParseMode, PhotoSize, Update},
};
use tracing::{debug, error, info, warn};

use crate::access::{AccessList, AccessUpdate};
use crate::assistant::{Assistant, AssistantConfig};
use crate::config::Config;
use crate::error::BotError;
use crate::openai::OpenAiClient;
use crate::store::{Database, Forgotten, SettingKey, SettingsStore, SnapshotMatch, SnapshotStore};
use crate::tokenizer::BpeTokenizer;
use crate::youtube::{is_video_link, YoutubeTranscripts};

/// Telegram rejects longer messages
pub(crate) const MAX_MESSAGE_LENGTH: usize = 4096;

const VALID_KEYS: &str = "model, prompt, temperature, max_tokens, max_history_tokens";

struct BotData {
    db: Arc<Database>,
    assistant: Assistant,
    settings: SettingsStore,
    snapshots: SnapshotStore,
    access: AccessList,
}

pub async fn run_telegram_bot(config: Config) -> Result<()> {
    let db = Arc::new(
        Database::open(&config.db_path)
            .with_context(|| format!("Failed to open database {}", config.db_path.display()))?,
    );
    let access = AccessList::load(&config.owner, &config.allowed_users_path).with_context(|| {
        format!(
            "Failed to load allowed users from {}",
            config.allowed_users_path.display()
        )
    })?;

    let inference = Arc::new(OpenAiClient::from_config(&config).context("Failed to build OpenAI client")?);
    let transcripts = Arc::new(
        YoutubeTranscripts::new(config.request_timeout).context("Failed to build YouTube client")?,
    );
    let assistant = Assistant::new(
        db.clone(),
        inference,
        transcripts,
        Arc::new(BpeTokenizer::new()),
        AssistantConfig::from_config(&config),
    );

    let data = Arc::new(BotData {
        settings: SettingsStore::new(db.clone()),
        snapshots: SnapshotStore::new(db.clone()),
        db,
        assistant,
        access,
    });

    tracing::info!("===========================================");
    tracing::info!("  YAPPARI - Starting...");
    tracing::info!("===========================================");
    tracing::info!("Owner: @{}", data.access.owner());
    tracing::info!("Database: {}", config.db_path.display());
    tracing::info!("Default model: {}", config.defaults.model);

    let bot = Bot::new(&config.bot_token);
    let me = bot.get_me().await.context("Failed to reach Telegram")?;
    tracing::info!("Logged in as @{}", me.username());

    let handler = dptree::entry().branch(Update::filter_message().endpoint(message_handler));

    tracing::info!("Starting dispatcher with long polling...");

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![data])
        .default_handler(|upd| async move {
            tracing::debug!("Unhandled update: {:?}", upd);
        })
        .error_handler(LoggingErrorHandler::with_custom_text(
            "Error in message handler",
        ))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    tracing::warn!("Dispatcher stopped");
    Ok(())
}

/// Message handler endpoint for the dispatcher
async fn message_handler(bot: Bot, msg: Message, data: Arc<BotData>) -> ResponseResult<()> {
    let text_preview = msg
        .text()
        .unwrap_or("<non-text>")
        .chars()
        .take(50)
        .collect::<String>();
    info!(">>> Message received: chat={}, text={:?}", msg.chat.id, text_preview);

    tokio::spawn(async move {
        if let Err(e) = handle_message(bot, msg, data).await {
            error!("Error handling message: {:#}", e);
        }
    });

    Ok(())
}

async fn handle_message(bot: Bot, msg: Message, data: Arc<BotData>) -> Result<()> {
    let username = msg
        .from
        .as_ref()
        .and_then(|u| u.username.clone())
        .unwrap_or_default();

    if !admit_user(&data.access, &data.db, &username, msg.chat.id.0)? {
        warn!("Unauthorized user: {:?} in chat {}", username, msg.chat.id);
        return Ok(());
    }

    if let Some(text) = msg.text() {
        if let Some(command) = Command::parse(text) {
            return handle_command(&bot, &msg, &data, &username, command).await;
        }
        return handle_text(&bot, &msg, &data, text).await;
    }

    if let Some(photo) = msg.photo().and_then(|sizes| sizes.last()) {
        return handle_photo(&bot, &msg, &data, photo).await;
    }

    Ok(())
}

/// Access check; an allowed user gets a history row on first contact
pub(crate) fn admit_user(
    access: &AccessList,
    db: &Database,
    username: &str,
    chat_id: i64,
) -> std::result::Result<bool, BotError> {
    if !access.is_allowed(username) {
        return Ok(false);
    }
    db.init_user(chat_id)?;
    Ok(true)
}

async fn handle_text(bot: &Bot, msg: &Message, data: &BotData, text: &str) -> Result<()> {
    let chat_id = msg.chat.id;
    let text = text.trim();
    let (first, rest) = text.split_once(char::is_whitespace).unwrap_or((text, ""));

    let outcome = if is_video_link(first) {
        bot.send_message(chat_id, "Analyzing video transcript... ⏳️").await?;
        bot.send_chat_action(chat_id, ChatAction::Typing).await?;
        data.assistant.summarize_video(chat_id.0, first, rest.trim()).await
    } else {
        bot.send_message(chat_id, "Thinking... ⏳️").await?;
        bot.send_chat_action(chat_id, ChatAction::Typing).await?;
        data.assistant.query(chat_id.0, text).await
    };

    send_outcome(bot, chat_id, outcome).await
}

async fn handle_photo(bot: &Bot, msg: &Message, data: &BotData, photo: &PhotoSize) -> Result<()> {
    let chat_id = msg.chat.id;
    bot.send_message(chat_id, "Analyzing image... ⏳️").await?;
    bot.send_chat_action(chat_id, ChatAction::Typing).await?;

    let file = bot.get_file(photo.file.id.clone()).await?;
    let mut jpeg: Vec<u8> = Vec::new();
    bot.download_file(&file.path, &mut jpeg).await?;
    debug!("Downloaded photo: {} bytes", jpeg.len());

    let outcome = data
        .assistant
        .describe_image(chat_id.0, &jpeg, msg.caption())
        .await;
    send_outcome(bot, chat_id, outcome).await
}

async fn send_outcome(
    bot: &Bot,
    chat_id: ChatId,
    outcome: std::result::Result<String, BotError>,
) -> Result<()> {
    match outcome {
        Ok(reply) => send_long_message(bot, chat_id, &reply).await,
        Err(e) => {
            if e.is_external() {
                warn!("Request for chat {} failed: {}", chat_id, e);
            } else {
                error!("Request for chat {} failed: {}", chat_id, e);
            }
            bot.send_message(chat_id, e.user_message()).await?;
            Ok(())
        }
    }
}

/// Bot commands, with their short aliases
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    Start,
    Help,
    Forget(String),
    Save(String),
    Load(String),
    List,
    /// Raw `<setting> <value>` arguments
    Setting(String),
    Settings,
    UsersAllow(String),
    UsersDisallow(String),
    UsersList,
    Unknown(String),
}

impl Command {
    /// `None` when the text is not a command
    pub(crate) fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if !text.starts_with('/') {
            return None;
        }

        let (word, args) = text.split_once(char::is_whitespace).unwrap_or((text, ""));
        let name = word[1..].split('@').next().unwrap_or_default();
        let args = args.trim().to_string();

        Some(match name {
            "start" => Self::Start,
            "help" | "h" => Self::Help,
            "chats_forget" | "f" => Self::Forget(args),
            "chats_save" | "save" => Self::Save(args),
            "chats_load" | "load" => Self::Load(args),
            "chats_list" | "ls" => Self::List,
            "setting" | "s" => Self::Setting(args),
            "settings" | "ss" => Self::Settings,
            "users_allow" | "ua" => Self::UsersAllow(args),
            "users_disallow" | "ud" => Self::UsersDisallow(args),
            "users_list" | "u" => Self::UsersList,
            other => Self::Unknown(other.to_string()),
        })
    }

    fn owner_only(&self) -> bool {
        matches!(
            self,
            Self::UsersAllow(_) | Self::UsersDisallow(_) | Self::UsersList
        )
    }
}

async fn handle_command(
    bot: &Bot,
    msg: &Message,
    data: &BotData,
    username: &str,
    command: Command,
) -> Result<()> {
    let chat_id = msg.chat.id;
    let user = chat_id.0;

    if command.owner_only() && !data.access.is_owner(username) {
        warn!("Non-owner @{} tried {:?}", username, command);
        return Ok(());
    }

    let reply: std::result::Result<String, BotError> = match command {
        Command::Start => data.db.init_user(user).map(|_| start_message(username)),
        Command::Help => {
            bot.send_message(chat_id, help_message(username)).await?;
            if data.access.is_owner(username) {
                bot.send_message(chat_id, OWNER_HELP).await?;
            }
            return Ok(());
        }
        Command::Forget(pattern) => data
            .snapshots
            .forget(user, &pattern)
            .map(|outcome| render_forget(&pattern, outcome)),
        Command::Save(name) => data
            .snapshots
            .save(user, &name)
            .map(|_| format!("💾🔻 Chat history saved under the name '{}'.", name.trim())),
        Command::Load(pattern) if pattern.is_empty() => {
            Ok("❔ Please provide the name of the saved chat history to load.".to_string())
        }
        Command::Load(pattern) => data
            .snapshots
            .load(user, &pattern)
            .map(|outcome| render_load(&pattern, outcome)),
        Command::List => data.snapshots.list(user).map(|names| render_saved_chats(&names)),
        Command::Setting(args) => update_setting(&data.settings, user, &args),
        Command::Settings => data
            .settings
            .overview(user)
            .map(|overview| render_settings(&overview)),
        Command::UsersAllow(name) => data.access.allow(&name).map(|update| match update {
            AccessUpdate::Changed => format!("✅ User '{}' added to allowed users.", clean(&name)),
            AccessUpdate::Unchanged => format!(
                "❌ User '{}' is already in the allowed users list.",
                clean(&name)
            ),
            AccessUpdate::Invalid => "❓️ Invalid username.".to_string(),
        }),
        Command::UsersDisallow(name) => data.access.disallow(&name).map(|update| match update {
            AccessUpdate::Changed => {
                format!("✅ User '{}' removed from allowed users.", clean(&name))
            }
            AccessUpdate::Unchanged => {
                format!("❌ User '{}' is not in the allowed users list.", clean(&name))
            }
            AccessUpdate::Invalid => "❓️ Invalid username.".to_string(),
        }),
        Command::UsersList => Ok(format!("👀 Allowed users:\n{}", data.access.list().join("\n"))),
        Command::Unknown(name) => {
            debug!("Ignoring unknown command /{}", name);
            return Ok(());
        }
    };

    let text = reply.unwrap_or_else(|e| {
        error!("Command failed for chat {}: {}", chat_id, e);
        e.user_message()
    });
    bot.send_message(chat_id, text).await?;
    Ok(())
}

fn clean(username: &str) -> String {
    crate::access::normalize_username(username)
}

/// `/setting <key> <value>`, where the value `default` drops the override
pub(crate) fn update_setting(
    settings: &SettingsStore,
    user: i64,
    args: &str,
) -> std::result::Result<String, BotError> {
    let Some((key, value)) = args
        .split_once(char::is_whitespace)
        .map(|(k, v)| (k, v.trim()))
        .filter(|(_, v)| !v.is_empty())
    else {
        return Ok("❓ Usage: /setting <setting> <value>".to_string());
    };

    let Ok(key) = key.parse::<SettingKey>() else {
        return Ok(format!("❌ Invalid key.\n\nValid keys are: {}.", VALID_KEYS));
    };

    if value == "default" {
        settings.remove(user, key)?;
        Ok(format!("✅ Setting '{}' is back to default.", key))
    } else {
        settings.set(user, key, value)?;
        Ok(format!("✅ Setting '{}' updated to '{}'.", key, value))
    }
}

pub(crate) fn render_load(pattern: &str, outcome: SnapshotMatch<String>) -> String {
    match outcome {
        SnapshotMatch::Found(name) => format!("✨ Chat '{}' loaded!", name),
        SnapshotMatch::NotFound => format!("❔ No chats found for \"{}\"", pattern),
        SnapshotMatch::Ambiguous(names) => ambiguous(pattern, &names),
    }
}

pub(crate) fn render_forget(pattern: &str, outcome: SnapshotMatch<Forgotten>) -> String {
    match outcome {
        SnapshotMatch::Found(Forgotten::Current) => "✨ History cleared!".to_string(),
        SnapshotMatch::Found(Forgotten::All { .. }) => {
            "✨ History cleared for all chats!".to_string()
        }
        SnapshotMatch::Found(Forgotten::Snapshot(name)) => format!("✨ Chat '{}' deleted!", name),
        SnapshotMatch::NotFound => format!("❔ No chats found for \"{}\"", pattern),
        SnapshotMatch::Ambiguous(names) => ambiguous(pattern, &names),
    }
}

fn ambiguous(pattern: &str, names: &[String]) -> String {
    format!(
        "❔ Multiple chats found for \"{}\":\n{}\n\nPick specific one!",
        pattern,
        names.join("\n")
    )
}

pub(crate) fn render_saved_chats(names: &[String]) -> String {
    if names.is_empty() {
        "🤷 No saved chats found.".to_string()
    } else {
        format!("📜 Saved chats:\n{}", names.join("\n"))
    }
}

pub(crate) fn render_settings(overview: &[(SettingKey, Option<String>)]) -> String {
    let lines: Vec<String> = overview
        .iter()
        .map(|(key, value)| format!("{}: {}", key, value.as_deref().unwrap_or("default")))
        .collect();
    format!("⚙️ Current settings:\n{}", lines.join("\n"))
}

fn display_name(username: &str) -> &str {
    let name = username.trim();
    if name.is_empty() {
        "user"
    } else {
        name
    }
}

pub(crate) fn start_message(username: &str) -> String {
    format!(
        "👋 Hey @{}! I am YAPPARI!👋\n\n\
        Yet Another Prompt-based Personal Assistant Robot, Indeed!\n\n\
        I am just a wrapper for GPT, so i'll treat your messages as user prompts.\n\n\
        ❔If you wanna learn more, type /help anytime!❔",
        display_name(username)
    )
}

fn help_message(username: &str) -> String {
    format!(
        "Hello, @{}!\n\
        🤓 Just type anything, it will be passed to GPT.\n\n\
        📺 YouTube videos summary:\n\
        <video_link> <additional_questions>\n\
        youtu.be/dQw4w9WgXcQ What will he never do?\n\n\
        👀 Image recognition:\n\
        just send me a photo.\n\
        You can also put your questions in caption.\n\n\
        📜 Save/Load chats:\n\
        /chats_forget | /f - forget current chat\n    \
            all - forget every chat\n    \
            <name> - to forget specific chat\n\
        /chats_save <name> | /save <name> - save current chat\n\
        /chats_load <name> | /load <name> - load some chat\n\
        /chats_list | /ls - list all saved chats\n\n\
        ⚙️ Settings:\n\
        /settings | /ss - list all settings\n\
        /setting <setting> <value> | /s <s> <v> - set a setting\n\
        Available settings:\n\
        {}\n\n\
        😌 やっぱり!",
        display_name(username),
        VALID_KEYS
    )
}

const OWNER_HELP: &str = "👑 Since you're bot owner, you can also allow your friends to use your bot!\n\
/users_allow <username> | /ua <username> - add a user to an allow list\n\
/users_disallow <username> | /ud <username> - remove user from an allow list\n\
/users_list | /u - show allowed users";

/// Split on character boundaries into chunks of at most `max_units` UTF-16 code units
///
/// Telegram measures message length in UTF-16, so characters outside the BMP count
/// twice. A chunk always holds at least one character.
pub(crate) fn split_message(text: &str, max_units: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        let mut units = 0;
        let mut split_at = remaining.len();
        for (i, c) in remaining.char_indices() {
            units += c.len_utf16();
            if units > max_units && i > 0 {
                split_at = i;
                break;
            }
        }
        let (chunk, rest) = remaining.split_at(split_at);
        chunks.push(chunk);
        remaining = rest;
    }
    chunks
}

#[allow(deprecated)]
async fn send_long_message(bot: &Bot, chat_id: ChatId, text: &str) -> Result<()> {
    if text.trim().is_empty() {
        bot.send_message(chat_id, "(no response)").await?;
        return Ok(());
    }

    for chunk in split_message(text, MAX_MESSAGE_LENGTH) {
        // Model output often has unbalanced markdown; Telegram rejects it
        if let Err(e) = bot
            .send_message(chat_id, chunk)
            .parse_mode(ParseMode::Markdown)
            .await
        {
            warn!("Markdown rejected for chat {}, sending plain text: {}", chat_id, e);
            bot.send_message(chat_id, chunk).await?;
        }
    }
    Ok(())
}
