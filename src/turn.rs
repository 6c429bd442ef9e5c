//! Conversation turns
//!
//! A history document is a `Vec<Turn>`. Its JSON form is exactly the `messages` array
//! the chat completions API expects, so the stored document can be sent as is:
//!
//! ```text
//! [{"role":"system","content":"You are a helpful assistant"},
//!  {"role":"user","content":[{"type":"text","text":"..."},
//!                            {"type":"image_url","image_url":{"url":"data:..."}}]}]
//! ```

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};

/// One role-tagged entry of a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", content = "content", rename_all = "lowercase")]
pub enum Turn {
    System(Content),
    User(Content),
    Assistant(Content),
}

/// Turn payload: plain text or a list of typed parts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageRef },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    pub url: String,
}

impl Turn {
    pub fn system(text: impl Into<String>) -> Self {
        Turn::System(Content::Text(text.into()))
    }

    pub fn user(text: impl Into<String>) -> Self {
        Turn::User(Content::Text(text.into()))
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Turn::Assistant(Content::Text(text.into()))
    }

    /// User turn carrying a caption and an inline JPEG
    pub fn user_with_image(caption: impl Into<String>, jpeg: &[u8]) -> Self {
        Turn::User(Content::Parts(vec![
            ContentPart::Text {
                text: caption.into(),
            },
            ContentPart::ImageUrl {
                image_url: ImageRef::jpeg(jpeg),
            },
        ]))
    }

    pub fn role(&self) -> &'static str {
        match self {
            Turn::System(_) => "system",
            Turn::User(_) => "user",
            Turn::Assistant(_) => "assistant",
        }
    }

    pub fn content(&self) -> &Content {
        match self {
            Turn::System(c) | Turn::User(c) | Turn::Assistant(c) => c,
        }
    }

    /// Text of the turn, parts joined by newlines, images skipped
    pub fn text(&self) -> String {
        match self.content() {
            Content::Text(text) => text.clone(),
            Content::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn has_image(&self) -> bool {
        matches!(
            self.content(),
            Content::Parts(parts) if parts.iter().any(|p| matches!(p, ContentPart::ImageUrl { .. }))
        )
    }
}

impl ImageRef {
    /// Base64 data URL for a JPEG payload
    pub fn jpeg(bytes: &[u8]) -> Self {
        Self {
            url: format!("data:image/jpeg;base64,{}", BASE64.encode(bytes)),
        }
    }
}

/// Canonical text form of a history document, the one that gets tokenized
pub fn serialize_history(history: &[Turn]) -> serde_json::Result<String> {
    serde_json::to_string(history)
}

pub fn parse_history(document: &str) -> serde_json::Result<Vec<Turn>> {
    serde_json::from_str(document)
}
