//! gembot: relays Telegram chats to the Gemini API and streams answers back.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod llm;
pub mod logging;
pub mod messaging;
pub mod pipeline;
pub mod prompt;
pub mod relay;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, ErrorList, Result};

use serde::{Deserialize, Serialize};

/// Chat identifier type.
pub type ChatId = i64;

/// Platform message identifier type.
pub type MessageId = i32;

/// Who authored a conversation turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Model,
}

impl ChatRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Model => "model",
        }
    }
}

impl std::fmt::Display for ChatRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One logical turn extracted from the chat platform.
///
/// Built once per inbound update (and once for its reply-parent) and dropped
/// when the answer completes. Only its textual projection is ever persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub text: String,
    /// Raw attachments, classified later by content sniffing.
    pub files: Vec<Vec<u8>>,
}

/// Kind of native media a platform message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
    Video,
    VideoNote,
    Audio,
    Voice,
    Document,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Photo => "photo",
            MediaKind::Video => "video",
            MediaKind::VideoNote => "video note",
            MediaKind::Audio => "audio",
            MediaKind::Voice => "voice",
            MediaKind::Document => "document",
        }
    }
}

/// A downloadable media attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    pub kind: MediaKind,
    pub file_id: String,
}

/// A chat message as delivered by the platform adapter.
#[derive(Debug, Clone, Default)]
pub struct IncomingMessage {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub user_id: u64,
    pub username: Option<String>,
    pub display_name: String,
    /// Authored by a bot account (including this one).
    pub from_bot: bool,
    /// Body text; only set for plain text messages.
    pub text: Option<String>,
    pub caption: Option<String>,
    pub media: Option<MediaRef>,
    pub media_group_id: Option<String>,
    pub reply_to: Option<Box<IncomingMessage>>,
    pub edited: bool,
}

impl IncomingMessage {
    /// Text or one of the supported media kinds. Everything else (stickers,
    /// locations, polls...) is not answerable.
    pub fn is_usable(&self) -> bool {
        self.text.is_some() || self.media.is_some()
    }

    /// Body text or caption, whichever the message has.
    pub fn text_or_caption(&self) -> Option<&str> {
        self.text.as_deref().or(self.caption.as_deref())
    }

    pub fn role(&self) -> ChatRole {
        if self.from_bot {
            ChatRole::Model
        } else {
            ChatRole::User
        }
    }

    /// Name used in logs and interaction records.
    pub fn author(&self) -> String {
        match &self.username {
            Some(username) => format!("@{username}"),
            None => self.display_name.clone(),
        }
    }
}

/// An inline query typed in some chat's input field.
#[derive(Debug, Clone)]
pub struct InlineRequest {
    pub id: String,
    pub user_id: u64,
    pub username: Option<String>,
    pub query: String,
}

/// Everything an adapter delivers to the dispatcher.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    Message(IncomingMessage),
    Inline(InlineRequest),
}

impl InboundEvent {
    pub fn username(&self) -> Option<&str> {
        match self {
            InboundEvent::Message(message) => message.username.as_deref(),
            InboundEvent::Inline(request) => request.username.as_deref(),
        }
    }
}

/// Non-text payloads the relay can deliver.
#[derive(Debug, Clone)]
pub enum OutboundMedia {
    Photo(Vec<u8>),
    /// Ogg/Opus voice note.
    Voice(Vec<u8>),
    Video(Vec<u8>),
    Document {
        data: Vec<u8>,
        file_name: String,
        caption: Option<String>,
    },
}

impl OutboundMedia {
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMedia::Photo(_) => "photo",
            OutboundMedia::Voice(_) => "voice",
            OutboundMedia::Video(_) => "video",
            OutboundMedia::Document { .. } => "document",
        }
    }

    pub fn len(&self) -> usize {
        match self {
            OutboundMedia::Photo(data)
            | OutboundMedia::Voice(data)
            | OutboundMedia::Video(data)
            | OutboundMedia::Document { data, .. } => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Render a parent/original pair the way it is stored in interaction records.
pub fn messages_to_prompt(parent: Option<&ChatMessage>, original: Option<&ChatMessage>) -> String {
    [parent, original]
        .into_iter()
        .flatten()
        .map(|message| {
            if message.files.is_empty() {
                format!("[{}] {}", message.role, message.text)
            } else {
                format!(
                    "[{}] {} ({} file(s))",
                    message.role,
                    message.text,
                    message.files.len()
                )
            }
        })
        .collect::<Vec<_>>()
        .join("\n--------\n")
}
