//! Chat platform trait.

use crate::error::Result;
use crate::{ChatId, InboundEvent, MessageId, OutboundMedia};

use futures::Stream;
use std::pin::Pin;

/// Inbound event stream type.
pub type InboundStream = Pin<Box<dyn Stream<Item = InboundEvent> + Send>>;

/// One result offered for an inline query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineArticle {
    pub id: String,
    pub title: String,
    pub text: String,
}

/// Static trait for chat platform adapters.
///
/// Every outbound call returns once the platform has accepted or rejected the
/// request; rejections surface as `MessagingError::Rejected`.
pub trait ChatPlatform: Send + Sync + 'static {
    /// Unique name for this adapter.
    fn name(&self) -> &str;

    /// Start receiving updates.
    fn start(&self) -> impl std::future::Future<Output = Result<InboundStream>> + Send;

    /// Send text, optionally as a reply. Returns the new message's id.
    fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        reply_to: Option<MessageId>,
    ) -> impl std::future::Future<Output = Result<MessageId>> + Send;

    /// Replace the text of a message this bot sent earlier.
    fn edit_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Send a photo, voice note, video or document.
    fn send_media(
        &self,
        chat_id: ChatId,
        media: OutboundMedia,
        reply_to: Option<MessageId>,
    ) -> impl std::future::Future<Output = Result<MessageId>> + Send;

    /// Put an emoji reaction on a message.
    fn set_reaction(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        emoji: &str,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Show the "typing..." chat action.
    fn send_typing(&self, chat_id: ChatId) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Fetch the bytes of an attachment.
    fn download_file(
        &self,
        file_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;

    fn answer_inline_query(
        &self,
        query_id: &str,
        results: Vec<InlineArticle>,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Graceful shutdown.
    fn shutdown(&self) -> impl std::future::Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }
}
