//! Telegram messaging adapter using teloxide.

use crate::error::{MessagingError, Result};
use crate::messaging::traits::{ChatPlatform, InboundStream, InlineArticle};
use crate::{
    ChatId, IncomingMessage, InboundEvent, InlineRequest, MediaKind, MediaRef, MessageId,
    OutboundMedia,
};

use teloxide::net::Download as _;
use teloxide::payloads::{
    GetUpdatesSetters as _, SendDocumentSetters as _, SendMessageSetters as _,
    SendPhotoSetters as _, SendVideoSetters as _, SendVoiceSetters as _,
    SetMessageReactionSetters as _,
};
use teloxide::prelude::Requester as _;
use teloxide::types::{
    AllowedUpdate, ChatAction, FileId, InlineQuery, InlineQueryResult, InlineQueryResultArticle,
    InputFile, InputMessageContent, InputMessageContentText, Message, ReactionType,
    ReplyParameters, UpdateKind,
};
use teloxide::Bot;

use std::future::IntoFuture as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, mpsc};

/// Long-poll wait per `getUpdates` call, below teloxide's client timeout.
const POLL_TIMEOUT_SECS: u32 = 10;

/// Pause before polling again after a failed `getUpdates`.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Telegram adapter state.
pub struct TelegramAdapter {
    bot: Bot,
    shutdown_tx: Arc<RwLock<Option<mpsc::Sender<()>>>>,
}

impl TelegramAdapter {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            bot: Bot::new(token),
            shutdown_tx: Arc::new(RwLock::new(None)),
        }
    }
}

impl ChatPlatform for TelegramAdapter {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&self) -> Result<InboundStream> {
        let (inbound_tx, inbound_rx) = mpsc::channel(256);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        *self.shutdown_tx.write().await = Some(shutdown_tx);

        let me = self
            .bot
            .get_me()
            .await
            .map_err(|error| MessagingError::rejected("get me", error))?;
        tracing::info!(
            username = me.username.as_deref().unwrap_or_default(),
            "telegram connected"
        );

        let bot = self.bot.clone();
        tokio::spawn(async move {
            let mut offset = 0i32;
            loop {
                let request = bot
                    .get_updates()
                    .offset(offset)
                    .timeout(POLL_TIMEOUT_SECS)
                    .allowed_updates(vec![
                        AllowedUpdate::Message,
                        AllowedUpdate::EditedMessage,
                        AllowedUpdate::InlineQuery,
                    ]);

                let updates = tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("telegram polling loop shutting down");
                        break;
                    }
                    updates = request.into_future() => updates,
                };

                let updates = match updates {
                    Ok(updates) => updates,
                    Err(error) => {
                        tracing::warn!(%error, "failed to poll telegram updates");
                        tokio::time::sleep(POLL_RETRY_DELAY).await;
                        continue;
                    }
                };

                for update in updates {
                    offset = offset.max(update.id.0 as i32 + 1);

                    let event = match update.kind {
                        UpdateKind::Message(message) => {
                            InboundEvent::Message(convert_message(&message, false))
                        }
                        UpdateKind::EditedMessage(message) => {
                            InboundEvent::Message(convert_message(&message, true))
                        }
                        UpdateKind::InlineQuery(query) => {
                            InboundEvent::Inline(convert_inline_query(&query))
                        }
                        other => {
                            tracing::debug!(kind = ?other, "ignoring telegram update");
                            continue;
                        }
                    };

                    if let Err(error) = inbound_tx.send(event).await {
                        tracing::warn!(
                            %error,
                            "failed to send inbound event from Telegram (receiver dropped)"
                        );
                        return;
                    }
                }
            }
        });

        let stream = tokio_stream::wrappers::ReceiverStream::new(inbound_rx);
        Ok(Box::pin(stream))
    }

    async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId> {
        let mut request = self
            .bot
            .send_message(teloxide::types::ChatId(chat_id), text);
        if let Some(reply_to) = reply_to {
            request = request.reply_parameters(reply_parameters(reply_to));
        }
        let sent = request
            .await
            .map_err(|error| MessagingError::rejected("send message", error))?;
        Ok(sent.id.0)
    }

    async fn edit_message(&self, chat_id: ChatId, message_id: MessageId, text: &str) -> Result<()> {
        self.bot
            .edit_message_text(
                teloxide::types::ChatId(chat_id),
                teloxide::types::MessageId(message_id),
                text,
            )
            .await
            .map_err(|error| MessagingError::rejected("edit message", error))?;
        Ok(())
    }

    async fn send_media(
        &self,
        chat_id: ChatId,
        media: OutboundMedia,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId> {
        let chat_id = teloxide::types::ChatId(chat_id);
        let reply = reply_to.map(reply_parameters);

        let sent = match media {
            OutboundMedia::Photo(data) => {
                let mut request = self.bot.send_photo(chat_id, InputFile::memory(data));
                if let Some(reply) = reply {
                    request = request.reply_parameters(reply);
                }
                request.await
            }
            OutboundMedia::Voice(data) => {
                let file = InputFile::memory(data).file_name("voice.ogg");
                let mut request = self.bot.send_voice(chat_id, file);
                if let Some(reply) = reply {
                    request = request.reply_parameters(reply);
                }
                request.await
            }
            OutboundMedia::Video(data) => {
                let file = InputFile::memory(data).file_name("video.mp4");
                let mut request = self.bot.send_video(chat_id, file);
                if let Some(reply) = reply {
                    request = request.reply_parameters(reply);
                }
                request.await
            }
            OutboundMedia::Document {
                data,
                file_name,
                caption,
            } => {
                let file = InputFile::memory(data).file_name(file_name);
                let mut request = self.bot.send_document(chat_id, file);
                if let Some(caption) = caption {
                    request = request.caption(caption);
                }
                if let Some(reply) = reply {
                    request = request.reply_parameters(reply);
                }
                request.await
            }
        }
        .map_err(|error| MessagingError::rejected("send media", error))?;

        Ok(sent.id.0)
    }

    async fn set_reaction(&self, chat_id: ChatId, message_id: MessageId, emoji: &str) -> Result<()> {
        self.bot
            .set_message_reaction(
                teloxide::types::ChatId(chat_id),
                teloxide::types::MessageId(message_id),
            )
            .reaction(vec![ReactionType::Emoji {
                emoji: emoji.to_string(),
            }])
            .await
            .map_err(|error| MessagingError::rejected("set reaction", error))?;
        Ok(())
    }

    async fn send_typing(&self, chat_id: ChatId) -> Result<()> {
        self.bot
            .send_chat_action(teloxide::types::ChatId(chat_id), ChatAction::Typing)
            .await
            .map_err(|error| MessagingError::rejected("send chat action", error))?;
        Ok(())
    }

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>> {
        let download_error = |description: String| MessagingError::Download {
            file_id: file_id.to_string(),
            description,
        };

        let file = self
            .bot
            .get_file(FileId(file_id.to_string()))
            .await
            .map_err(|error| download_error(error.to_string()))?;

        let mut data = Vec::with_capacity(file.size as usize);
        self.bot
            .download_file(&file.path, &mut data)
            .await
            .map_err(|error| download_error(error.to_string()))?;

        Ok(data)
    }

    async fn answer_inline_query(&self, query_id: &str, results: Vec<InlineArticle>) -> Result<()> {
        let results: Vec<InlineQueryResult> = results
            .into_iter()
            .map(|article| {
                InlineQueryResult::Article(InlineQueryResultArticle::new(
                    article.id,
                    article.title,
                    InputMessageContent::Text(InputMessageContentText::new(article.text)),
                ))
            })
            .collect();

        self.bot
            .answer_inline_query(teloxide::types::InlineQueryId(query_id.to_string()), results)
            .await
            .map_err(|error| MessagingError::rejected("answer inline query", error))?;
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.read().await.as_ref() {
            tx.send(()).await.ok();
        }

        tracing::info!("telegram adapter shut down");
        Ok(())
    }
}

fn reply_parameters(message_id: MessageId) -> ReplyParameters {
    ReplyParameters::new(teloxide::types::MessageId(message_id)).allow_sending_without_reply()
}

/// Convert a Telegram message, with its reply-parent one level deep.
fn convert_message(message: &Message, edited: bool) -> IncomingMessage {
    let mut converted = convert_single(message, edited);
    converted.reply_to = message
        .reply_to_message()
        .map(|parent| Box::new(convert_single(parent, false)));
    converted
}

fn convert_single(message: &Message, edited: bool) -> IncomingMessage {
    let (user_id, username, display_name, from_bot) = match &message.from {
        Some(user) => (
            user.id.0,
            user.username.clone(),
            user.full_name(),
            user.is_bot,
        ),
        None => (0, None, String::new(), false),
    };

    IncomingMessage {
        chat_id: message.chat.id.0,
        message_id: message.id.0,
        user_id,
        username,
        display_name,
        from_bot,
        text: message.text().map(str::to_string),
        caption: message.caption().map(str::to_string),
        media: media_of(message),
        media_group_id: message.media_group_id().map(|id| id.to_string()),
        reply_to: None,
        edited,
    }
}

/// The downloadable attachment of a message. Photos use the largest size.
fn media_of(message: &Message) -> Option<MediaRef> {
    let media = |kind, file_id: String| Some(MediaRef { kind, file_id });

    if let Some(sizes) = message.photo() {
        let largest = sizes
            .iter()
            .max_by_key(|size| u64::from(size.width) * u64::from(size.height))?;
        return media(MediaKind::Photo, largest.file.id.to_string());
    }
    if let Some(video) = message.video() {
        return media(MediaKind::Video, video.file.id.to_string());
    }
    if let Some(note) = message.video_note() {
        return media(MediaKind::VideoNote, note.file.id.to_string());
    }
    if let Some(audio) = message.audio() {
        return media(MediaKind::Audio, audio.file.id.to_string());
    }
    if let Some(voice) = message.voice() {
        return media(MediaKind::Voice, voice.file.id.to_string());
    }
    if let Some(document) = message.document() {
        return media(MediaKind::Document, document.file.id.to_string());
    }
    None
}

fn convert_inline_query(query: &InlineQuery) -> InlineRequest {
    InlineRequest {
        id: query.id.to_string(),
        user_id: query.from.id.0,
        username: query.from.username.clone(),
        query: query.query.clone(),
    }
}
