//! Relay Sink: generation output to outbound chat actions.

use crate::config::Redactor;
use crate::error::{AudioError, Error, ErrorList, Result};
use crate::messaging::ChatPlatform;
use crate::prompt::sniff;
use crate::relay::audio::{self, AudioFormat};
use crate::{ChatId, MessageId, OutboundMedia};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Telegram's single-message character limit.
pub const MESSAGE_LIMIT: usize = 4096;

/// Characters of an oversized answer shown as the document caption.
pub const CAPTION_PREVIEW_CHARS: usize = 128;

/// Reaction for "received" and "done".
pub const REACTION_EMOJI: &str = "👌";

/// Something to deliver to a chat.
#[derive(Debug, Clone)]
pub enum RelayContent {
    Text(String),
    Binary { mime_type: String, data: Vec<u8> },
}

/// Maps generation output onto platform calls for one chat platform.
pub struct RelaySink<P> {
    platform: Arc<P>,
    request_timeout: Duration,
    ignorable_timeout: Duration,
    redactor: Redactor,
}

impl<P> Clone for RelaySink<P> {
    fn clone(&self) -> Self {
        Self {
            platform: self.platform.clone(),
            request_timeout: self.request_timeout,
            ignorable_timeout: self.ignorable_timeout,
            redactor: self.redactor.clone(),
        }
    }
}

impl<P: ChatPlatform> RelaySink<P> {
    pub fn new(
        platform: Arc<P>,
        request_timeout: Duration,
        ignorable_timeout: Duration,
        redactor: Redactor,
    ) -> Self {
        Self {
            platform,
            request_timeout,
            ignorable_timeout,
            redactor,
        }
    }

    pub fn platform(&self) -> &Arc<P> {
        &self.platform
    }

    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }

    /// Deliver one piece of content. Returns the id of the message sent.
    pub async fn relay(
        &self,
        chat_id: ChatId,
        reply_to: Option<MessageId>,
        content: RelayContent,
    ) -> Result<MessageId> {
        match content {
            RelayContent::Text(text) => self.send_text(chat_id, reply_to, &text).await,
            RelayContent::Binary { mime_type, data } => {
                self.send_binary(chat_id, reply_to, &mime_type, data).await
            }
        }
    }

    /// Replace the text of an earlier message.
    pub async fn relay_edit(&self, chat_id: ChatId, message_id: MessageId, text: &str) -> Result<()> {
        self.typing(chat_id).await;
        tracing::debug!(chat_id, message_id, chars = text.chars().count(), "editing message");

        self.bounded(
            "edit message",
            self.platform.edit_message(chat_id, message_id, text),
        )
        .await
    }

    /// Text goes out as a message, or as a document when it is too long.
    pub async fn send_text(
        &self,
        chat_id: ChatId,
        reply_to: Option<MessageId>,
        text: &str,
    ) -> Result<MessageId> {
        if exceeds_limit(text) {
            return self.send_as_document(chat_id, reply_to, text).await;
        }

        self.typing(chat_id).await;
        tracing::debug!(
            chat_id,
            message = %crate::logging::log_preview(text, 200),
            "sending message"
        );
        self.bounded(
            "send message",
            self.platform.send_message(chat_id, text, reply_to),
        )
        .await
    }

    /// Send a user-facing notice (error or status), with credentials redacted.
    pub async fn notify(
        &self,
        chat_id: ChatId,
        reply_to: Option<MessageId>,
        text: &str,
    ) -> Result<MessageId> {
        let text = self.redactor.redact(text);
        self.send_text(chat_id, reply_to, &text).await
    }

    pub async fn send_as_document(
        &self,
        chat_id: ChatId,
        reply_to: Option<MessageId>,
        text: &str,
    ) -> Result<MessageId> {
        let media = OutboundMedia::Document {
            data: text.as_bytes().to_vec(),
            file_name: "answer.txt".into(),
            caption: Some(caption_preview(text)),
        };
        self.send_media(chat_id, reply_to, media).await
    }

    /// Classify bytes by sniffing and send them as the matching media type.
    /// Raw PCM is wrapped into WAV and encoded to Ogg/Opus first; if either
    /// step fails nothing is sent.
    pub async fn send_binary(
        &self,
        chat_id: ChatId,
        reply_to: Option<MessageId>,
        declared_mime: &str,
        data: Vec<u8>,
    ) -> Result<MessageId> {
        let format = AudioFormat::parse(declared_mime);
        if format.is_pcm() {
            let ogg = self.encode_pcm(&data, format.rate).await?;
            return self
                .send_media(chat_id, reply_to, OutboundMedia::Voice(ogg))
                .await;
        }

        let sniffed = sniff::detect(&data);
        let media = match sniffed {
            mime if sniff::is_image(mime) => OutboundMedia::Photo(data),
            "audio/ogg" | "audio/mpeg" => OutboundMedia::Voice(data),
            "audio/wav" => OutboundMedia::Voice(audio::wav_to_ogg(data).await?),
            mime if mime.starts_with("video/") => OutboundMedia::Video(data),
            mime if declared_mime.starts_with("audio/") => {
                return Err(AudioError::Unsupported {
                    codec: format!("{declared_mime} (sniffed {mime})"),
                    rate: format.rate,
                }
                .into());
            }
            mime => OutboundMedia::Document {
                file_name: format!("generated.{}", sniff::extension(mime)),
                data,
                caption: None,
            },
        };
        self.send_media(chat_id, reply_to, media).await
    }

    pub async fn send_media(
        &self,
        chat_id: ChatId,
        reply_to: Option<MessageId>,
        media: OutboundMedia,
    ) -> Result<MessageId> {
        self.typing(chat_id).await;
        tracing::debug!(chat_id, kind = media.kind(), size = media.len(), "sending media");

        self.bounded(
            "send media",
            self.platform.send_media(chat_id, media, reply_to),
        )
        .await
    }

    /// Put the confirmation reaction on a message.
    pub async fn react(&self, chat_id: ChatId, message_id: MessageId) -> Result<()> {
        self.bounded(
            "set reaction",
            self.platform.set_reaction(chat_id, message_id, REACTION_EMOJI),
        )
        .await
    }

    /// "Received" marker: short deadline, failures only logged.
    pub async fn acknowledge(&self, chat_id: ChatId, message_id: MessageId) {
        let reaction = self.platform.set_reaction(chat_id, message_id, REACTION_EMOJI);
        match tokio::time::timeout(self.ignorable_timeout, reaction).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => tracing::debug!(chat_id, message_id, %error, "failed to acknowledge"),
            Err(_) => tracing::debug!(chat_id, message_id, "acknowledge timed out"),
        }
    }

    /// Start relaying a streamed answer.
    pub fn stream(&self, chat_id: ChatId, reply_to: Option<MessageId>) -> StreamRelay<'_, P> {
        StreamRelay {
            sink: self,
            chat_id,
            reply_to,
            buffer: String::new(),
            message_id: None,
            oversized: false,
            errors: ErrorList::new(),
        }
    }

    async fn encode_pcm(&self, pcm: &[u8], rate: u32) -> Result<Vec<u8>> {
        let wav = audio::pcm_to_wav(
            pcm,
            rate,
            audio::SPEECH_BITS_PER_SAMPLE,
            audio::SPEECH_CHANNELS,
        )?;
        Ok(audio::wav_to_ogg(wav).await?)
    }

    async fn typing(&self, chat_id: ChatId) {
        if let Ok(Err(error)) =
            tokio::time::timeout(self.ignorable_timeout, self.platform.send_typing(chat_id)).await
        {
            tracing::debug!(chat_id, %error, "failed to send typing action");
        }
    }

    async fn bounded<T>(
        &self,
        stage: &'static str,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::time::timeout(self.request_timeout, call)
            .await
            .map_err(|_| Error::timeout(stage, self.request_timeout))?
    }
}

/// Create-once-then-edit relay of one streamed answer.
///
/// The first non-empty buffer creates a message; every later change edits it
/// with the whole buffer. Once the buffer outgrows one message, edits stop and
/// the full text is sent as a document when the stream finishes.
pub struct StreamRelay<'a, P> {
    sink: &'a RelaySink<P>,
    chat_id: ChatId,
    reply_to: Option<MessageId>,
    buffer: String,
    message_id: Option<MessageId>,
    oversized: bool,
    errors: ErrorList,
}

/// What a finished stream relay left behind.
#[derive(Debug)]
pub struct StreamOutcome {
    pub text: String,
    /// Last message that carries the answer, if any was sent.
    pub message_id: Option<MessageId>,
    pub errors: ErrorList,
}

impl<P: ChatPlatform> StreamRelay<'_, P> {
    /// Append to the buffer and mirror it to the chat.
    pub async fn push(&mut self, delta: &str) {
        if delta.is_empty() {
            return;
        }
        self.buffer.push_str(delta);
        if self.buffer.trim().is_empty() || self.oversized {
            return;
        }
        if exceeds_limit(&self.buffer) {
            tracing::debug!(chat_id = self.chat_id, "answer outgrew one message, switching to document");
            self.oversized = true;
            return;
        }

        match self.message_id {
            None => match self
                .sink
                .send_text(self.chat_id, self.reply_to, &self.buffer)
                .await
            {
                Ok(message_id) => self.message_id = Some(message_id),
                Err(error) => self.errors.push(error),
            },
            Some(message_id) => {
                if let Err(error) = self
                    .sink
                    .relay_edit(self.chat_id, message_id, &self.buffer)
                    .await
                {
                    self.errors.push(error);
                }
            }
        }
    }

    pub fn text(&self) -> &str {
        &self.buffer
    }

    pub fn has_sent(&self) -> bool {
        self.message_id.is_some()
    }

    pub async fn finish(mut self) -> StreamOutcome {
        if self.oversized {
            match self
                .sink
                .send_as_document(self.chat_id, self.reply_to, &self.buffer)
                .await
            {
                Ok(message_id) => self.message_id = Some(message_id),
                Err(error) => self.errors.push(error),
            }
        }

        StreamOutcome {
            text: self.buffer,
            message_id: self.message_id,
            errors: self.errors,
        }
    }
}

fn exceeds_limit(text: &str) -> bool {
    text.chars().count() > MESSAGE_LIMIT
}

/// First 128 characters plus an ellipsis.
pub fn caption_preview(text: &str) -> String {
    let preview: String = text.chars().take(CAPTION_PREVIEW_CHARS).collect();
    format!("{preview}...")
}
