//! Test doubles: a recording chat platform, a scripted generative client and
//! an in-memory interaction recorder.

use crate::config::Config;
use crate::error::{GeminiError, MessagingError, Result};
use crate::llm::types::{
    GenerateRequest, GenerateResponse, GeneratedVideo, StreamEvent, UploadedFile, VideoRequest,
};
use crate::llm::{EventStream, GenerativeClient};
use crate::messaging::{ChatPlatform, InboundStream, InlineArticle};
use crate::store::{InteractionRecord, Recorder};
use crate::{ChatId, MessageId, OutboundMedia};

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

/// Config with test credentials and `alice` allowed.
pub fn config() -> Config {
    let mut config = Config::from_toml(indoc::indoc! {r#"
        telegram_bot_token = "123456:test-bot-token"
        google_ai_api_key = "test-gemini-key"
        allowed_telegram_users = ["@alice"]
    "#})
    .expect("test config parses");
    // Pin credentials even when the environment overrides them.
    config.telegram_bot_token = "123456:test-bot-token".into();
    config.google_ai_api_key = "test-gemini-key".into();
    config
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    records: Mutex<Vec<InteractionRecord>>,
}

impl MemoryRecorder {
    pub fn records(&self) -> Vec<InteractionRecord> {
        self.records.lock().clone()
    }
}

impl Recorder for MemoryRecorder {
    fn record(&self, record: InteractionRecord) {
        self.records.lock().push(record);
    }
}

/// One outbound platform call, as recorded by `MockPlatform`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Send {
        chat_id: ChatId,
        text: String,
        reply_to: Option<MessageId>,
    },
    Edit {
        chat_id: ChatId,
        message_id: MessageId,
        text: String,
    },
    Media {
        chat_id: ChatId,
        kind: &'static str,
        caption: Option<String>,
        size: usize,
        reply_to: Option<MessageId>,
    },
    Reaction {
        chat_id: ChatId,
        message_id: MessageId,
        emoji: String,
    },
    Typing {
        chat_id: ChatId,
    },
    InlineAnswer {
        query_id: String,
        results: Vec<InlineArticle>,
    },
}

/// Records every outbound call; downloads are served from an in-memory map.
#[derive(Debug)]
pub struct MockPlatform {
    calls: Mutex<Vec<Call>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    next_message_id: AtomicI32,
    pub fail_sends: AtomicBool,
    pub fail_edits: AtomicBool,
    pub fail_media: AtomicBool,
    pub fail_reactions: AtomicBool,
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            files: Mutex::new(HashMap::new()),
            next_message_id: AtomicI32::new(100),
            fail_sends: AtomicBool::new(false),
            fail_edits: AtomicBool::new(false),
            fail_media: AtomicBool::new(false),
            fail_reactions: AtomicBool::new(false),
        }
    }
}

impl MockPlatform {
    pub fn add_file(&self, file_id: &str, data: Vec<u8>) {
        self.files.lock().insert(file_id.to_string(), data);
    }

    /// Every recorded call, typing indicators included.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Recorded calls without typing indicators.
    pub fn actions(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| !matches!(call, Call::Typing { .. }))
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }

    fn next_id(&self) -> MessageId {
        self.next_message_id.fetch_add(1, Ordering::SeqCst)
    }
}

impl ChatPlatform for MockPlatform {
    fn name(&self) -> &str {
        "mock"
    }

    async fn start(&self) -> Result<InboundStream> {
        Ok(Box::pin(futures::stream::empty()))
    }

    async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId> {
        self.record(Call::Send {
            chat_id,
            text: text.to_string(),
            reply_to,
        });
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(MessagingError::rejected("send message", "Bad Request").into());
        }
        Ok(self.next_id())
    }

    async fn edit_message(&self, chat_id: ChatId, message_id: MessageId, text: &str) -> Result<()> {
        self.record(Call::Edit {
            chat_id,
            message_id,
            text: text.to_string(),
        });
        if self.fail_edits.load(Ordering::SeqCst) {
            return Err(MessagingError::rejected("edit message", "Bad Request").into());
        }
        Ok(())
    }

    async fn send_media(
        &self,
        chat_id: ChatId,
        media: OutboundMedia,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId> {
        let caption = match &media {
            OutboundMedia::Document { caption, .. } => caption.clone(),
            _ => None,
        };
        self.record(Call::Media {
            chat_id,
            kind: media.kind(),
            caption,
            size: media.len(),
            reply_to,
        });
        if self.fail_media.load(Ordering::SeqCst) {
            return Err(MessagingError::rejected("send media", "Request Entity Too Large").into());
        }
        Ok(self.next_id())
    }

    async fn set_reaction(&self, chat_id: ChatId, message_id: MessageId, emoji: &str) -> Result<()> {
        self.record(Call::Reaction {
            chat_id,
            message_id,
            emoji: emoji.to_string(),
        });
        if self.fail_reactions.load(Ordering::SeqCst) {
            return Err(MessagingError::rejected("set reaction", "REACTION_INVALID").into());
        }
        Ok(())
    }

    async fn send_typing(&self, chat_id: ChatId) -> Result<()> {
        self.record(Call::Typing { chat_id });
        Ok(())
    }

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>> {
        self.files.lock().get(file_id).cloned().ok_or_else(|| {
            MessagingError::Download {
                file_id: file_id.to_string(),
                description: "file not found".into(),
            }
            .into()
        })
    }

    async fn answer_inline_query(&self, query_id: &str, results: Vec<InlineArticle>) -> Result<()> {
        self.record(Call::InlineAnswer {
            query_id: query_id.to_string(),
            results,
        });
        Ok(())
    }
}

/// A scripted stream item.
#[derive(Debug, Clone)]
pub enum Scripted {
    Event(StreamEvent),
    Error(String),
}

/// Generative client that replays scripted responses and records requests.
#[derive(Debug, Default)]
pub struct ScriptedClient {
    stream: Mutex<Vec<Scripted>>,
    stall_after_stream: AtomicBool,
    fail_call: Mutex<Option<String>>,
    once: Mutex<Option<GenerateResponse>>,
    videos: Mutex<Vec<GeneratedVideo>>,
    uploads: Mutex<Vec<String>>,
    failing_uploads: Mutex<HashSet<String>>,
    stalling_uploads: Mutex<HashSet<String>>,
    requests: Mutex<Vec<(String, serde_json::Value)>>,
    video_requests: Mutex<Vec<(Option<String>, bool)>>,
}

impl ScriptedClient {
    pub fn with_stream(events: Vec<Scripted>) -> Self {
        let client = Self::default();
        *client.stream.lock() = events;
        client
    }

    pub fn with_text_deltas(deltas: &[&str]) -> Self {
        Self::with_stream(
            deltas
                .iter()
                .map(|delta| Scripted::Event(StreamEvent::text(*delta)))
                .collect(),
        )
    }

    pub fn with_response(response: GenerateResponse) -> Self {
        let client = Self::default();
        *client.once.lock() = Some(response);
        client
    }

    pub fn with_videos(videos: Vec<GeneratedVideo>) -> Self {
        let client = Self::default();
        *client.videos.lock() = videos;
        client
    }

    /// Every generation call fails with this message.
    pub fn failing(message: &str) -> Self {
        let client = Self::default();
        *client.fail_call.lock() = Some(message.to_string());
        client
    }

    /// Keep the stream open forever once scripted events run out.
    pub fn stall_after_stream(&self) {
        self.stall_after_stream.store(true, Ordering::SeqCst);
    }

    pub fn fail_uploads_named(&self, name: &str) {
        self.failing_uploads.lock().insert(name.to_string());
    }

    /// Uploads with this display name never finish.
    pub fn stall_uploads_named(&self, name: &str) {
        self.stalling_uploads.lock().insert(name.to_string());
    }

    pub fn uploads(&self) -> Vec<String> {
        self.uploads.lock().clone()
    }

    /// `(model, request body)` for every generate call.
    pub fn requests(&self) -> Vec<(String, serde_json::Value)> {
        self.requests.lock().clone()
    }

    /// `(prompt, has first frame)` for every video call.
    pub fn video_requests(&self) -> Vec<(Option<String>, bool)> {
        self.video_requests.lock().clone()
    }

    fn record_request(&self, model: &str, request: &GenerateRequest) {
        let body = serde_json::to_value(request).unwrap_or_default();
        self.requests.lock().push((model.to_string(), body));
    }

    fn scripted_failure(&self) -> Option<crate::Error> {
        self.fail_call.lock().clone().map(|message| {
            GeminiError::Api {
                status: 400,
                message,
            }
            .into()
        })
    }
}

impl GenerativeClient for ScriptedClient {
    async fn generate_once(&self, model: &str, request: &GenerateRequest) -> Result<GenerateResponse> {
        self.record_request(model, request);
        if let Some(error) = self.scripted_failure() {
            return Err(error);
        }
        Ok(self.once.lock().clone().unwrap_or_default())
    }

    async fn generate_streamed(&self, model: &str, request: &GenerateRequest) -> Result<EventStream> {
        self.record_request(model, request);
        if let Some(error) = self.scripted_failure() {
            return Err(error);
        }

        let items: Vec<Result<StreamEvent>> = self
            .stream
            .lock()
            .clone()
            .into_iter()
            .map(|item| match item {
                Scripted::Event(event) => Ok(event),
                Scripted::Error(message) => Err(GeminiError::Malformed(message).into()),
            })
            .collect();
        let stream = futures::stream::iter(items);

        if self.stall_after_stream.load(Ordering::SeqCst) {
            use futures::StreamExt as _;
            Ok(Box::pin(stream.chain(futures::stream::pending())))
        } else {
            Ok(Box::pin(stream))
        }
    }

    async fn upload_file_and_wait(
        &self,
        display_name: &str,
        _data: Vec<u8>,
        mime_type: &str,
    ) -> Result<UploadedFile> {
        let stalls = self.stalling_uploads.lock().contains(display_name);
        if stalls {
            futures::future::pending::<()>().await;
        }
        if self.failing_uploads.lock().contains(display_name) {
            return Err(GeminiError::FileFailed {
                name: display_name.to_string(),
            }
            .into());
        }
        let mut uploads = self.uploads.lock();
        uploads.push(display_name.to_string());
        Ok(UploadedFile {
            name: format!("files/{}", uploads.len()),
            uri: format!("https://files.test/{}", uploads.len()),
            mime_type: mime_type.to_string(),
            state: Some("ACTIVE".into()),
        })
    }

    async fn generate_video(&self, _model: &str, request: &VideoRequest) -> Result<Vec<GeneratedVideo>> {
        self.video_requests
            .lock()
            .push((request.prompt.clone(), request.first_frame.is_some()));
        if let Some(error) = self.scripted_failure() {
            return Err(error);
        }
        Ok(self.videos.lock().clone())
    }
}
