//! Routes inbound events to commands, album buffering and the answer pipeline.

pub mod album;
pub mod commands;

pub use album::AlbumBuffer;
pub use commands::Command;

use crate::config::Config;
use crate::llm::GenerativeClient;
use crate::messaging::{ChatPlatform, InboundStream};
use crate::pipeline::{AnswerKind, AnswerRequest, Pipeline};
use crate::store::{InteractionStore, stats_message};
use crate::{InboundEvent, IncomingMessage};

use futures::StreamExt as _;
use std::sync::Arc;

/// Consumes the adapter's event stream; one task per event.
pub struct Dispatcher<P, C> {
    config: Arc<Config>,
    pipeline: Arc<Pipeline<P, C>>,
    store: Option<InteractionStore>,
    albums: AlbumBuffer,
}

impl<P: ChatPlatform, C: GenerativeClient> Dispatcher<P, C> {
    pub fn new(
        config: Arc<Config>,
        pipeline: Arc<Pipeline<P, C>>,
        store: Option<InteractionStore>,
    ) -> Self {
        Self {
            albums: AlbumBuffer::new(config.media_group_window),
            config,
            pipeline,
            store,
        }
    }

    /// Run until the inbound stream ends.
    pub async fn run(self: Arc<Self>, mut inbound: InboundStream) {
        while let Some(event) = inbound.next().await {
            let dispatcher = self.clone();
            tokio::spawn(async move {
                dispatcher.handle(event).await;
            });
        }
        tracing::info!("inbound stream closed");
    }

    pub async fn handle(self: &Arc<Self>, event: InboundEvent) {
        if !self.config.is_allowed(event.username()) {
            tracing::info!(username = ?event.username(), "ignoring update from user not on the allow-list");
            return;
        }

        match event {
            InboundEvent::Inline(request) => {
                if let Err(error) = self.pipeline.answer_inline(&request).await {
                    tracing::warn!(%error, query_id = %request.id, "failed to answer inline query");
                }
            }
            InboundEvent::Message(message) => self.handle_message(message).await,
        }
    }

    async fn handle_message(self: &Arc<Self>, message: IncomingMessage) {
        if !message.is_usable() {
            self.reply(&message, commands::MSG_TYPE_NOT_SUPPORTED).await;
            return;
        }

        if let Some(command) = message.text.as_deref().and_then(commands::parse) {
            self.handle_command(message, command).await;
            return;
        }

        if let Some(group_id) = message.media_group_id.clone() {
            if self.albums.push(&group_id, message).await {
                self.schedule_album(group_id);
            }
            return;
        }

        self.answer(AnswerRequest {
            message,
            siblings: Vec::new(),
            kind: AnswerKind::Text {
                google_search: false,
            },
        })
        .await;
    }

    async fn handle_command(&self, message: IncomingMessage, command: Command) {
        tracing::debug!(chat_id = message.chat_id, ?command, "bot command");

        match command {
            Command::Start => self.reply(&message, commands::MSG_START).await,
            Command::Help => {
                let help = commands::help_message(&self.config);
                self.reply(&message, &help).await;
            }
            Command::Stats => {
                let stats = stats_message(self.store.as_ref()).await;
                self.reply(&message, &stats).await;
            }
            Command::Privacy => self.reply(&message, commands::MSG_PRIVACY).await,
            Command::Generate { prompt, .. } if prompt.is_empty() => {
                self.reply(&message, commands::MSG_PROMPT_NOT_GIVEN).await;
            }
            Command::Generate { kind, prompt } => {
                let message = IncomingMessage {
                    text: Some(prompt),
                    ..message
                };
                self.answer(AnswerRequest {
                    message,
                    siblings: Vec::new(),
                    kind,
                })
                .await;
            }
            Command::Unknown(name) => {
                self.reply(&message, &commands::unsupported_command(&name))
                    .await;
            }
        }
    }

    fn schedule_album(self: &Arc<Self>, group_id: String) {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(dispatcher.albums.window()).await;

            let mut group = dispatcher.albums.take(&group_id).await.into_iter();
            let Some(message) = group.next() else {
                return;
            };
            tracing::debug!(
                chat_id = message.chat_id,
                group_id = %group_id,
                siblings = group.len(),
                "answering album"
            );
            dispatcher
                .answer(AnswerRequest {
                    message,
                    siblings: group.collect(),
                    kind: AnswerKind::Text {
                        google_search: false,
                    },
                })
                .await;
        });
    }

    async fn answer(&self, request: AnswerRequest) {
        let chat_id = request.message.chat_id;
        let kind = request.kind.as_str();
        if let Err(errors) = self.pipeline.answer(request).await {
            tracing::warn!(chat_id, kind, errors = %errors, "answer finished with errors");
        }
    }

    async fn reply(&self, message: &IncomingMessage, text: &str) {
        if let Err(error) = self
            .pipeline
            .sink()
            .send_text(message.chat_id, Some(message.message_id), text)
            .await
        {
            tracing::warn!(%error, chat_id = message.chat_id, "failed to send reply");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, MemoryRecorder, MockPlatform, ScriptedClient};
    use crate::{InlineRequest, MediaKind, MediaRef};

    use std::time::Duration;

    struct Harness {
        platform: Arc<MockPlatform>,
        client: Arc<ScriptedClient>,
        recorder: Arc<MemoryRecorder>,
        dispatcher: Arc<Dispatcher<MockPlatform, ScriptedClient>>,
    }

    fn harness(client: ScriptedClient) -> Harness {
        let mut config = crate::testing::config();
        config.media_group_window = Duration::from_millis(50);
        let config = Arc::new(config);
        let platform = Arc::new(MockPlatform::default());
        let client = Arc::new(client);
        let recorder = Arc::new(MemoryRecorder::default());
        let pipeline = Pipeline::new(
            config.clone(),
            platform.clone(),
            client.clone(),
            Some(recorder.clone()),
        )
        .expect("pipeline builds");

        Harness {
            platform,
            client,
            recorder,
            dispatcher: Arc::new(Dispatcher::new(config, Arc::new(pipeline), None)),
        }
    }

    fn from_alice(text: Option<&str>) -> IncomingMessage {
        IncomingMessage {
            chat_id: 7,
            message_id: 3,
            user_id: 42,
            username: Some("alice".into()),
            text: text.map(str::to_string),
            ..Default::default()
        }
    }

    fn reply(text: &str) -> Call {
        Call::Send {
            chat_id: 7,
            text: text.into(),
            reply_to: Some(3),
        }
    }

    #[tokio::test]
    async fn disallowed_users_get_no_reaction_at_all() {
        let h = harness(ScriptedClient::with_text_deltas(&["hi"]));
        let stranger = IncomingMessage {
            username: Some("mallory".into()),
            ..from_alice(Some("hello"))
        };
        let anonymous = IncomingMessage {
            username: None,
            ..from_alice(Some("/help"))
        };

        h.dispatcher.handle(InboundEvent::Message(stranger)).await;
        h.dispatcher.handle(InboundEvent::Message(anonymous)).await;
        h.dispatcher
            .handle(InboundEvent::Inline(InlineRequest {
                id: "q1".into(),
                user_id: 9,
                username: Some("mallory".into()),
                query: "hello".into(),
            }))
            .await;

        assert!(h.platform.calls().is_empty());
        assert!(h.client.requests().is_empty());
        assert!(h.recorder.records().is_empty());
    }

    #[tokio::test]
    async fn unusable_message_is_rejected() {
        let h = harness(ScriptedClient::default());

        h.dispatcher
            .handle(InboundEvent::Message(from_alice(None)))
            .await;

        assert_eq!(
            h.platform.actions(),
            vec![reply(commands::MSG_TYPE_NOT_SUPPORTED)]
        );
        assert!(h.client.requests().is_empty());
    }

    #[tokio::test]
    async fn fixed_commands_reply_without_generating() {
        let h = harness(ScriptedClient::default());

        for text in ["/start", "/stats", "/image", "/video   ", "/nope arg"] {
            h.dispatcher
                .handle(InboundEvent::Message(from_alice(Some(text))))
                .await;
        }

        assert_eq!(
            h.platform.actions(),
            vec![
                reply(commands::MSG_START),
                reply(crate::store::MSG_DATABASE_NOT_CONFIGURED),
                reply(commands::MSG_PROMPT_NOT_GIVEN),
                reply(commands::MSG_PROMPT_NOT_GIVEN),
                reply("Not a supported bot command: /nope"),
            ]
        );
        assert!(h.client.requests().is_empty());
    }

    #[tokio::test]
    async fn google_command_answers_its_argument_with_search() {
        let h = harness(ScriptedClient::with_text_deltas(&["found it"]));

        h.dispatcher
            .handle(InboundEvent::Message(from_alice(Some(
                "/google@gembot_bot latest rust release",
            ))))
            .await;

        let requests = h.client.requests();
        assert_eq!(requests.len(), 1);
        let body = requests[0].1.to_string();
        assert!(body.contains("latest rust release"));
        assert!(!body.contains("/google"));
        assert!(body.contains("googleSearch"));

        let records = h.recorder.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].result, "found it");
    }

    #[tokio::test]
    async fn album_is_answered_once_with_every_photo() {
        let h = harness(ScriptedClient::with_text_deltas(&["two cats"]));
        let png = b"\x89PNG\r\n\x1a\n0000".to_vec();
        h.platform.add_file("p1", png.clone());
        h.platform.add_file("p2", png);

        let photo = |message_id, file_id: &str, caption: Option<&str>| IncomingMessage {
            message_id,
            caption: caption.map(str::to_string),
            media: Some(MediaRef {
                kind: MediaKind::Photo,
                file_id: file_id.into(),
            }),
            media_group_id: Some("album-1".into()),
            ..from_alice(None)
        };

        h.dispatcher
            .handle(InboundEvent::Message(photo(10, "p1", Some("compare these"))))
            .await;
        h.dispatcher
            .handle(InboundEvent::Message(photo(11, "p2", None)))
            .await;
        assert!(h.client.requests().is_empty());

        for _ in 0..50 {
            if !h.recorder.records().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert_eq!(h.client.requests().len(), 1);
        assert_eq!(h.client.uploads().len(), 2);
        let records = h.recorder.records();
        assert_eq!(records.len(), 1);
        assert!(records[0].prompt.contains("compare these (2 file(s))"));
        assert!(h.platform.actions().contains(&Call::Reaction {
            chat_id: 7,
            message_id: 10,
            emoji: crate::relay::REACTION_EMOJI.into(),
        }));
    }
}
