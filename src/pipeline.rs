//! Generation Orchestrator: one answer per inbound update, end to end.
//!
//! Every answer runs under a concurrency permit, acknowledges the inbound
//! message, builds the prompt material, generates, relays, and records the
//! outcome exactly once. Nothing escapes this boundary except an `ErrorList`
//! for logging.

mod media;
mod text;

use crate::config::{Config, Redactor};
use crate::error::{Error, ErrorList, GeminiError, Result};
use crate::llm::{
    Content, GenerateRequest, GenerationOptions, GenerativeClient, Prompt, TokenCounts,
    prompts_to_contents,
};
use crate::messaging::{ChatPlatform, InlineArticle};
use crate::prompt::{PromptBuilder, UrlFetcher, build_history};
use crate::relay::RelaySink;
use crate::store::{InteractionRecord, Recorder};
use crate::{
    ChatId, ChatMessage, ChatRole, IncomingMessage, InlineRequest, MessageId, messages_to_prompt,
};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;

/// Characters of an inline query shown as the result title.
const INLINE_TITLE_CHARS: usize = 64;

/// What kind of answer an update asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerKind {
    /// Text answer; `google_search` adds the web-search tool.
    Text { google_search: bool },
    Image,
    Speech,
    Video,
}

impl AnswerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AnswerKind::Text {
                google_search: false,
            } => "text",
            AnswerKind::Text {
                google_search: true,
            } => "google",
            AnswerKind::Image => "image",
            AnswerKind::Speech => "speech",
            AnswerKind::Video => "video",
        }
    }
}

/// One answer to produce: the message (album siblings included) and its kind.
#[derive(Debug, Clone)]
pub struct AnswerRequest {
    pub message: IncomingMessage,
    pub siblings: Vec<IncomingMessage>,
    pub kind: AnswerKind,
}

/// Prompt material and addressing for one answer.
#[derive(Debug)]
pub(crate) struct Turn {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub user_id: u64,
    pub username: String,
    pub parent: Option<ChatMessage>,
    pub original: ChatMessage,
}

impl Turn {
    fn prompt_text(&self) -> String {
        messages_to_prompt(self.parent.as_ref(), Some(&self.original))
    }
}

/// Runs answers against one chat platform and one generative client.
pub struct Pipeline<P, C> {
    config: Arc<Config>,
    client: Arc<C>,
    sink: RelaySink<P>,
    builder: PromptBuilder<P>,
    recorder: Option<Arc<dyn Recorder>>,
    permits: Arc<Semaphore>,
}

impl<P: ChatPlatform, C: GenerativeClient> Pipeline<P, C> {
    pub fn new(
        config: Arc<Config>,
        platform: Arc<P>,
        client: Arc<C>,
        recorder: Option<Arc<dyn Recorder>>,
    ) -> Result<Self> {
        let timeouts = config.timeouts;
        let sink = RelaySink::new(
            platform.clone(),
            timeouts.request,
            timeouts.ignorable,
            config.redactor(),
        );
        let fetcher = UrlFetcher::new(timeouts.fetch)?;
        let builder = PromptBuilder::new(platform, fetcher, timeouts.request);

        Ok(Self {
            permits: Arc::new(Semaphore::new(config.max_concurrent_answers)),
            config,
            client,
            sink,
            builder,
            recorder,
        })
    }

    pub fn sink(&self) -> &RelaySink<P> {
        &self.sink
    }

    pub fn redactor(&self) -> &Redactor {
        self.sink.redactor()
    }

    /// Produce one answer. User-visible failures are reported in the chat;
    /// the returned list is for logging only.
    pub async fn answer(&self, request: AnswerRequest) -> std::result::Result<(), ErrorList> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|error| Error::Other(anyhow::anyhow!("answer permits closed: {error}")))?;

        let message = &request.message;
        tracing::info!(
            chat_id = message.chat_id,
            message_id = message.message_id,
            kind = request.kind.as_str(),
            siblings = request.siblings.len(),
            "answering message"
        );
        self.sink
            .acknowledge(message.chat_id, message.message_id)
            .await;

        let original = match self.builder.build(message, &request.siblings).await {
            Ok(original) => original,
            Err(error) => {
                let notice = format!(
                    "Failed to get chat messages from telegram message: {}",
                    self.redactor().redact_error(&error)
                );
                let mut errors = ErrorList::from(error);
                self.notify(message.chat_id, message.message_id, &notice, &mut errors)
                    .await;
                return Err(errors);
            }
        };

        let parent = match &message.reply_to {
            Some(parent) => match self.builder.build_parent(parent).await {
                Ok(parent) => Some(parent),
                Err(error) => {
                    tracing::warn!(
                        chat_id = message.chat_id,
                        %error,
                        "ignoring reply-parent that could not be converted"
                    );
                    None
                }
            },
            None => None,
        };

        let turn = Turn {
            chat_id: message.chat_id,
            message_id: message.message_id,
            user_id: message.user_id,
            username: message.author(),
            parent,
            original,
        };

        let errors = match request.kind {
            AnswerKind::Text { google_search } => {
                let answered = self.answer_text(&turn, google_search).await;
                let mut errors = answered.errors;
                if !answered.delivered {
                    let notice = format!(
                        "Failed to answer message: {}",
                        self.redactor().redact(&errors.join())
                    );
                    self.notify(turn.chat_id, turn.message_id, &notice, &mut errors)
                        .await;
                }
                errors
            }
            AnswerKind::Image => self.answer_with_image(&turn).await,
            AnswerKind::Speech => self.answer_with_speech(&turn).await,
            AnswerKind::Video => self.answer_with_video(&turn).await,
        };

        errors.into_result()
    }

    /// Answer an inline query with one non-streamed text article.
    pub async fn answer_inline(&self, request: &InlineRequest) -> Result<()> {
        let query = request.query.trim();
        if query.is_empty() {
            return Ok(());
        }

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|error| Error::Other(anyhow::anyhow!("answer permits closed: {error}")))?;

        let options = GenerationOptions::text(
            self.config.system_instruction.clone(),
            self.config.harm_block_threshold,
            false,
        );
        let generate = GenerateRequest::new(
            vec![Content::new(
                ChatRole::User,
                vec![crate::llm::Part::text(query)],
            )],
            &options,
        );

        let prompt = format!("[{}] {query}", ChatRole::User);
        let record = |tokens: TokenCounts, result: String, successful: bool| {
            self.record(InteractionRecord {
                chat_id: request.user_id as ChatId,
                user_id: request.user_id,
                username: request
                    .username
                    .as_ref()
                    .map(|username| format!("@{username}"))
                    .unwrap_or_default(),
                prompt: prompt.clone(),
                prompt_tokens: tokens.input,
                result,
                result_tokens: tokens.output,
                successful,
            })
        };

        let budget = self.config.timeouts.answer;
        let response = match tokio::time::timeout(
            budget,
            self.client.generate_once(&self.config.models.text, &generate),
        )
        .await
        .map_err(|_| Error::timeout("inline answer", budget))
        .and_then(|response| response)
        {
            Ok(response) => response,
            Err(error) => {
                record(TokenCounts::default(), self.redactor().redact_error(&error), false);
                return Err(error);
            }
        };

        let event = response.into_stream_event();
        let tokens = event.token_counts.unwrap_or_default();
        let mut answer = event.text_delta.unwrap_or_default();
        if let Some(reason) = event.finish_reason.as_ref().and_then(text::marker) {
            answer.push_str(&reason);
        }
        if answer.trim().is_empty() {
            let error: Error = GeminiError::Malformed("no text was returned from API".into()).into();
            record(tokens, error.to_string(), false);
            return Err(error);
        }

        let article = InlineArticle {
            id: uuid::Uuid::new_v4().to_string(),
            title: crate::logging::log_preview(query, INLINE_TITLE_CHARS).into_owned(),
            text: answer.chars().take(crate::relay::MESSAGE_LIMIT).collect(),
        };
        let answered = tokio::time::timeout(
            self.config.timeouts.request,
            self.sink
                .platform()
                .answer_inline_query(&request.id, vec![article]),
        )
        .await
        .map_err(|_| Error::timeout("answer inline query", self.config.timeouts.request))
        .and_then(|answered| answered);

        match answered {
            Ok(()) => {
                record(tokens, answer, true);
                Ok(())
            }
            Err(error) => {
                record(tokens, self.redactor().redact_error(&error), false);
                Err(error)
            }
        }
    }

    /// Upload the parent's files into a history turn, then convert the
    /// fragments. History upload failures only degrade the turn.
    ///
    /// History gets at most half of the time left before `deadline`, so the
    /// message itself can still be converted and answered.
    async fn contents(
        &self,
        turn: &Turn,
        prompts: Vec<Prompt>,
        deadline: Instant,
        budget: Duration,
        errors: &mut ErrorList,
    ) -> Result<Vec<Content>> {
        let mut history = Vec::new();
        if let Some(parent) = &turn.parent {
            let now = Instant::now();
            let history_deadline = now + deadline.saturating_duration_since(now) / 2;
            let (content, upload_errors) =
                build_history(self.client.as_ref(), parent, history_deadline).await;
            errors.extend(upload_errors);
            history.push(content);
        }

        tokio::time::timeout_at(
            deadline,
            prompts_to_contents(self.client.as_ref(), prompts, history),
        )
        .await
        .map_err(|_| Error::timeout("prompt conversion", budget))?
    }

    /// Send a notice, keeping a failed send in the list.
    async fn notify(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        notice: &str,
        errors: &mut ErrorList,
    ) {
        if let Err(error) = self.sink.notify(chat_id, Some(message_id), notice).await {
            tracing::warn!(chat_id, %error, "failed to send notice");
            errors.push(error);
        }
    }

    /// Put the "done" reaction on the final message. Failure is cosmetic.
    async fn mark_done(&self, chat_id: ChatId, message_id: MessageId, errors: &mut ErrorList) {
        if let Err(error) = self.sink.react(chat_id, message_id).await {
            tracing::debug!(chat_id, message_id, %error, "failed to set done reaction");
            errors.push(error);
        }
    }

    fn record_turn(&self, turn: &Turn, tokens: TokenCounts, result: String, successful: bool) {
        self.record(InteractionRecord {
            chat_id: turn.chat_id,
            user_id: turn.user_id,
            username: turn.username.clone(),
            prompt: turn.prompt_text(),
            prompt_tokens: tokens.input,
            result,
            result_tokens: tokens.output,
            successful,
        });
    }

    fn record(&self, record: InteractionRecord) {
        match &self.recorder {
            Some(recorder) => recorder.record(record),
            None => tracing::debug!(
                chat_id = record.chat_id,
                successful = record.successful,
                "no database configured, interaction not recorded"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::StreamEvent;
    use crate::testing::{Call, MemoryRecorder, MockPlatform, Scripted, ScriptedClient};

    pub(super) struct Harness {
        pub platform: Arc<MockPlatform>,
        pub client: Arc<ScriptedClient>,
        pub recorder: Arc<MemoryRecorder>,
        pub pipeline: Pipeline<MockPlatform, ScriptedClient>,
    }

    pub(super) fn harness_with(client: ScriptedClient, configure: impl FnOnce(&mut Config)) -> Harness {
        let mut config = crate::testing::config();
        configure(&mut config);
        let platform = Arc::new(MockPlatform::default());
        let client = Arc::new(client);
        let recorder = Arc::new(MemoryRecorder::default());
        let pipeline = Pipeline::new(
            Arc::new(config),
            platform.clone(),
            client.clone(),
            Some(recorder.clone()),
        )
        .expect("pipeline builds");
        Harness {
            platform,
            client,
            recorder,
            pipeline,
        }
    }

    pub(super) fn harness(client: ScriptedClient) -> Harness {
        harness_with(client, |_| {})
    }

    pub(super) fn text_request(text: &str, kind: AnswerKind) -> AnswerRequest {
        AnswerRequest {
            message: IncomingMessage {
                chat_id: 7,
                message_id: 3,
                user_id: 42,
                username: Some("alice".into()),
                text: Some(text.into()),
                ..Default::default()
            },
            siblings: Vec::new(),
            kind,
        }
    }

    const TEXT: AnswerKind = AnswerKind::Text {
        google_search: false,
    };

    #[tokio::test]
    async fn streamed_answer_is_relayed_marked_and_recorded() {
        let h = harness(ScriptedClient::with_stream(vec![
            Scripted::Event(StreamEvent::text("a")),
            Scripted::Event(StreamEvent::text("b")),
            Scripted::Event(StreamEvent {
                text_delta: Some("c".into()),
                token_counts: Some(TokenCounts {
                    input: 12,
                    output: 3,
                }),
                ..Default::default()
            }),
        ]));

        h.pipeline
            .answer(text_request("hello", TEXT))
            .await
            .expect("answer succeeds");

        assert_eq!(
            h.platform.actions(),
            vec![
                Call::Reaction {
                    chat_id: 7,
                    message_id: 3,
                    emoji: "👌".into(),
                },
                Call::Send {
                    chat_id: 7,
                    text: "a".into(),
                    reply_to: Some(3),
                },
                Call::Edit {
                    chat_id: 7,
                    message_id: 100,
                    text: "ab".into(),
                },
                Call::Edit {
                    chat_id: 7,
                    message_id: 100,
                    text: "abc".into(),
                },
                Call::Reaction {
                    chat_id: 7,
                    message_id: 100,
                    emoji: "👌".into(),
                },
            ]
        );

        let records = h.recorder.records();
        assert_eq!(records.len(), 1);
        assert!(records[0].successful);
        assert_eq!(records[0].result, "abc");
        assert_eq!(records[0].prompt, "[user] hello");
        assert_eq!(records[0].username, "@alice");
        assert_eq!((records[0].prompt_tokens, records[0].result_tokens), (12, 3));
    }

    #[tokio::test]
    async fn stalled_parent_upload_degrades_within_answer_deadline() {
        let client = ScriptedClient::with_text_deltas(&["ok"]);
        client.stall_uploads_named("file 1");
        let h = harness_with(client, |config| {
            config.timeouts.answer = Duration::from_millis(400);
        });
        h.platform
            .add_file("parent-photo", b"\x89PNG\r\n\x1a\n0000".to_vec());
        let mut request = text_request("and this one?", TEXT);
        request.message.reply_to = Some(Box::new(IncomingMessage {
            chat_id: 7,
            message_id: 2,
            from_bot: true,
            caption: Some("earlier answer".into()),
            media: Some(crate::MediaRef {
                kind: crate::MediaKind::Photo,
                file_id: "parent-photo".into(),
            }),
            ..Default::default()
        }));

        let started = Instant::now();
        let errors = h
            .pipeline
            .answer(request)
            .await
            .expect_err("the stalled upload is reported");

        assert!(started.elapsed() < Duration::from_millis(400));
        assert!(errors.join().contains("history file upload timed out"));
        let record = &h.recorder.records()[0];
        assert!(record.successful);
        assert_eq!(record.result, "ok");

        let (_, body) = &h.client.requests()[0];
        let history = &body["contents"][0];
        assert_eq!(history["role"], "model");
        assert_eq!(history["parts"].as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn generation_failure_notifies_and_records_once() {
        let h = harness(ScriptedClient::failing(
            "quota exceeded for key test-gemini-key",
        ));

        let errors = h
            .pipeline
            .answer(text_request("hello", TEXT))
            .await
            .expect_err("generation fails");
        assert!(!errors.is_empty());

        let records = h.recorder.records();
        assert_eq!(records.len(), 1);
        assert!(!records[0].successful);
        assert_eq!(
            records[0].result,
            "Gemini API error (400): quota exceeded for key <REDACTED>"
        );
        assert_eq!((records[0].prompt_tokens, records[0].result_tokens), (0, 0));

        let notices: Vec<_> = h
            .platform
            .actions()
            .into_iter()
            .filter_map(|call| match call {
                Call::Send { text, .. } => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].starts_with("Failed to answer message: "));
        assert!(!notices[0].contains("test-gemini-key"));
    }

    #[tokio::test]
    async fn reaction_failure_does_not_fail_answer() {
        let h = harness(ScriptedClient::with_text_deltas(&["done"]));
        h.platform
            .fail_reactions
            .store(true, std::sync::atomic::Ordering::SeqCst);

        let errors = h
            .pipeline
            .answer(text_request("hello", TEXT))
            .await
            .expect_err("reaction failure is reported for logging");

        assert_eq!(errors.len(), 1);
        let records = h.recorder.records();
        assert_eq!(records.len(), 1);
        assert!(records[0].successful);
        assert!(
            !h.platform
                .actions()
                .iter()
                .any(|call| matches!(call, Call::Send { text, .. } if text.starts_with("Failed")))
        );
    }

    #[tokio::test]
    async fn inline_query_gets_single_article() {
        let h = harness(ScriptedClient::with_response(
            serde_json::from_value(serde_json::json!({
                "candidates": [{
                    "content": { "role": "model", "parts": [{ "text": "42" }] },
                    "finishReason": "STOP"
                }]
            }))
            .expect("valid response"),
        ));

        h.pipeline
            .answer_inline(&InlineRequest {
                id: "q1".into(),
                user_id: 42,
                username: Some("alice".into()),
                query: "meaning of life?".into(),
            })
            .await
            .expect("inline answer");

        let actions = h.platform.actions();
        let [Call::InlineAnswer { query_id, results }] = actions.as_slice() else {
            panic!("expected one inline answer, got {actions:?}");
        };
        assert_eq!(query_id, "q1");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "meaning of life?");
        assert_eq!(results[0].text, "42");
        assert_eq!(h.recorder.records().len(), 1);
    }
}
