//! Text answers: streamed (create once, then edit) or single-shot.

use super::{Pipeline, Turn};
use crate::error::{Error, ErrorList, GeminiError};
use crate::llm::{FinishReason, GenerateRequest, GenerationOptions, GenerativeClient, TokenCounts};
use crate::messaging::ChatPlatform;
use crate::prompt::to_prompts;
use crate::MessageId;

use futures::StreamExt as _;
use tokio::time::Instant;

/// How a text answer ended.
pub(crate) struct Answered {
    /// Some part of the answer reached the chat.
    pub delivered: bool,
    pub errors: ErrorList,
}

/// Output of one generation attempt, before it is judged.
struct Generated {
    text: String,
    message_id: Option<MessageId>,
    tokens: TokenCounts,
    /// What ended generation early, if anything.
    failure: Option<Error>,
    errors: ErrorList,
}

impl Generated {
    fn failed(error: Error) -> Self {
        Self {
            text: String::new(),
            message_id: None,
            tokens: TokenCounts::default(),
            failure: Some(error),
            errors: ErrorList::new(),
        }
    }
}

/// Inline marker for a finish reason other than a normal stop.
pub(super) fn marker(reason: &FinishReason) -> Option<String> {
    match reason {
        FinishReason::Stop => None,
        FinishReason::Other(reason) => Some(format!("<<<{reason}>>>")),
    }
}

impl<P: ChatPlatform, C: GenerativeClient> Pipeline<P, C> {
    pub(super) async fn answer_text(&self, turn: &Turn, google_search: bool) -> Answered {
        let budget = self.config.timeouts.answer;
        let deadline = Instant::now() + budget;
        let mut errors = ErrorList::new();

        let options = GenerationOptions::text(
            self.config.system_instruction.clone(),
            self.config.harm_block_threshold,
            google_search,
        );
        if self.config.verbose {
            tracing::debug!(
                chat_id = turn.chat_id,
                prompt = %turn.original.text,
                files = turn.original.files.len(),
                "processing prompt"
            );
        }

        let generated = match self
            .contents(turn, to_prompts(&turn.original), deadline, budget, &mut errors)
            .await
        {
            Ok(contents) => {
                let request = GenerateRequest::new(contents, &options);
                if self.config.stream_messages {
                    self.generate_streamed(turn, &request, deadline).await
                } else {
                    self.generate_single(turn, &request, deadline).await
                }
            }
            Err(error) => Generated::failed(error),
        };

        self.conclude(turn, generated, errors).await
    }

    async fn generate_streamed(
        &self,
        turn: &Turn,
        request: &GenerateRequest,
        deadline: Instant,
    ) -> Generated {
        let budget = self.config.timeouts.answer;
        let mut tokens = TokenCounts::default();
        let mut failure = None;
        let mut relay = self.sink.stream(turn.chat_id, Some(turn.message_id));

        let started = tokio::time::timeout_at(
            deadline,
            self.client.generate_streamed(&self.config.models.text, request),
        )
        .await;

        match started {
            Err(_) => failure = Some(Error::timeout("answer", budget)),
            Ok(Err(error)) => failure = Some(error),
            Ok(Ok(mut events)) => loop {
                let event = match tokio::time::timeout_at(deadline, events.next()).await {
                    Err(_) => {
                        failure = Some(Error::timeout("answer", budget));
                        break;
                    }
                    Ok(None) => break,
                    Ok(Some(Err(error))) => {
                        failure = Some(error);
                        break;
                    }
                    Ok(Some(Ok(event))) => event,
                };

                if self.config.verbose {
                    tracing::debug!(chat_id = turn.chat_id, ?event, "stream event");
                }
                if let Some(counts) = event.token_counts {
                    tokens.raise_to(counts);
                }
                let mut chunk = event.text_delta.unwrap_or_default();
                if let Some(tag) = event.finish_reason.as_ref().and_then(marker) {
                    chunk.push_str(&tag);
                }
                relay.push(&chunk).await;
            },
        }

        let outcome = relay.finish().await;
        Generated {
            text: outcome.text,
            message_id: outcome.message_id,
            tokens,
            failure,
            errors: outcome.errors,
        }
    }

    async fn generate_single(
        &self,
        turn: &Turn,
        request: &GenerateRequest,
        deadline: Instant,
    ) -> Generated {
        let budget = self.config.timeouts.answer;
        let response = match tokio::time::timeout_at(
            deadline,
            self.client.generate_once(&self.config.models.text, request),
        )
        .await
        {
            Err(_) => return Generated::failed(Error::timeout("answer", budget)),
            Ok(Err(error)) => return Generated::failed(error),
            Ok(Ok(response)) => response,
        };

        let event = response.into_stream_event();
        let tokens = event.token_counts.unwrap_or_default();
        let mut text = event.text_delta.unwrap_or_default();
        if let Some(tag) = event.finish_reason.as_ref().and_then(marker) {
            text.push_str(&tag);
        }

        if text.trim().is_empty() {
            return Generated {
                tokens,
                ..Generated::failed(
                    GeminiError::Malformed("no text was returned from API".into()).into(),
                )
            };
        }

        let mut errors = ErrorList::new();
        let message_id = match self
            .sink
            .send_text(turn.chat_id, Some(turn.message_id), &text)
            .await
        {
            Ok(message_id) => Some(message_id),
            Err(error) => {
                errors.push(error);
                None
            }
        };

        Generated {
            text,
            message_id,
            tokens,
            failure: None,
            errors,
        }
    }

    /// Judge the attempt: anything delivered counts as success. Records once.
    async fn conclude(&self, turn: &Turn, generated: Generated, mut errors: ErrorList) -> Answered {
        errors.extend(generated.errors);

        match generated.message_id {
            Some(message_id) => {
                if let Some(failure) = generated.failure {
                    tracing::warn!(
                        chat_id = turn.chat_id,
                        error = %failure,
                        "answer ended early, keeping partial text"
                    );
                    errors.push(failure);
                }
                self.mark_done(turn.chat_id, message_id, &mut errors).await;
                self.record_turn(turn, generated.tokens, generated.text, true);
                Answered {
                    delivered: true,
                    errors,
                }
            }
            None => {
                let result = match &generated.failure {
                    Some(failure) => self.redactor().redact_error(failure),
                    None if !errors.is_empty() => self.redactor().redact(&errors.join()),
                    None => "no answer was generated".to_string(),
                };
                if let Some(failure) = generated.failure {
                    errors.push(failure);
                }
                self.record_turn(turn, generated.tokens, result, false);
                Answered {
                    delivered: false,
                    errors,
                }
            }
        }
    }
}
