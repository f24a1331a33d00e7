//! Artifact answers: image, speech and video generation.
//!
//! Each is a single blocking call. The first artifact that reaches the chat
//! wins (every video is sent); whatever went wrong is reported in the chat
//! here, since these messages are part of each command's contract.

use super::{Pipeline, Turn};
use crate::error::{Error, ErrorList, GeminiError};
use crate::llm::types::{InlineImage, VideoRequest};
use crate::llm::{
    FinishReason, GenerateRequest, GenerateResponse, GenerationOptions, GenerativeClient, Prompt,
    ResponsePart, TokenCounts,
};
use crate::messaging::ChatPlatform;
use crate::prompt::{sniff, to_prompts};
use crate::relay::RelayContent;
use crate::{MessageId, OutboundMedia};

use tokio::time::Instant;

/// What an artifact answer produced, before it is recorded.
struct Artifact {
    tokens: TokenCounts,
    result: String,
    sent: Option<MessageId>,
}

impl<P: ChatPlatform, C: GenerativeClient> Pipeline<P, C> {
    pub(super) async fn answer_with_image(&self, turn: &Turn) -> ErrorList {
        let options = GenerationOptions::image(self.config.harm_block_threshold);
        let model = self.config.models.image.clone();
        let prompts = to_prompts(&turn.original);

        let mut errors = ErrorList::new();
        let response = match self
            .generate_artifact(turn, prompts, &model, &options, &mut errors)
            .await
        {
            Ok(response) => response,
            Err(error) => {
                let notice = format!(
                    "Image generation failed: {}",
                    self.redactor().redact_error(&error)
                );
                return self.artifact_failed(turn, error, &notice, errors).await;
            }
        };

        let mut artifact = Artifact {
            tokens: response.token_counts().unwrap_or_default(),
            result: String::new(),
            sent: None,
        };
        let mut generated = false;
        let mut texts = String::new();

        if let Some(reason) = response.block_reason() {
            let notice = format!("Image generation failed with finish reason: {reason}");
            self.notify(turn.chat_id, turn.message_id, &notice, &mut errors).await;
        }

        'candidates: for candidate in &response.candidates {
            if !candidate.has_content() {
                if let Some(FinishReason::Other(reason)) = &candidate.finish_reason {
                    let notice = format!("Image generation failed with finish reason: {reason}");
                    self.notify(turn.chat_id, turn.message_id, &notice, &mut errors).await;
                }
                continue;
            }

            let parts = match candidate.response_parts() {
                Ok(parts) => parts,
                Err(error) => {
                    errors.push(error);
                    continue;
                }
            };
            for part in parts {
                match part {
                    ResponsePart::InlineBinary { data, .. } => {
                        let mime_type = sniff::detect(&data);
                        if !sniff::is_image(mime_type) {
                            errors.push(GeminiError::Malformed(format!(
                                "non-image part was received ({mime_type})"
                            )));
                            continue;
                        }
                        generated = true;
                        let len = data.len();
                        match self
                            .sink
                            .send_media(
                                turn.chat_id,
                                Some(turn.message_id),
                                OutboundMedia::Photo(data),
                            )
                            .await
                        {
                            Ok(message_id) => {
                                artifact.result = format!("{mime_type};{len} bytes");
                                artifact.sent = Some(message_id);
                                break 'candidates;
                            }
                            Err(error) => errors.push(error),
                        }
                    }
                    ResponsePart::Text(text) => texts.push_str(&text),
                    ResponsePart::FileRef { uri, mime_type } => {
                        tracing::debug!(%uri, %mime_type, "ignoring file reference in image response");
                    }
                }
            }
        }

        if artifact.sent.is_none() {
            let notice = if generated {
                "Successfully generated image(s), but send failed.".to_string()
            } else if !texts.is_empty() {
                format!("Image generation failed: {texts}")
            } else {
                "No image was returned from API.".to_string()
            };
            self.notify(turn.chat_id, turn.message_id, &notice, &mut errors).await;
            artifact.result = notice;
        }

        self.conclude_artifact(turn, artifact, errors).await
    }

    pub(super) async fn answer_with_speech(&self, turn: &Turn) -> ErrorList {
        let options = GenerationOptions::speech(
            self.config.harm_block_threshold,
            self.config.models.speech_voice.clone(),
        );
        let model = self.config.models.speech.clone();

        // Speech reads the text as written; links are not resolved.
        let mut prompts = vec![Prompt::Text(turn.original.text.clone())];
        prompts.extend(
            turn.original
                .files
                .iter()
                .enumerate()
                .map(|(index, data)| Prompt::FileBytes {
                    name: format!("file {}", index + 1),
                    data: data.clone(),
                }),
        );

        let mut errors = ErrorList::new();
        let response = match self
            .generate_artifact(turn, prompts, &model, &options, &mut errors)
            .await
        {
            Ok(response) => response,
            Err(error) => {
                let notice = format!(
                    "Speech generation failed: {}",
                    self.redactor().redact_error(&error)
                );
                return self.artifact_failed(turn, error, &notice, errors).await;
            }
        };

        let mut artifact = Artifact {
            tokens: response.token_counts().unwrap_or_default(),
            result: String::new(),
            sent: None,
        };

        if let Some(reason) = response.block_reason() {
            let notice = format!("Speech generation failed with finish reason: {reason}");
            self.notify(turn.chat_id, turn.message_id, &notice, &mut errors).await;
        }

        'candidates: for candidate in &response.candidates {
            if !candidate.has_content() {
                if let Some(FinishReason::Other(reason)) = &candidate.finish_reason {
                    let notice = format!("Speech generation failed with finish reason: {reason}");
                    self.notify(turn.chat_id, turn.message_id, &notice, &mut errors).await;
                }
                continue;
            }

            let parts = match candidate.response_parts() {
                Ok(parts) => parts,
                Err(error) => {
                    errors.push(error);
                    continue;
                }
            };
            for part in parts {
                let ResponsePart::InlineBinary { mime_type, data } = part else {
                    continue;
                };
                let len = data.len();
                let content = RelayContent::Binary {
                    mime_type: mime_type.clone(),
                    data,
                };
                match self
                    .sink
                    .relay(turn.chat_id, Some(turn.message_id), content)
                    .await
                {
                    Ok(message_id) => {
                        artifact.result = format!("{mime_type};{len} bytes");
                        artifact.sent = Some(message_id);
                        break 'candidates;
                    }
                    Err(error @ Error::Audio(crate::error::AudioError::Unsupported { .. })) => {
                        errors.push(error);
                        break 'candidates;
                    }
                    Err(error) => {
                        tracing::warn!(chat_id = turn.chat_id, %error, "failed to send speech");
                        errors.push(error);
                    }
                }
            }
        }

        if artifact.sent.is_none() {
            let notice = "No speech was returned from API.";
            self.notify(turn.chat_id, turn.message_id, notice, &mut errors).await;
            artifact.result = notice.to_string();
        }

        self.conclude_artifact(turn, artifact, errors).await
    }

    pub(super) async fn answer_with_video(&self, turn: &Turn) -> ErrorList {
        let budget = self.config.timeouts.media_generation;
        let mut errors = ErrorList::new();

        let first_frame = turn
            .original
            .files
            .iter()
            .find_map(|data| {
                let mime_type = sniff::detect(data);
                sniff::is_image(mime_type).then(|| InlineImage {
                    mime_type: mime_type.to_string(),
                    data: data.clone(),
                })
            });
        let request = VideoRequest {
            prompt: Some(turn.original.text.clone()).filter(|text| !text.trim().is_empty()),
            first_frame,
        };
        if self.config.verbose {
            tracing::debug!(
                chat_id = turn.chat_id,
                prompt = ?request.prompt,
                first_frame = request.first_frame.is_some(),
                "generating video"
            );
        }

        let videos = match tokio::time::timeout(
            budget,
            self.client.generate_video(&self.config.models.video, &request),
        )
        .await
        .map_err(|_| Error::timeout("video generation", budget))
        .and_then(|videos| videos)
        {
            Ok(videos) => videos,
            Err(error) => {
                let notice = format!(
                    "Video generation failed: {}",
                    self.redactor().redact_error(&error)
                );
                return self.artifact_failed(turn, error, &notice, errors).await;
            }
        };

        let mut artifact = Artifact {
            tokens: TokenCounts::default(),
            result: String::new(),
            sent: None,
        };
        let mut generated = false;

        for (index, video) in videos.into_iter().enumerate() {
            if video.data.is_empty() {
                let notice =
                    format!("Video generation failed: no video content found at videos[{index}].");
                self.notify(turn.chat_id, turn.message_id, &notice, &mut errors).await;
                continue;
            }
            generated = true;
            let len = video.data.len();
            match self
                .sink
                .send_media(
                    turn.chat_id,
                    Some(turn.message_id),
                    OutboundMedia::Video(video.data),
                )
                .await
            {
                Ok(message_id) => {
                    artifact.result = format!("{};{len} bytes", video.mime_type);
                    artifact.sent = Some(message_id);
                }
                Err(error) => errors.push(error),
            }
        }

        if artifact.sent.is_none() {
            let notice = if generated {
                "Successfully generated video(s), but send failed."
            } else {
                "No video was returned from API"
            };
            self.notify(turn.chat_id, turn.message_id, notice, &mut errors).await;
            artifact.result = notice.to_string();
        }

        self.conclude_artifact(turn, artifact, errors).await
    }

    /// Convert prompts (plus history) and run one blocking generation call
    /// under the media deadline.
    async fn generate_artifact(
        &self,
        turn: &Turn,
        prompts: Vec<Prompt>,
        model: &str,
        options: &GenerationOptions,
        errors: &mut ErrorList,
    ) -> crate::Result<GenerateResponse> {
        let budget = self.config.timeouts.media_generation;
        let deadline = Instant::now() + budget;

        let contents = self
            .contents(turn, prompts, deadline, budget, errors)
            .await?;
        let request = GenerateRequest::new(contents, options);

        tokio::time::timeout_at(deadline, self.client.generate_once(model, &request))
            .await
            .map_err(|_| Error::timeout("media generation", budget))?
    }

    async fn artifact_failed(
        &self,
        turn: &Turn,
        error: Error,
        notice: &str,
        mut errors: ErrorList,
    ) -> ErrorList {
        tracing::warn!(chat_id = turn.chat_id, %error, "media generation failed");
        let result = self.redactor().redact_error(&error);
        errors.push(error);
        self.notify(turn.chat_id, turn.message_id, notice, &mut errors).await;
        self.record_turn(turn, TokenCounts::default(), result, false);
        errors
    }

    async fn conclude_artifact(&self, turn: &Turn, artifact: Artifact, mut errors: ErrorList) -> ErrorList {
        let successful = artifact.sent.is_some();
        if let Some(message_id) = artifact.sent {
            self.mark_done(turn.chat_id, message_id, &mut errors).await;
        }
        self.record_turn(turn, artifact.tokens, artifact.result, successful);
        errors
    }
}
