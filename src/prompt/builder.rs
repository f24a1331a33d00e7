//! Prompt Builder: platform message (plus album siblings) to `ChatMessage`.

use crate::error::{MessagingError, Result};
use crate::messaging::ChatPlatform;
use crate::prompt::urls::UrlFetcher;
use crate::{ChatMessage, IncomingMessage, MediaRef};

use std::sync::Arc;
use std::time::Duration;

/// Prompt used when a message carries only media.
pub const DEFAULT_MEDIA_PROMPT: &str = "Describe provided media(s).";

/// Turns inbound messages into prompt material.
pub struct PromptBuilder<P> {
    platform: Arc<P>,
    fetcher: UrlFetcher,
    download_timeout: Duration,
}

impl<P: ChatPlatform> PromptBuilder<P> {
    pub fn new(platform: Arc<P>, fetcher: UrlFetcher, download_timeout: Duration) -> Self {
        Self {
            platform,
            fetcher,
            download_timeout,
        }
    }

    /// Build the user's turn. URLs in the text are enriched; media of the
    /// message and of every album sibling is attached.
    pub async fn build(
        &self,
        message: &IncomingMessage,
        siblings: &[IncomingMessage],
    ) -> Result<ChatMessage> {
        let mut built = self.convert(message).await?;
        if let Some(text) = message.text.as_deref().filter(|text| !text.trim().is_empty()) {
            let enriched = self.fetcher.enrich(text).await;
            built.text = enriched.text;
            built.files.extend(enriched.files);
        }

        for sibling in siblings {
            let Some(media) = &sibling.media else {
                continue;
            };
            if let Some(data) = self.download(media).await {
                built.files.push(data);
            }
        }

        Ok(built)
    }

    /// Build the reply-parent's turn: its text and media, no URL fetching.
    pub async fn build_parent(&self, parent: &IncomingMessage) -> Result<ChatMessage> {
        self.convert(parent).await
    }

    async fn convert(&self, message: &IncomingMessage) -> Result<ChatMessage> {
        let text = message
            .text_or_caption()
            .map(str::trim)
            .filter(|text| !text.is_empty());

        let mut files = Vec::new();
        match (&message.media, text) {
            (Some(media), _) => {
                if let Some(data) = self.download(media).await {
                    files.push(data);
                }
            }
            (None, Some(_)) => {}
            (None, None) if message.text.is_some() => {}
            (None, None) => {
                return Err(MessagingError::Unsupported(format!(
                    "message {} has neither text nor supported media",
                    message.message_id
                ))
                .into());
            }
        }

        Ok(ChatMessage {
            role: message.role(),
            text: text.unwrap_or(DEFAULT_MEDIA_PROMPT).to_string(),
            files,
        })
    }

    /// Failed downloads are logged and the file omitted.
    async fn download(&self, media: &MediaRef) -> Option<Vec<u8>> {
        match tokio::time::timeout(
            self.download_timeout,
            self.platform.download_file(&media.file_id),
        )
        .await
        {
            Ok(Ok(data)) => Some(data),
            Ok(Err(error)) => {
                tracing::warn!(kind = media.kind.as_str(), %error, "failed to download media");
                None
            }
            Err(_) => {
                tracing::warn!(
                    kind = media.kind.as_str(),
                    timeout_secs = self.download_timeout.as_secs(),
                    "media download timed out"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockPlatform;
    use crate::{MediaKind, MediaRef};

    fn builder(platform: Arc<MockPlatform>) -> PromptBuilder<MockPlatform> {
        let fetcher = UrlFetcher::new(Duration::from_secs(1)).expect("fetcher builds");
        PromptBuilder::new(platform, fetcher, Duration::from_secs(1))
    }

    fn photo(file_id: &str, caption: Option<&str>) -> IncomingMessage {
        IncomingMessage {
            chat_id: 1,
            message_id: 10,
            caption: caption.map(str::to_string),
            media: Some(MediaRef {
                kind: MediaKind::Photo,
                file_id: file_id.into(),
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn empty_message_yields_placeholder_without_files() {
        let platform = Arc::new(MockPlatform::default());
        let message = IncomingMessage {
            text: Some(String::new()),
            ..Default::default()
        };

        let built = builder(platform.clone())
            .build(&message, &[])
            .await
            .expect("build succeeds");

        assert_eq!(built.text, DEFAULT_MEDIA_PROMPT);
        assert!(built.files.is_empty());
        assert!(platform.calls().is_empty());
    }

    #[tokio::test]
    async fn album_siblings_are_attached() {
        let platform = Arc::new(MockPlatform::default());
        platform.add_file("a", b"first".to_vec());
        platform.add_file("b", b"second".to_vec());

        let built = builder(platform)
            .build(&photo("a", None), &[photo("b", None), photo("missing", None)])
            .await
            .expect("build succeeds");

        assert_eq!(built.text, DEFAULT_MEDIA_PROMPT);
        assert_eq!(built.files, vec![b"first".to_vec(), b"second".to_vec()]);
    }

    #[tokio::test]
    async fn caption_is_used_as_prompt() {
        let platform = Arc::new(MockPlatform::default());
        platform.add_file("a", b"bytes".to_vec());

        let built = builder(platform)
            .build(&photo("a", Some("  what is this?  ")), &[])
            .await
            .expect("build succeeds");

        assert_eq!(built.text, "what is this?");
        assert_eq!(built.files.len(), 1);
    }

    #[tokio::test]
    async fn bot_authored_parent_has_model_role() {
        let platform = Arc::new(MockPlatform::default());
        let parent = IncomingMessage {
            text: Some("previous answer".into()),
            from_bot: true,
            ..Default::default()
        };

        let built = builder(platform)
            .build_parent(&parent)
            .await
            .expect("build succeeds");

        assert_eq!(built.role, crate::ChatRole::Model);
        assert_eq!(built.text, "previous answer");
    }

    #[tokio::test]
    async fn sticker_is_unsupported() {
        let platform = Arc::new(MockPlatform::default());
        let error = builder(platform)
            .build_parent(&IncomingMessage::default())
            .await
            .expect_err("nothing to convert");
        assert!(error.to_string().contains("unsupported message"));
    }
}
