//! History Assembler: the reply-parent as one prior model turn.

use crate::error::{Error, ErrorList};
use crate::llm::{Content, GenerativeClient, Part};
use crate::prompt::sniff;
use crate::{ChatMessage, ChatRole};

use tokio::time::Instant;

/// Upload the parent's files and build its turn.
///
/// All uploads share `deadline`. Failed or late uploads are collected and
/// the turn is returned without them.
pub async fn build_history<C: GenerativeClient>(
    client: &C,
    parent: &ChatMessage,
    deadline: Instant,
) -> (Content, ErrorList) {
    let budget = deadline.saturating_duration_since(Instant::now());
    let mut errors = ErrorList::new();
    let mut parts = vec![Part::text(parent.text.clone())];

    for (index, file) in parent.files.iter().enumerate() {
        let name = format!("file {}", index + 1);
        let mime_type = sniff::detect(file);

        let upload = client.upload_file_and_wait(&name, file.clone(), mime_type);
        match tokio::time::timeout_at(deadline, upload).await {
            Ok(Ok(uploaded)) => parts.push(uploaded.to_part()),
            Ok(Err(error)) => {
                tracing::warn!(file = %name, %error, "history file upload failed");
                errors.push(error);
            }
            Err(_) => {
                tracing::warn!(file = %name, "history file upload timed out");
                errors.push(Error::timeout("history file upload", budget));
            }
        }
    }

    (Content::new(ChatRole::Model, parts), errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedClient;

    use std::time::Duration;

    #[tokio::test]
    async fn failed_upload_keeps_text_turn() {
        let client = ScriptedClient::default();
        client.fail_uploads_named("file 2");
        let parent = ChatMessage {
            role: ChatRole::Model,
            text: "earlier".into(),
            files: vec![b"%PDF-1.4".to_vec(), b"plain".to_vec()],
        };

        let deadline = Instant::now() + Duration::from_secs(1);
        let (turn, errors) = build_history(&client, &parent, deadline).await;

        assert_eq!(turn.role.as_deref(), Some("model"));
        assert_eq!(turn.parts.len(), 2);
        assert_eq!(turn.parts[0].text.as_deref(), Some("earlier"));
        assert!(turn.parts[1].file_data.is_some());
        assert_eq!(errors.len(), 1);
    }

    #[tokio::test]
    async fn stalled_uploads_stop_at_the_shared_deadline() {
        let client = ScriptedClient::default();
        client.stall_uploads_named("file 1");
        client.stall_uploads_named("file 2");
        let parent = ChatMessage {
            role: ChatRole::Model,
            text: "earlier".into(),
            files: vec![b"%PDF-1.4".to_vec(), b"%PDF-1.4".to_vec()],
        };

        let started = Instant::now();
        let deadline = started + Duration::from_millis(150);
        let (turn, errors) = build_history(&client, &parent, deadline).await;

        assert!(started.elapsed() < Duration::from_millis(250));
        assert_eq!(turn.parts.len(), 1);
        assert_eq!(errors.len(), 2);
        assert!(errors.join().contains("history file upload timed out"));
    }
}
