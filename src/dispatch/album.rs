//! Buffering of grouped (album) messages until the group is complete.

use crate::IncomingMessage;

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

/// Collects messages that share a media-group id.
///
/// Telegram delivers an album as separate updates that arrive within a short
/// burst. The first message of a group opens it; whoever opened it waits for
/// the window and then takes the whole group.
#[derive(Debug)]
pub struct AlbumBuffer {
    window: Duration,
    pending: Mutex<HashMap<String, Vec<IncomingMessage>>>,
}

impl AlbumBuffer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Add a grouped message. Returns `true` when it opened a new group.
    pub async fn push(&self, group_id: &str, message: IncomingMessage) -> bool {
        let mut pending = self.pending.lock().await;
        match pending.get_mut(group_id) {
            Some(group) => {
                group.push(message);
                false
            }
            None => {
                pending.insert(group_id.to_string(), vec![message]);
                true
            }
        }
    }

    /// Remove a group, ordered for answering: the captioned message first,
    /// then the rest by message id.
    pub async fn take(&self, group_id: &str) -> Vec<IncomingMessage> {
        let mut group = self
            .pending
            .lock()
            .await
            .remove(group_id)
            .unwrap_or_default();

        group.sort_by_key(|message| (message.text_or_caption().is_none(), message.message_id));
        group
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grouped(message_id: i32, caption: Option<&str>) -> IncomingMessage {
        IncomingMessage {
            message_id,
            caption: caption.map(str::to_string),
            media_group_id: Some("g".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn first_push_opens_group() {
        let albums = AlbumBuffer::new(Duration::from_millis(10));

        assert!(albums.push("g", grouped(1, None)).await);
        assert!(!albums.push("g", grouped(2, None)).await);
        assert!(albums.push("h", grouped(3, None)).await);
    }

    #[tokio::test]
    async fn captioned_message_leads_the_group() {
        let albums = AlbumBuffer::new(Duration::from_millis(10));
        albums.push("g", grouped(5, None)).await;
        albums.push("g", grouped(4, None)).await;
        albums.push("g", grouped(6, Some("compare"))).await;

        let ids: Vec<_> = albums
            .take("g")
            .await
            .iter()
            .map(|message| message.message_id)
            .collect();

        assert_eq!(ids, vec![6, 4, 5]);
        assert!(albums.take("g").await.is_empty());
    }
}
