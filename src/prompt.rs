//! Prompt assembly: inbound messages, URLs and reply-parents to prompt material.

pub mod builder;
pub mod history;
pub mod sniff;
pub mod urls;

pub use builder::{DEFAULT_MEDIA_PROMPT, PromptBuilder};
pub use history::build_history;
pub use urls::UrlFetcher;

use crate::ChatMessage;
use crate::llm::Prompt;

/// Prompt fragments for a built message: text (video links split out as
/// remote files) followed by every attached file.
pub fn to_prompts(message: &ChatMessage) -> Vec<Prompt> {
    let mut prompts = urls::split_video_links(&message.text);
    prompts.extend(
        message
            .files
            .iter()
            .enumerate()
            .map(|(index, data)| Prompt::FileBytes {
                name: format!("file {}", index + 1),
                data: data.clone(),
            }),
    );
    prompts
}
