//! Chat platform adapters.

pub mod telegram;
pub mod traits;

pub use telegram::TelegramAdapter;
pub use traits::{ChatPlatform, InboundStream, InlineArticle};
