//! Relaying generated output back to the chat.

pub mod audio;
pub mod sink;

pub use sink::{
    CAPTION_PREVIEW_CHARS, MESSAGE_LIMIT, REACTION_EMOJI, RelayContent, RelaySink, StreamOutcome,
    StreamRelay,
};
