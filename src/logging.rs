//! Tracing initialisation.

use crate::config::Redactor;

use anyhow::Context as _;
use std::borrow::Cow;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

const MAX_MESSAGE_CHARS: usize = 280;

pub fn truncate_for_log(message: &str, max_chars: usize) -> (&str, bool) {
    match message.char_indices().nth(max_chars) {
        Some((byte_index, _character)) => (&message[..byte_index], true),
        None => (message, false),
    }
}

/// `truncate_for_log` with a trailing ellipsis when something was cut.
pub fn log_preview(message: &str, max_chars: usize) -> Cow<'_, str> {
    match truncate_for_log(message, max_chars) {
        (truncated, true) => Cow::Owned(format!("{truncated}...")),
        (original, false) => Cow::Borrowed(original),
    }
}

/// Install the global subscriber: stderr, or a daily rolling file when
/// `log_dir` is set. Every field is redacted and long messages are cut.
///
/// The returned guard flushes the file writer on drop; hold it for the
/// process lifetime.
pub fn init_tracing(
    debug: bool,
    log_dir: Option<&Path>,
    redactor: Redactor,
) -> anyhow::Result<Option<WorkerGuard>> {
    let field_formatter = format::debug_fn(move |writer, field, value| {
        let field_name = field.name();
        let formatted = redactor.redact(&format!("{value:?}"));

        if field_name == "message" {
            let (truncated, was_truncated) = truncate_for_log(&formatted, MAX_MESSAGE_CHARS);
            if was_truncated {
                write!(writer, "{}={}...", field_name, truncated)
            } else {
                write!(writer, "{}={formatted}", field_name)
            }
        } else {
            write!(writer, "{}={formatted}", field_name)
        }
    });
    let filter = build_env_filter(debug);

    match log_dir {
        Some(log_dir) => {
            std::fs::create_dir_all(log_dir).with_context(|| {
                format!("failed to create log directory: {}", log_dir.display())
            })?;
            let file_appender = tracing_appender::rolling::daily(log_dir, "gembot.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .fmt_fields(field_formatter)
                .compact();
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .try_init()
                .context("failed to install tracing subscriber")?;
            Ok(Some(guard))
        }
        None => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .fmt_fields(field_formatter)
                .compact();
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .try_init()
                .context("failed to install tracing subscriber")?;
            Ok(None)
        }
    }
}

/// `RUST_LOG` wins when set; otherwise `debug` or `info`.
fn build_env_filter(debug: bool) -> tracing_subscriber::EnvFilter {
    let default = if debug { "debug" } else { "info" };
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_for_log_handles_multibyte_characters() {
        let message = "abc→def";
        let (truncated, was_truncated) = truncate_for_log(message, 4);

        assert!(was_truncated);
        assert_eq!(truncated, "abc→");
    }

    #[test]
    fn truncate_for_log_returns_original_when_within_limit() {
        let message = "hello";
        let (truncated, was_truncated) = truncate_for_log(message, 10);

        assert!(!was_truncated);
        assert_eq!(truncated, "hello");
    }

    #[test]
    fn log_preview_marks_truncation() {
        assert_eq!(log_preview("abcdef", 3), "abc...");
        assert_eq!(log_preview("abc", 3), "abc");
    }
}
