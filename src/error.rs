//! Top-level error types for gembot.

use std::sync::Arc;

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Gemini(#[from] GeminiError),

    #[error(transparent)]
    Messaging(#[from] MessagingError),

    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{stage} timed out after {seconds} second(s)")]
    Timeout { stage: &'static str, seconds: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn timeout(stage: &'static str, duration: std::time::Duration) -> Self {
        Error::Timeout {
            stage,
            seconds: duration.as_secs(),
        }
    }
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load config from {path}: {source}")]
    Load {
        path: String,
        source: Arc<std::io::Error>,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing required config key: {0}")]
    MissingKey(String),
}

/// Generative-AI provider errors.
#[derive(Debug, thiserror::Error)]
pub enum GeminiError {
    #[error("provider request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Gemini API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("malformed provider response: {0}")]
    Malformed(String),

    #[error("file upload failed: {0}")]
    Upload(String),

    #[error("uploaded file {name} failed processing")]
    FileFailed { name: String },

    #[error("generation operation failed: {0}")]
    Operation(String),
}

/// Chat platform request errors.
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    #[error("failed to {action}: {description}")]
    Rejected {
        action: &'static str,
        description: String,
    },

    #[error("failed to download file {file_id}: {description}")]
    Download {
        file_id: String,
        description: String,
    },

    #[error("unsupported message: {0}")]
    Unsupported(String),
}

impl MessagingError {
    pub fn rejected(action: &'static str, description: impl ToString) -> Self {
        MessagingError::Rejected {
            action,
            description: description.to_string(),
        }
    }
}

/// Audio conversion errors.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("invalid PCM parameters: {0}")]
    InvalidParameters(String),

    #[error("unsupported audio part (codec: {codec}, rate: {rate})")]
    Unsupported { codec: String, rate: u32 },

    #[error("failed to run encoder: {0}")]
    Spawn(std::io::Error),

    #[error("encoder exited with {status}: {stderr}")]
    Encoder { status: String, stderr: String },

    #[error("encoder timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("WAV encoding failed: {0}")]
    Wav(#[from] hound::Error),
}

/// Interaction log storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to connect to SQLite: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("query failed: {0}")]
    Query(#[from] sqlx::Error),
}

/// Several independent failures collected while one answer was being produced.
///
/// Stages push what went wrong and keep going; the caller decides what, if
/// anything, the user gets to see. Nothing here implies a retry.
#[derive(Debug, Default)]
pub struct ErrorList {
    errors: Vec<Error>,
}

impl ErrorList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: impl Into<Error>) {
        self.errors.push(error.into());
    }

    pub fn extend(&mut self, other: ErrorList) {
        self.errors.extend(other.errors);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Error> {
        self.errors.iter()
    }

    /// All messages joined with newlines, in the order they were pushed.
    pub fn join(&self) -> String {
        self.errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn into_result(self) -> std::result::Result<(), ErrorList> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl std::fmt::Display for ErrorList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.join())
    }
}

impl std::error::Error for ErrorList {}

impl From<Error> for ErrorList {
    fn from(error: Error) -> Self {
        Self {
            errors: vec![error],
        }
    }
}
