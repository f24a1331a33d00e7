//! Configuration loading and validation.

use crate::error::{ConfigError, Result};

use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

pub const DEFAULT_GENERATIVE_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";
pub const DEFAULT_VIDEO_MODEL: &str = "veo-3.0-generate-001";
pub const DEFAULT_SPEECH_MODEL: &str = "gemini-2.5-flash-preview-tts";
pub const DEFAULT_SPEECH_VOICE: &str = "Kore";
pub const DEFAULT_API_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a Telegram bot with a backend system which uses the Google Gemini API. Respond to the user's message as precisely as possible. Your response must be in plain text.";

const REDACTED: &str = "<REDACTED>";

/// Raw config file contents. Every field is optional so defaults can be
/// filled in after parsing.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    telegram_bot_token: Option<String>,
    google_ai_api_key: Option<String>,
    system_instruction: Option<String>,

    google_generative_model: Option<String>,
    google_generative_model_for_image_generation: Option<String>,
    google_generative_model_for_video_generation: Option<String>,
    google_generative_model_for_speech_generation: Option<String>,
    google_generative_model_for_speech_generation_voice: Option<String>,
    harm_block_threshold: Option<HarmBlockThreshold>,

    #[serde(default)]
    allowed_telegram_users: Vec<String>,
    db_filepath: Option<PathBuf>,
    stream_messages: Option<bool>,

    answer_timeout_seconds: Option<u64>,
    media_generation_timeout_seconds: Option<u64>,
    request_timeout_seconds: Option<u64>,
    fetch_timeout_seconds: Option<u64>,
    max_concurrent_answers: Option<usize>,
    media_group_window_millis: Option<u64>,

    log_dir: Option<PathBuf>,
    #[serde(default)]
    verbose: bool,
    api_base_url: Option<String>,
}

/// Gemini safety threshold, applied to every harm category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HarmBlockThreshold {
    BlockLowAndAbove,
    BlockMediumAndAbove,
    #[default]
    BlockOnlyHigh,
    BlockNone,
    Off,
}

impl HarmBlockThreshold {
    pub fn as_str(self) -> &'static str {
        match self {
            HarmBlockThreshold::BlockLowAndAbove => "BLOCK_LOW_AND_ABOVE",
            HarmBlockThreshold::BlockMediumAndAbove => "BLOCK_MEDIUM_AND_ABOVE",
            HarmBlockThreshold::BlockOnlyHigh => "BLOCK_ONLY_HIGH",
            HarmBlockThreshold::BlockNone => "BLOCK_NONE",
            HarmBlockThreshold::Off => "OFF",
        }
    }
}

/// Model names per capability.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub text: String,
    pub image: String,
    pub video: String,
    pub speech: String,
    /// Prebuilt voice for speech synthesis.
    pub speech_voice: Option<String>,
}

/// Deadlines for each suspension point of an answer.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutConfig {
    /// Whole-answer deadline for text generation (streamed or not).
    pub answer: Duration,
    /// Deadline for image, speech and video generation.
    pub media_generation: Duration,
    /// Chat platform requests and media downloads.
    pub request: Duration,
    /// Best-effort URL enrichment fetches.
    pub fetch: Duration,
    /// Reactions and typing indicators.
    pub ignorable: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            answer: Duration::from_secs(180),
            media_generation: Duration::from_secs(600),
            request: Duration::from_secs(60),
            fetch: Duration::from_secs(15),
            ignorable: Duration::from_secs(3),
        }
    }
}

/// Resolved gembot configuration. Read-only after startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub telegram_bot_token: String,
    pub google_ai_api_key: String,
    pub api_base_url: String,
    pub system_instruction: String,
    pub models: ModelConfig,
    pub harm_block_threshold: HarmBlockThreshold,
    pub allowed_users: HashSet<String>,
    pub db_path: Option<PathBuf>,
    pub stream_messages: bool,
    pub timeouts: TimeoutConfig,
    pub max_concurrent_answers: usize,
    pub media_group_window: Duration,
    pub log_dir: Option<PathBuf>,
    pub verbose: bool,
}

impl Config {
    /// Default config file location (`$XDG_CONFIG_HOME/gembot/config.toml`).
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("gembot"))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }

    /// Load from a specific config file path.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|error| ConfigError::Load {
            path: path.display().to_string(),
            source: Arc::new(error),
        })?;

        Self::from_toml(&content)
    }

    /// Parse config file contents, apply environment overrides and defaults.
    pub fn from_toml(content: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(content).map_err(ConfigError::from)?;
        Self::resolve(file, |key| std::env::var(key).ok())
    }

    fn resolve(file: ConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let telegram_bot_token = env("TELEGRAM_BOT_TOKEN")
            .or(file.telegram_bot_token)
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingKey("telegram_bot_token".into()))?;
        let google_ai_api_key = env("GEMINI_API_KEY")
            .or(file.google_ai_api_key)
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingKey("google_ai_api_key".into()))?;

        let defaults = TimeoutConfig::default();
        let seconds = |value: Option<u64>, fallback: Duration| {
            value
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(fallback)
        };
        let timeouts = TimeoutConfig {
            answer: seconds(file.answer_timeout_seconds, defaults.answer),
            media_generation: seconds(
                file.media_generation_timeout_seconds,
                defaults.media_generation,
            ),
            request: seconds(file.request_timeout_seconds, defaults.request),
            fetch: seconds(file.fetch_timeout_seconds, defaults.fetch),
            ignorable: defaults.ignorable,
        };

        let max_concurrent_answers = file.max_concurrent_answers.unwrap_or(8);
        if max_concurrent_answers == 0 {
            return Err(ConfigError::Invalid("max_concurrent_answers must be at least 1".into()).into());
        }

        let allowed_users = file
            .allowed_telegram_users
            .into_iter()
            .map(|user| user.trim().trim_start_matches('@').to_string())
            .filter(|user| !user.is_empty())
            .collect();

        Ok(Self {
            telegram_bot_token,
            google_ai_api_key,
            api_base_url: file
                .api_base_url
                .unwrap_or_else(|| DEFAULT_API_BASE_URL.into()),
            system_instruction: file
                .system_instruction
                .unwrap_or_else(|| DEFAULT_SYSTEM_INSTRUCTION.into()),
            models: ModelConfig {
                text: file
                    .google_generative_model
                    .unwrap_or_else(|| DEFAULT_GENERATIVE_MODEL.into()),
                image: file
                    .google_generative_model_for_image_generation
                    .unwrap_or_else(|| DEFAULT_IMAGE_MODEL.into()),
                video: file
                    .google_generative_model_for_video_generation
                    .unwrap_or_else(|| DEFAULT_VIDEO_MODEL.into()),
                speech: file
                    .google_generative_model_for_speech_generation
                    .unwrap_or_else(|| DEFAULT_SPEECH_MODEL.into()),
                speech_voice: Some(
                    file.google_generative_model_for_speech_generation_voice
                        .unwrap_or_else(|| DEFAULT_SPEECH_VOICE.into()),
                ),
            },
            harm_block_threshold: file.harm_block_threshold.unwrap_or_default(),
            allowed_users,
            db_path: file.db_filepath,
            stream_messages: file.stream_messages.unwrap_or(true),
            timeouts,
            max_concurrent_answers,
            media_group_window: std::time::Duration::from_millis(
                file.media_group_window_millis.unwrap_or(1000),
            ),
            log_dir: file.log_dir,
            verbose: file.verbose,
        })
    }

    /// Whether a Telegram username (without `@`) may talk to the bot.
    pub fn is_allowed(&self, username: Option<&str>) -> bool {
        username.is_some_and(|name| self.allowed_users.contains(name))
    }

    /// Build a redactor for every credential this config holds.
    pub fn redactor(&self) -> Redactor {
        Redactor::new([
            self.telegram_bot_token.clone(),
            self.google_ai_api_key.clone(),
        ])
    }
}

static CREDENTIAL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"AIza[0-9A-Za-z_-]{35}").expect("hardcoded regex"),
        Regex::new(r"\b\d{8,10}:[0-9A-Za-z_-]{35}\b").expect("hardcoded regex"),
    ]
});

/// Strips credentials from anything headed for a log line or a chat message.
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    secrets: Arc<Vec<String>>,
}

impl Redactor {
    pub fn new(secrets: impl IntoIterator<Item = String>) -> Self {
        let secrets = secrets
            .into_iter()
            .filter(|secret| !secret.is_empty())
            .collect();
        Self {
            secrets: Arc::new(secrets),
        }
    }

    pub fn redact(&self, text: &str) -> String {
        let mut redacted = text.to_string();
        for secret in self.secrets.iter() {
            if redacted.contains(secret.as_str()) {
                redacted = redacted.replace(secret.as_str(), REDACTED);
            }
        }
        for pattern in CREDENTIAL_PATTERNS.iter() {
            if pattern.is_match(&redacted) {
                redacted = pattern.replace_all(&redacted, REDACTED).into_owned();
            }
        }
        redacted
    }

    pub fn redact_error(&self, error: &dyn std::fmt::Display) -> String {
        self.redact(&error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn fills_defaults() {
        let file: ConfigFile = toml::from_str(indoc! {r#"
            telegram_bot_token = "123456789:abc"
            google_ai_api_key = "key"
            allowed_telegram_users = ["@alice", "bob"]
        "#})
        .expect("valid toml");
        let config = Config::resolve(file, no_env).expect("config should resolve");

        assert_eq!(config.models.text, DEFAULT_GENERATIVE_MODEL);
        assert_eq!(config.models.speech_voice.as_deref(), Some(DEFAULT_SPEECH_VOICE));
        assert_eq!(config.harm_block_threshold, HarmBlockThreshold::BlockOnlyHigh);
        assert_eq!(config.timeouts.answer, Duration::from_secs(180));
        assert!(config.stream_messages);
        assert!(config.is_allowed(Some("alice")));
        assert!(config.is_allowed(Some("bob")));
        assert!(!config.is_allowed(Some("mallory")));
        assert!(!config.is_allowed(None));
    }

    #[test]
    fn missing_token_is_an_error() {
        let file: ConfigFile = toml::from_str(r#"google_ai_api_key = "key""#).expect("valid toml");
        let error = Config::resolve(file, no_env).expect_err("token is required");
        assert!(error.to_string().contains("telegram_bot_token"));
    }

    #[test]
    fn environment_overrides_file() {
        let file: ConfigFile = toml::from_str(indoc! {r#"
            telegram_bot_token = "from-file"
            harm_block_threshold = "BLOCK_NONE"
            answer_timeout_seconds = 30
        "#})
        .expect("valid toml");
        let config = Config::resolve(file, |key| match key {
            "GEMINI_API_KEY" => Some("from-env".into()),
            _ => None,
        })
        .expect("config should resolve");

        assert_eq!(config.telegram_bot_token, "from-file");
        assert_eq!(config.google_ai_api_key, "from-env");
        assert_eq!(config.harm_block_threshold.as_str(), "BLOCK_NONE");
        assert_eq!(config.timeouts.answer, Duration::from_secs(30));
    }

    #[test]
    fn redacts_configured_and_shaped_secrets() {
        let redactor = Redactor::new(["s3cret-key".to_string()]);
        let text = "GET https://x/?key=s3cret-key failed; token 123456789:AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

        let redacted = redactor.redact(text);

        assert!(!redacted.contains("s3cret-key"));
        assert!(!redacted.contains("123456789:AAAA"));
        assert_eq!(redacted.matches(REDACTED).count(), 2);
    }
}
