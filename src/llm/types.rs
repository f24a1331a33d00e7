//! Prompt fragments, generation options and Gemini wire types.

use crate::config::HarmBlockThreshold;
use crate::error::{GeminiError, Result};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

/// One typed fragment of a prompt, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt {
    Text(String),
    /// Raw bytes that must be uploaded before they can be referenced.
    FileBytes { name: String, data: Vec<u8> },
    /// A file the provider can fetch by itself.
    FileUri { uri: String, mime_type: String },
}

/// Output types a generation call can be asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Modality {
    Text,
    Image,
    Audio,
}

/// Per-call generation settings.
#[derive(Debug, Clone, Default)]
pub struct GenerationOptions {
    pub harm_block_threshold: Option<HarmBlockThreshold>,
    pub url_context: bool,
    pub google_search: bool,
    /// Empty means the model default (text).
    pub modalities: Vec<Modality>,
    pub voice: Option<String>,
    pub system_instruction: Option<String>,
}

impl GenerationOptions {
    /// Plain text answers, with URL context always on.
    pub fn text(
        system_instruction: impl Into<String>,
        threshold: HarmBlockThreshold,
        google_search: bool,
    ) -> Self {
        Self {
            harm_block_threshold: Some(threshold),
            url_context: true,
            google_search,
            system_instruction: Some(system_instruction.into()),
            ..Default::default()
        }
    }

    /// Image generation: text plus image parts.
    pub fn image(threshold: HarmBlockThreshold) -> Self {
        Self {
            harm_block_threshold: Some(threshold),
            modalities: vec![Modality::Text, Modality::Image],
            ..Default::default()
        }
    }

    /// Speech synthesis: audio parts only.
    pub fn speech(threshold: HarmBlockThreshold, voice: Option<String>) -> Self {
        Self {
            harm_block_threshold: Some(threshold),
            modalities: vec![Modality::Audio],
            voice,
            ..Default::default()
        }
    }
}

const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

/// A conversation turn on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn new(role: crate::ChatRole, parts: Vec<Part>) -> Self {
        Self {
            role: Some(role.as_str().to_string()),
            parts,
        }
    }
}

/// A single wire part. Exactly one of the payload fields is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_data: Option<FileData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<bool>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn file(uri: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            file_data: Some(FileData {
                mime_type: mime_type.into(),
                file_uri: uri.into(),
            }),
            ..Default::default()
        }
    }

    fn is_thought(&self) -> bool {
        self.thought.unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    /// Base64 encoded.
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileData {
    pub mime_type: String,
    pub file_uri: String,
}

/// A decoded response part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponsePart {
    Text(String),
    InlineBinary { mime_type: String, data: Vec<u8> },
    FileRef { uri: String, mime_type: String },
}

#[derive(Debug, Clone, Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

#[derive(Debug, Clone, Serialize)]
struct EmptyObject {}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Tool {
    #[serde(skip_serializing_if = "Option::is_none")]
    url_context: Option<EmptyObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    google_search: Option<EmptyObject>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    response_modalities: Vec<Modality>,
    #[serde(skip_serializing_if = "Option::is_none")]
    speech_config: Option<serde_json::Value>,
}

/// Body of a `generateContent` / `streamGenerateContent` call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    safety_settings: Vec<SafetySetting>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

impl GenerateRequest {
    pub fn new(contents: Vec<Content>, options: &GenerationOptions) -> Self {
        let safety_settings = options
            .harm_block_threshold
            .map(|threshold| {
                HARM_CATEGORIES
                    .iter()
                    .map(|&category| SafetySetting {
                        category,
                        threshold: threshold.as_str(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut tools = Vec::new();
        if options.url_context {
            tools.push(Tool {
                url_context: Some(EmptyObject {}),
                google_search: None,
            });
        }
        if options.google_search {
            tools.push(Tool {
                url_context: None,
                google_search: Some(EmptyObject {}),
            });
        }

        let speech_config = options.voice.as_ref().map(|voice| {
            serde_json::json!({
                "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": voice } }
            })
        });
        let generation_config = (!options.modalities.is_empty() || speech_config.is_some())
            .then(|| GenerationConfig {
                response_modalities: options.modalities.clone(),
                speech_config,
            });

        Self {
            contents,
            system_instruction: options.system_instruction.as_ref().map(|text| Content {
                role: None,
                parts: vec![Part::text(text.clone())],
            }),
            safety_settings,
            tools,
            generation_config,
        }
    }
}

/// Why the model stopped.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum FinishReason {
    Stop,
    Other(String),
}

impl From<String> for FinishReason {
    fn from(value: String) -> Self {
        if value == "STOP" {
            FinishReason::Stop
        } else {
            FinishReason::Other(value)
        }
    }
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FinishReason::Stop => f.write_str("STOP"),
            FinishReason::Other(reason) => f.write_str(reason),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
}

impl Candidate {
    /// Non-thought parts, decoded.
    pub fn response_parts(&self) -> Result<Vec<ResponsePart>> {
        let Some(content) = &self.content else {
            return Ok(Vec::new());
        };

        let mut parts = Vec::with_capacity(content.parts.len());
        for part in content.parts.iter().filter(|part| !part.is_thought()) {
            if let Some(blob) = &part.inline_data {
                let data = BASE64.decode(blob.data.as_bytes()).map_err(|error| {
                    GeminiError::Malformed(format!("inline data is not valid base64: {error}"))
                })?;
                parts.push(ResponsePart::InlineBinary {
                    mime_type: blob.mime_type.clone(),
                    data,
                });
            } else if let Some(file) = &part.file_data {
                parts.push(ResponsePart::FileRef {
                    uri: file.file_uri.clone(),
                    mime_type: file.mime_type.clone(),
                });
            } else if let Some(text) = part.text.as_ref().filter(|text| !text.is_empty()) {
                parts.push(ResponsePart::Text(text.clone()));
            }
        }
        Ok(parts)
    }

    pub fn has_content(&self) -> bool {
        self.content
            .as_ref()
            .is_some_and(|content| !content.parts.is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    #[serde(default)]
    pub block_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: u32,
    #[serde(default)]
    pub candidates_token_count: u32,
}

/// Response of a single-shot call, and each chunk of a streamed one.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub prompt_feedback: Option<PromptFeedback>,
    #[serde(default)]
    pub usage_metadata: Option<UsageMetadata>,
}

impl GenerateResponse {
    pub fn token_counts(&self) -> Option<TokenCounts> {
        self.usage_metadata.map(|usage| TokenCounts {
            input: usage.prompt_token_count,
            output: usage.candidates_token_count,
        })
    }

    /// A blocked prompt comes back with no candidates and a block reason.
    pub fn block_reason(&self) -> Option<FinishReason> {
        if !self.candidates.is_empty() {
            return None;
        }
        self.prompt_feedback
            .as_ref()
            .and_then(|feedback| feedback.block_reason.clone())
            .map(FinishReason::Other)
    }

    /// Collapse a streamed chunk into the increment it represents.
    pub fn into_stream_event(self) -> StreamEvent {
        let token_counts = self.token_counts();
        let block_reason = self.block_reason();

        let mut text = String::new();
        let mut finish_reason = block_reason;
        if let Some(candidate) = self.candidates.into_iter().next() {
            if let Some(content) = candidate.content {
                for part in content.parts.iter().filter(|part| !part.is_thought()) {
                    if let Some(delta) = &part.text {
                        text.push_str(delta);
                    }
                }
            }
            finish_reason = finish_reason.or(candidate.finish_reason);
        }

        StreamEvent {
            text_delta: (!text.is_empty()).then_some(text),
            finish_reason,
            token_counts,
        }
    }
}

/// Prompt and completion token counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenCounts {
    pub input: u32,
    pub output: u32,
}

impl TokenCounts {
    /// Providers report cumulative counts per chunk; keep the high-water mark.
    pub fn raise_to(&mut self, other: TokenCounts) {
        self.input = self.input.max(other.input);
        self.output = self.output.max(other.output);
    }
}

/// One increment of a streamed generation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamEvent {
    pub text_delta: Option<String>,
    pub finish_reason: Option<FinishReason>,
    pub token_counts: Option<TokenCounts>,
}

impl StreamEvent {
    pub fn text(delta: impl Into<String>) -> Self {
        Self {
            text_delta: Some(delta.into()),
            ..Default::default()
        }
    }
}

/// A file stored on the provider side.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    pub name: String,
    pub uri: String,
    pub mime_type: String,
    #[serde(default)]
    pub state: Option<String>,
}

impl UploadedFile {
    pub fn to_part(&self) -> Part {
        Part::file(self.uri.clone(), self.mime_type.clone())
    }
}

/// Input for a long-running video generation.
#[derive(Debug, Clone, Default)]
pub struct VideoRequest {
    pub prompt: Option<String>,
    pub first_frame: Option<InlineImage>,
}

#[derive(Debug, Clone)]
pub struct InlineImage {
    pub mime_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct GeneratedVideo {
    pub mime_type: String,
    pub data: Vec<u8>,
}
