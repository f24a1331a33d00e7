//! Gemini REST client: generate, stream, upload, long-running video.

use crate::error::{GeminiError, Result};
use crate::llm::sse::SseDecoder;
use crate::llm::traits::{EventStream, GenerativeClient};
use crate::llm::types::{
    GenerateRequest, GenerateResponse, GeneratedVideo, UploadedFile, VideoRequest,
};

use anyhow::Context as _;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::StreamExt as _;
use serde::Deserialize;
use std::time::Duration;

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Uploaded files are polled at this interval until they become active.
const UPLOAD_POLL_INTERVAL: Duration = Duration::from_millis(300);

/// Video operations take minutes; polling faster only burns quota.
const OPERATION_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Gemini API client over `reqwest`.
#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl GeminiClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        let model = model.strip_prefix("models/").unwrap_or(model);
        format!("{}/v1beta/models/{model}:{method}", self.base_url)
    }

    /// `name` is a resource path such as `files/abc` or `models/x/operations/y`.
    fn resource_url(&self, name: &str) -> String {
        format!("{}/v1beta/{name}", self.base_url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .http
            .get(url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(GeminiError::from)?;
        parse_json(response).await
    }

    async fn wait_until_active(&self, mut file: UploadedFile) -> Result<UploadedFile> {
        loop {
            match file.state.as_deref() {
                Some("ACTIVE") | None => return Ok(file),
                Some("FAILED") => {
                    return Err(GeminiError::FileFailed { name: file.name }.into());
                }
                Some(state) => {
                    tracing::debug!(file = %file.name, state, "waiting for uploaded file");
                    tokio::time::sleep(UPLOAD_POLL_INTERVAL).await;
                    file = self.get_json(&self.resource_url(&file.name)).await?;
                }
            }
        }
    }

    async fn download(&self, uri: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(uri)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(GeminiError::from)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(api_error(status, &body).into());
        }
        let bytes = response.bytes().await.map_err(GeminiError::from)?;
        Ok(bytes.to_vec())
    }
}

impl GenerativeClient for GeminiClient {
    async fn generate_once(
        &self,
        model: &str,
        request: &GenerateRequest,
    ) -> Result<GenerateResponse> {
        let response = self
            .http
            .post(self.model_url(model, "generateContent"))
            .header(API_KEY_HEADER, &self.api_key)
            .json(request)
            .send()
            .await
            .map_err(GeminiError::from)?;

        parse_json(response).await
    }

    async fn generate_streamed(
        &self,
        model: &str,
        request: &GenerateRequest,
    ) -> Result<EventStream> {
        let response = self
            .http
            .post(self.model_url(model, "streamGenerateContent"))
            .query(&[("alt", "sse")])
            .header(API_KEY_HEADER, &self.api_key)
            .json(request)
            .send()
            .await
            .map_err(GeminiError::from)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.map_err(GeminiError::from)?;
            return Err(api_error(status, &body).into());
        }

        let mut body = response.bytes_stream();
        let stream = async_stream::try_stream! {
            let mut decoder = SseDecoder::new();
            while let Some(chunk) = body.next().await {
                let chunk = chunk.map_err(|error| crate::Error::from(GeminiError::from(error)))?;
                for payload in decoder.push(&chunk) {
                    yield parse_chunk(&payload)?;
                }
            }
            if let Some(payload) = decoder.finish() {
                yield parse_chunk(&payload)?;
            }
        };

        Ok(Box::pin(stream))
    }

    async fn upload_file_and_wait(
        &self,
        display_name: &str,
        data: Vec<u8>,
        mime_type: &str,
    ) -> Result<UploadedFile> {
        let start = self
            .http
            .post(format!("{}/upload/v1beta/files", self.base_url))
            .header(API_KEY_HEADER, &self.api_key)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", data.len().to_string())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&serde_json::json!({ "file": { "display_name": display_name } }))
            .send()
            .await
            .map_err(GeminiError::from)?;

        let status = start.status();
        if !status.is_success() {
            let body = start.text().await.unwrap_or_default();
            return Err(api_error(status, &body).into());
        }
        let upload_url = start
            .headers()
            .get("x-goog-upload-url")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| GeminiError::Upload("no upload URL in response".into()))?;

        let size = data.len();
        let finalize = self
            .http
            .post(upload_url)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(data)
            .send()
            .await
            .map_err(GeminiError::from)?;

        #[derive(Deserialize)]
        struct UploadResponse {
            file: UploadedFile,
        }
        let uploaded: UploadResponse = parse_json(finalize).await?;

        tracing::debug!(
            file = %uploaded.file.name,
            mime_type,
            size,
            "uploaded file to Gemini"
        );

        self.wait_until_active(uploaded.file).await
    }

    async fn generate_video(
        &self,
        model: &str,
        request: &VideoRequest,
    ) -> Result<Vec<GeneratedVideo>> {
        let mut instance = serde_json::json!({});
        if let Some(prompt) = &request.prompt {
            instance["prompt"] = serde_json::json!(prompt);
        }
        if let Some(frame) = &request.first_frame {
            instance["image"] = serde_json::json!({
                "bytesBase64Encoded": BASE64.encode(&frame.data),
                "mimeType": frame.mime_type,
            });
        }

        let response = self
            .http
            .post(self.model_url(model, "predictLongRunning"))
            .header(API_KEY_HEADER, &self.api_key)
            .json(&serde_json::json!({ "instances": [instance] }))
            .send()
            .await
            .map_err(GeminiError::from)?;
        let mut operation: Operation = parse_json(response).await?;

        while !operation.done {
            tracing::debug!(operation = %operation.name, "waiting for video generation");
            tokio::time::sleep(OPERATION_POLL_INTERVAL).await;
            operation = self.get_json(&self.resource_url(&operation.name)).await?;
        }

        if let Some(error) = operation.error {
            return Err(GeminiError::Operation(error.message).into());
        }

        let samples = operation
            .response
            .and_then(|response| response.generate_video_response)
            .map(|response| response.generated_samples)
            .unwrap_or_default();

        let mut videos = Vec::with_capacity(samples.len());
        for sample in samples {
            let Some(uri) = sample.video.and_then(|video| video.uri) else {
                continue;
            };
            let data = self.download(&uri).await?;
            videos.push(GeneratedVideo {
                mime_type: "video/mp4".into(),
                data,
            });
        }
        Ok(videos)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Operation {
    name: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<OperationError>,
    #[serde(default)]
    response: Option<OperationResponse>,
}

#[derive(Debug, Deserialize)]
struct OperationError {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationResponse {
    #[serde(default)]
    generate_video_response: Option<VideoResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoResponse {
    #[serde(default)]
    generated_samples: Vec<VideoSample>,
}

#[derive(Debug, Deserialize)]
struct VideoSample {
    #[serde(default)]
    video: Option<VideoUri>,
}

#[derive(Debug, Deserialize)]
struct VideoUri {
    #[serde(default)]
    uri: Option<String>,
}

async fn parse_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    let response_text = response
        .text()
        .await
        .map_err(|e| GeminiError::Malformed(format!("failed to read response body: {e}")))?;

    if !status.is_success() {
        return Err(api_error(status, &response_text).into());
    }

    serde_json::from_str(&response_text).map_err(|e| {
        GeminiError::Malformed(format!(
            "Gemini response ({status}) is not valid JSON: {e}\nBody: {}",
            truncate_body(&response_text)
        ))
        .into()
    })
}

fn parse_chunk(payload: &str) -> Result<crate::llm::types::StreamEvent> {
    let response: GenerateResponse = serde_json::from_str(payload).map_err(|e| {
        GeminiError::Malformed(format!(
            "stream chunk is not valid JSON: {e}\nBody: {}",
            truncate_body(payload)
        ))
    })?;
    Ok(response.into_stream_event())
}

fn api_error(status: reqwest::StatusCode, body: &str) -> GeminiError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| value["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| truncate_body(body).to_string());

    GeminiError::Api {
        status: status.as_u16(),
        message,
    }
}

/// Truncate a response body for error messages to avoid dumping megabytes of HTML.
fn truncate_body(body: &str) -> &str {
    let limit = 500;
    if body.len() <= limit {
        body
    } else {
        &body[..body.floor_char_boundary(limit)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_prefers_provider_message() {
        let error = api_error(
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            r#"{"error": {"code": 429, "message": "Resource exhausted", "status": "RESOURCE_EXHAUSTED"}}"#,
        );
        assert_eq!(error.to_string(), "Gemini API error (429): Resource exhausted");

        let error = api_error(reqwest::StatusCode::BAD_GATEWAY, "<html>bad gateway</html>");
        assert_eq!(error.to_string(), "Gemini API error (502): <html>bad gateway</html>");
    }

    #[test]
    fn model_url_accepts_prefixed_names() {
        let client = GeminiClient::new("https://example.test/", "key").expect("client builds");
        assert_eq!(
            client.model_url("models/gemini-2.5-flash", "generateContent"),
            "https://example.test/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }

    #[test]
    fn truncate_body_handles_multibyte_characters() {
        let body = "é".repeat(400);
        let truncated = truncate_body(&body);
        assert!(truncated.len() <= 500);
        assert!(body.starts_with(truncated));
    }
}
