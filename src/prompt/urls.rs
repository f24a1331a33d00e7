//! URL enrichment: inline fetched text, attach fetched binaries.

use crate::llm::Prompt;
use crate::prompt::sniff;

use anyhow::Context as _;
use futures::StreamExt as _;
use regex::Regex;
use std::ops::Range;
use std::sync::LazyLock;
use std::time::Duration;

static URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>"'`]+"#).expect("hardcoded regex"));

static SCRIPT_OR_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>|<!--.*?-->")
        .expect("hardcoded regex")
});

static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]+>").expect("hardcoded regex"));

/// Hosts whose links go to the provider as remote video references.
const VIDEO_HOSTS: [&str; 2] = ["www.youtube.com", "youtu.be"];

/// Larger bodies are not worth pulling through the bot.
pub const MAX_FETCH_BYTES: usize = 20 * 1024 * 1024;

const FETCHED_OPEN: &str = "\n<fetched>\n";
const FETCHED_CLOSE: &str = "\n</fetched>\n";

/// What a fetched URL turned into.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Fetched {
    Text(String),
    Binary { mime_type: String, data: Vec<u8> },
}

/// Result of enriching one prompt text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Enriched {
    pub text: String,
    pub files: Vec<Vec<u8>>,
}

/// Fetches URLs found in prompt text, each under its own timeout.
#[derive(Debug, Clone)]
pub struct UrlFetcher {
    http: reqwest::Client,
    timeout: Duration,
    max_bytes: usize,
}

impl UrlFetcher {
    pub fn new(timeout: Duration) -> crate::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("gembot/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            timeout,
            max_bytes: MAX_FETCH_BYTES,
        })
    }

    /// Cap on a single response body.
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Replace every fetchable URL in `text`. Failures leave the URL as-is.
    pub async fn enrich(&self, text: &str) -> Enriched {
        let mut urls: Vec<&str> = find_urls(text)
            .into_iter()
            .map(|(_, url)| url)
            .filter(|url| !is_video_link(url))
            .collect();
        urls.sort_unstable();
        urls.dedup();

        if urls.is_empty() {
            return Enriched {
                text: text.to_string(),
                files: Vec::new(),
            };
        }

        let results = futures::future::join_all(urls.iter().map(|url| self.fetch(url))).await;
        let fetched: Vec<(&str, Fetched)> = urls
            .iter()
            .zip(results)
            .filter_map(|(url, result)| match result {
                Ok(Some(fetched)) => Some((*url, fetched)),
                Ok(None) => {
                    tracing::debug!(url, "unsupported content type, keeping url");
                    None
                }
                Err(error) => {
                    tracing::warn!(url, %error, "failed to fetch url, keeping it in the prompt");
                    None
                }
            })
            .collect();

        let mut enriched = Enriched::default();
        let mut cursor = 0;
        for (start, url) in find_urls(text) {
            let Some((_, content)) = fetched.iter().find(|(fetched_url, _)| *fetched_url == url)
            else {
                continue;
            };

            enriched.text.push_str(&text[cursor..start]);
            match content {
                Fetched::Text(body) => {
                    enriched.text.push_str(FETCHED_OPEN);
                    enriched.text.push_str(&body.replace("</fetched>", "&lt;/fetched&gt;"));
                    enriched.text.push_str(FETCHED_CLOSE);
                }
                Fetched::Binary { mime_type, data } => {
                    enriched.files.push(data.clone());
                    enriched.text.push_str(&format!(
                        "<attached file {} ({mime_type})>",
                        enriched.files.len()
                    ));
                }
            }
            cursor = start + url.len();
        }
        enriched.text.push_str(&text[cursor..]);
        enriched
    }

    async fn fetch(&self, url: &str) -> anyhow::Result<Option<Fetched>> {
        let response = self
            .http
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .context("request failed")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("unexpected status {status}");
        }
        if response
            .content_length()
            .is_some_and(|length| length > self.max_bytes as u64)
        {
            anyhow::bail!("body too large");
        }

        let header_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(';').next())
            .map(|value| value.trim().to_ascii_lowercase());

        // Chunked responses carry no length; count while reading.
        let mut body = Vec::new();
        let mut chunks = response.bytes_stream();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.context("failed to read body")?;
            if body.len() + chunk.len() > self.max_bytes {
                anyhow::bail!("body too large");
            }
            body.extend_from_slice(&chunk);
        }

        let mime_type = header_type
            .filter(|mime| mime != "application/octet-stream")
            .or_else(|| {
                mime_guess::from_path(url_path(url))
                    .first()
                    .map(|mime| mime.essence_str().to_string())
            })
            .unwrap_or_else(|| sniff::detect(&body).to_string());

        Ok(classify(&mime_type, body))
    }
}

fn classify(mime_type: &str, body: Vec<u8>) -> Option<Fetched> {
    if mime_type == "text/html" || mime_type == "application/xhtml+xml" {
        return Some(Fetched::Text(strip_html(&String::from_utf8_lossy(&body))));
    }
    if mime_type.starts_with("text/")
        || mime_type == "application/json"
        || mime_type.ends_with("+json")
    {
        return Some(Fetched::Text(String::from_utf8_lossy(&body).into_owned()));
    }
    let attachable = mime_type.starts_with("image/")
        || mime_type.starts_with("audio/")
        || mime_type.starts_with("video/")
        || mime_type == "application/pdf"
        || is_source_type(mime_type);
    attachable.then(|| Fetched::Binary {
        mime_type: mime_type.to_string(),
        data: body,
    })
}

fn is_source_type(mime_type: &str) -> bool {
    matches!(
        mime_type,
        "application/javascript"
            | "application/x-javascript"
            | "application/typescript"
            | "application/x-python"
            | "application/x-python-code"
            | "application/x-sh"
            | "application/xml"
            | "application/x-yaml"
            | "application/toml"
            | "application/rtf"
    )
}

fn url_path(url: &str) -> &str {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    without_query
        .split_once("://")
        .map(|(_, rest)| rest)
        .and_then(|rest| rest.find('/').map(|index| &rest[index..]))
        .unwrap_or("")
}

/// URLs with their byte offsets, trailing punctuation trimmed.
fn find_urls(text: &str) -> Vec<(usize, &str)> {
    URL_PATTERN
        .find_iter(text)
        .map(|found| {
            let url = found
                .as_str()
                .trim_end_matches(['.', ',', ';', ':', '!', '?', ')', ']', '}']);
            (found.start(), url)
        })
        .filter(|(_, url)| url.len() > "https://".len())
        .collect()
}

pub fn is_video_link(url: &str) -> bool {
    VIDEO_HOSTS.iter().any(|host| url.contains(host))
}

/// Byte ranges of inlined page bodies, delimiters included.
fn fetched_spans(text: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut from = 0;
    while let Some(open) = text[from..].find(FETCHED_OPEN) {
        let start = from + open;
        let body = start + FETCHED_OPEN.len();
        let end = text[body..]
            .find(FETCHED_CLOSE)
            .map_or(text.len(), |close| body + close + FETCHED_CLOSE.len());
        spans.push(start..end);
        from = end;
    }
    spans
}

/// Split prompt text around video links, turning each into a remote file
/// reference so the provider fetches it instead of the bot. Links inside
/// fetched page bodies stay text.
pub fn split_video_links(text: &str) -> Vec<Prompt> {
    let mut prompts = Vec::new();
    let mut cursor = 0;
    let fetched = fetched_spans(text);

    for (start, url) in find_urls(text) {
        if !is_video_link(url) || fetched.iter().any(|span| span.contains(&start)) {
            continue;
        }
        let before = &text[cursor..start];
        if !before.is_empty() {
            prompts.push(Prompt::Text(before.to_string()));
        }
        prompts.push(Prompt::FileUri {
            uri: url.to_string(),
            mime_type: "video/mp4".into(),
        });
        cursor = start + url.len();
    }

    let rest = &text[cursor..];
    if !rest.is_empty() || prompts.is_empty() {
        prompts.push(Prompt::Text(rest.to_string()));
    }
    prompts
}

/// Drop scripts, styles and tags, then collapse runs of blank lines.
pub fn strip_html(html: &str) -> String {
    let without_code = SCRIPT_OR_STYLE.replace_all(html, "");
    let without_tags = HTML_TAG.replace_all(&without_code, "\n");
    let decoded = without_tags
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    let mut output = String::with_capacity(decoded.len());
    let mut previous_blank = true;
    for line in decoded.lines().map(str::trim) {
        if line.is_empty() {
            if !previous_blank {
                output.push('\n');
            }
            previous_blank = true;
        } else {
            output.push_str(line);
            output.push('\n');
            previous_blank = false;
        }
    }
    output.trim_end().to_string()
}
