//! Generative-AI client: trait, Gemini implementation, content conversion.

pub mod gemini;
pub mod sse;
pub mod traits;
pub mod types;

pub use gemini::GeminiClient;
pub use traits::{EventStream, GenerativeClient};
pub use types::{
    Content, FinishReason, GenerateRequest, GenerateResponse, GenerationOptions, Part, Prompt,
    ResponsePart, StreamEvent, TokenCounts,
};

use crate::ChatRole;
use crate::error::Result;
use crate::prompt::sniff;

/// Convert prompt fragments (plus prior turns) into request contents.
///
/// `FileBytes` fragments are uploaded first; the whole conversion fails if
/// any upload does, since the user asked about that file.
pub async fn prompts_to_contents<C: GenerativeClient>(
    client: &C,
    prompts: Vec<Prompt>,
    history: Vec<Content>,
) -> Result<Vec<Content>> {
    let mut parts = Vec::with_capacity(prompts.len());
    for prompt in prompts {
        match prompt {
            Prompt::Text(text) => parts.push(Part::text(text)),
            Prompt::FileUri { uri, mime_type } => parts.push(Part::file(uri, mime_type)),
            Prompt::FileBytes { name, data } => {
                let mime_type = sniff::detect(&data);
                let uploaded = client.upload_file_and_wait(&name, data, mime_type).await?;
                parts.push(uploaded.to_part());
            }
        }
    }

    let mut contents = history;
    contents.push(Content::new(ChatRole::User, parts));
    Ok(contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedClient;

    #[tokio::test]
    async fn file_bytes_are_uploaded_before_use() {
        let client = ScriptedClient::default();
        let history = vec![Content::new(ChatRole::Model, vec![Part::text("before")])];

        let contents = prompts_to_contents(
            &client,
            vec![
                Prompt::Text("what is this?".into()),
                Prompt::FileBytes {
                    name: "file 1".into(),
                    data: b"%PDF-1.7 ...".to_vec(),
                },
                Prompt::FileUri {
                    uri: "https://www.youtube.com/watch?v=x".into(),
                    mime_type: "video/mp4".into(),
                },
            ],
            history,
        )
        .await
        .expect("conversion succeeds");

        assert_eq!(contents.len(), 2);
        assert_eq!(contents[0].role.as_deref(), Some("model"));
        let parts = &contents[1].parts;
        assert_eq!(parts[0].text.as_deref(), Some("what is this?"));
        let uploaded = parts[1].file_data.as_ref().expect("upload referenced");
        assert_eq!(uploaded.mime_type, "application/pdf");
        assert_eq!(
            parts[2].file_data.as_ref().map(|f| f.file_uri.as_str()),
            Some("https://www.youtube.com/watch?v=x")
        );
        assert_eq!(client.uploads(), vec!["file 1".to_string()]);
    }
}
