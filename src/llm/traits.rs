//! Generative-AI client trait.

use crate::error::Result;
use crate::llm::types::{
    GenerateRequest, GenerateResponse, GeneratedVideo, StreamEvent, UploadedFile, VideoRequest,
};

use futures::Stream;
use std::pin::Pin;

/// Lazy, finite, non-restartable sequence of stream increments.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Operations the answer pipeline needs from a generative-AI provider.
pub trait GenerativeClient: Send + Sync + 'static {
    /// Blocking generation returning the full candidate set.
    fn generate_once(
        &self,
        model: &str,
        request: &GenerateRequest,
    ) -> impl std::future::Future<Output = Result<GenerateResponse>> + Send;

    /// Streamed generation. Events arrive in order and the stream ends after
    /// the final chunk or the first error.
    fn generate_streamed(
        &self,
        model: &str,
        request: &GenerateRequest,
    ) -> impl std::future::Future<Output = Result<EventStream>> + Send;

    /// Upload bytes to provider storage and wait until they may be referenced.
    fn upload_file_and_wait(
        &self,
        display_name: &str,
        data: Vec<u8>,
        mime_type: &str,
    ) -> impl std::future::Future<Output = Result<UploadedFile>> + Send;

    /// Run a long-running video generation to completion and download the results.
    fn generate_video(
        &self,
        model: &str,
        request: &VideoRequest,
    ) -> impl std::future::Future<Output = Result<Vec<GeneratedVideo>>> + Send;
}
