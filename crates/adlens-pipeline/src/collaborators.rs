//! External collaborators consumed by the stages.
//!
//! Each stage receives its collaborators through its constructor, so tests
//! substitute fakes without touching process-wide state.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use reqwest::Client;

use adlens_graph::GraphClient;
use adlens_llm::{CompletionRequest, LlmClient, TranscriptionRequest};
use adlens_models::{Ad, VideoId, VideoSource};

use crate::error::CollaboratorError;
use crate::prompts;

/// Streamed response body.
pub type ByteStream = BoxStream<'static, Result<Bytes, CollaboratorError>>;

/// Source of raw ad records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AdSource: Send + Sync {
    async fn list_ads(&self) -> Result<Vec<Ad>, CollaboratorError>;
}

/// Maps a video ID to its download location. `Ok(None)` means not found.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VideoResolver: Send + Sync {
    async fn resolve(&self, video_id: &VideoId) -> Result<Option<VideoSource>, CollaboratorError>;
}

/// Byte transport for video downloads.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VideoTransport: Send + Sync {
    async fn open(&self, url: &str) -> Result<ByteStream, CollaboratorError>;
}

/// Speech-to-text engine.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, media: &Path, language: &str) -> Result<String, CollaboratorError>;
}

/// Text and vision model.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionModel: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String, CollaboratorError>;
}

#[async_trait]
impl AdSource for GraphClient {
    async fn list_ads(&self) -> Result<Vec<Ad>, CollaboratorError> {
        Ok(GraphClient::list_ads(self).await?)
    }
}

#[async_trait]
impl VideoResolver for GraphClient {
    async fn resolve(&self, video_id: &VideoId) -> Result<Option<VideoSource>, CollaboratorError> {
        Ok(self.resolve_video(video_id).await?)
    }
}

#[async_trait]
impl SpeechToText for LlmClient {
    async fn transcribe(&self, media: &Path, language: &str) -> Result<String, CollaboratorError> {
        let request = TranscriptionRequest {
            language: Some(language.to_string()),
            prompt: Some(prompts::TRANSCRIPTION_CONTEXT.to_string()),
        };
        Ok(LlmClient::transcribe(self, media, &request).await?)
    }
}

#[async_trait]
impl CompletionModel for LlmClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, CollaboratorError> {
        Ok(LlmClient::complete(self, &request).await?)
    }
}

/// Plain HTTP(S) download transport.
#[derive(Clone)]
pub struct HttpTransport {
    http: Client,
}

impl HttpTransport {
    /// `read_timeout` bounds the wait for each chunk, not the whole body.
    pub fn new(read_timeout: Duration) -> Result<Self, CollaboratorError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .read_timeout(read_timeout)
            .build()
            .map_err(|e| CollaboratorError::transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { http })
    }
}

#[async_trait]
impl VideoTransport for HttpTransport {
    async fn open(&self, url: &str) -> Result<ByteStream, CollaboratorError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| CollaboratorError::transport(e.to_string()))?
            .error_for_status()
            .map_err(|e| CollaboratorError::transport(e.to_string()))?;

        Ok(response
            .bytes_stream()
            .map_err(|e| CollaboratorError::transport(e.to_string()))
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn read_all(mut stream: ByteStream) -> Result<Vec<u8>, CollaboratorError> {
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    #[tokio::test]
    async fn test_http_transport_streams_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 4096]))
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        let stream = transport
            .open(&format!("{}/v.mp4", server.uri()))
            .await
            .unwrap();

        assert_eq!(read_all(stream).await.unwrap(), vec![7u8; 4096]);
    }

    #[tokio::test]
    async fn test_http_transport_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        let result = transport.open(&format!("{}/gone.mp4", server.uri())).await;

        assert!(matches!(result, Err(CollaboratorError::Transport(_))));
    }
}
