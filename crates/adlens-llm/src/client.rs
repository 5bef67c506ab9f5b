//! Model service HTTP client.

use std::path::Path;
use std::time::{Duration, Instant};

use adlens_retry::{parse_retry_after, retry, Backoff};
use metrics::{counter, histogram};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use tracing::{debug, info_span, Instrument};

use crate::error::{LlmError, LlmResult};
use crate::types::{
    ChatMessage, ChatRequest, ChatResponse, ContentPart, ImageUrl, MessageContent,
    TranscriptionResponse,
};

/// Total model requests by operation and outcome.
const REQUESTS_TOTAL: &str = "adlens_llm_requests_total";

/// Model request latency in seconds by operation.
const LATENCY_SECONDS: &str = "adlens_llm_latency_seconds";

/// Configuration for the model client.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// API key sent as bearer token
    pub api_key: String,
    /// Base URL including the version path
    pub base_url: String,
    /// Model for chat completions
    pub chat_model: String,
    /// Model for audio transcription
    pub transcription_model: String,
    /// Request timeout
    pub timeout: Duration,
    /// Backoff for rate limits and 5xx responses
    pub retry: Backoff,
}

impl LlmConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            chat_model: "gpt-4o".to_string(),
            transcription_model: "whisper-1".to_string(),
            timeout: Duration::from_secs(120),
            retry: Backoff::new(2, Duration::from_millis(500)),
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> LlmResult<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| LlmError::Config("OPENAI_API_KEY must be set".to_string()))?;

        let mut config = Self::new(api_key);

        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            if !url.trim().is_empty() {
                config.base_url = url.trim().trim_end_matches('/').to_string();
            }
        }
        if let Ok(model) = std::env::var("OPENAI_CHAT_MODEL") {
            if !model.trim().is_empty() {
                config.chat_model = model.trim().to_string();
            }
        }
        if let Ok(model) = std::env::var("OPENAI_TRANSCRIPTION_MODEL") {
            if !model.trim().is_empty() {
                config.transcription_model = model.trim().to_string();
            }
        }

        config.timeout = Duration::from_secs(
            std::env::var("OPENAI_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(120),
        );
        config.retry.max_retries = std::env::var("OPENAI_MAX_RETRIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(config.retry.max_retries);

        Ok(config)
    }
}

/// One chat completion call.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub prompt: String,
    /// Base64 JPEG sent inline as a data URL
    pub image_base64: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }
}

/// Options of one transcription call.
#[derive(Debug, Clone, Default)]
pub struct TranscriptionRequest {
    /// ISO-639-1 language hint
    pub language: Option<String>,
    /// Vocabulary / context prompt
    pub prompt: Option<String>,
}

/// Client for an OpenAI-compatible model service.
#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    config: LlmConfig,
}

impl LlmClient {
    /// Create a new client.
    pub fn new(config: LlmConfig) -> LlmResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("adlens-llm/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(LlmError::Network)?;

        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> LlmResult<Self> {
        Self::new(LlmConfig::from_env()?)
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// Run a chat completion and return the trimmed message text.
    pub async fn complete(&self, request: &CompletionRequest) -> LlmResult<String> {
        let url = format!("{}/chat/completions", self.config.base_url);

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system.as_deref() {
            messages.push(ChatMessage {
                role: "system",
                content: MessageContent::Text(system),
            });
        }
        let content = match &request.image_base64 {
            Some(image) => MessageContent::Parts(vec![
                ContentPart::Text {
                    text: request.prompt.clone(),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: format!("data:image/jpeg;base64,{}", image),
                    },
                },
            ]),
            None => MessageContent::Text(&request.prompt),
        };
        messages.push(ChatMessage {
            role: "user",
            content,
        });

        let body = ChatRequest {
            model: &self.config.chat_model,
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let response: ChatResponse = self
            .observe("chat_completion", async {
                retry(&self.config.retry, "chat_completion", || async {
                    let response = self
                        .http
                        .post(&url)
                        .bearer_auth(&self.config.api_key)
                        .json(&body)
                        .send()
                        .await?;
                    Self::parse_response(response).await
                })
                .await
            })
            .await?;

        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(text)
    }

    /// Upload a media file for speech-to-text.
    pub async fn transcribe(&self, file: &Path, request: &TranscriptionRequest) -> LlmResult<String> {
        let url = format!("{}/audio/transcriptions", self.config.base_url);
        let bytes = tokio::fs::read(file).await?;
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "audio.mp4".to_string());

        debug!(file = %file.display(), bytes = bytes.len(), "Uploading media for transcription");

        let response: TranscriptionResponse = self
            .observe("transcription", async {
                retry(&self.config.retry, "transcription", || async {
                    let part = Part::bytes(bytes.clone())
                        .file_name(file_name.clone())
                        .mime_str("video/mp4")?;
                    let mut form = Form::new()
                        .part("file", part)
                        .text("model", self.config.transcription_model.clone())
                        .text("response_format", "json");
                    if let Some(language) = &request.language {
                        form = form.text("language", language.clone());
                    }
                    if let Some(prompt) = &request.prompt {
                        form = form.text("prompt", prompt.clone());
                    }

                    let response = self
                        .http
                        .post(&url)
                        .bearer_auth(&self.config.api_key)
                        .multipart(form)
                        .send()
                        .await?;
                    Self::parse_response(response).await
                })
                .await
            })
            .await?;

        Ok(response.text.trim().to_string())
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> LlmResult<T> {
        let status = response.status();
        if !status.is_success() {
            let wait = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let body = response.text().await.unwrap_or_default();
            return Err(match LlmError::from_http_status(status.as_u16(), body) {
                LlmError::RateLimited { message, .. } => LlmError::RateLimited {
                    message,
                    retry_after: wait,
                },
                error => error,
            });
        }

        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| LlmError::InvalidResponse(format!("{}: {}", e, body)))
    }

    async fn observe<T, F>(&self, operation: &'static str, fut: F) -> LlmResult<T>
    where
        F: std::future::Future<Output = LlmResult<T>>,
    {
        let start = Instant::now();
        let result = fut.instrument(info_span!("llm_request", operation)).await;

        let outcome = if result.is_ok() { "ok" } else { "error" };
        counter!(REQUESTS_TOTAL, "operation" => operation, "outcome" => outcome).increment(1);
        histogram!(LATENCY_SECONDS, "operation" => operation).record(start.elapsed().as_secs_f64());

        result
    }
}
