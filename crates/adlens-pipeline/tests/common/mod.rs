//! Hand-written collaborators for end-to-end pipeline runs.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};

use adlens_llm::CompletionRequest;
use adlens_media::{FrameSource, MediaResult};
use adlens_models::{Ad, VideoId, VideoSource};
use adlens_pipeline::{
    AdSource, ByteStream, Collaborators, CollaboratorError, CompletionModel, SpeechToText,
    VideoResolver, VideoTransport,
};

pub const SYNTHESIS_ANSWER: &str = "```json\n{\"hook\": \"Paise wapas guarantee\", \
    \"tone\": \"confident\", \"power_phrases\": [\"aaj hi order karein\"], \
    \"visual\": \"standing with the product\",}\n```";

pub fn calls(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}

#[derive(Default)]
pub struct FakeAds {
    pub ads: Vec<Ad>,
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
}

impl FakeAds {
    pub fn new(ads: Vec<Ad>) -> Self {
        Self {
            ads,
            ..Default::default()
        }
    }
}

#[async_trait]
impl AdSource for FakeAds {
    async fn list_ads(&self) -> Result<Vec<Ad>, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(CollaboratorError::transport("ads API unreachable"));
        }
        Ok(self.ads.clone())
    }
}

/// Resolves every video to `https://cdn.test/{id}.mp4`.
#[derive(Default)]
pub struct FakeResolver {
    pub calls: AtomicUsize,
}

#[async_trait]
impl VideoResolver for FakeResolver {
    async fn resolve(&self, video_id: &VideoId) -> Result<Option<VideoSource>, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Some(VideoSource {
            source_url: format!("https://cdn.test/{}.mp4", video_id),
            permalink_url: None,
        }))
    }
}

/// Serves a fixed body for every URL except those listed as broken.
#[derive(Default)]
pub struct FakeTransport {
    pub broken: Vec<String>,
    pub calls: AtomicUsize,
}

#[async_trait]
impl VideoTransport for FakeTransport {
    async fn open(&self, url: &str) -> Result<ByteStream, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.broken.iter().any(|id| url.contains(id.as_str())) {
            return Err(CollaboratorError::transport("HTTP 403"));
        }
        let chunks: Vec<Result<Bytes, CollaboratorError>> = vec![
            Ok(Bytes::from_static(b"\x00\x00\x00\x18ftypmp42")),
            Ok(Bytes::from_static(b"mdat")),
        ];
        Ok(stream::iter(chunks).boxed())
    }
}

#[derive(Default)]
pub struct FakeSpeech {
    pub calls: AtomicUsize,
}

#[async_trait]
impl SpeechToText for FakeSpeech {
    async fn transcribe(&self, media: &Path, _language: &str) -> Result<String, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!(
            "{}: pasand na aaye to paise wapas, aaj hi order karein",
            media.display()
        ))
    }
}

/// Answers by request shape: images get a frame label, system prompts a
/// technique list, everything else the synthesis JSON.
#[derive(Default)]
pub struct FakeModel {
    pub calls: AtomicUsize,
}

#[async_trait]
impl CompletionModel for FakeModel {
    async fn complete(&self, request: CompletionRequest) -> Result<String, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let answer = if request.image_base64.is_some() {
            "standing with the product"
        } else if request.system.is_some() {
            r#"{"techniques": ["risk reversal", "urgency"]}"#
        } else {
            SYNTHESIS_ANSWER
        };
        Ok(answer.to_string())
    }
}

/// Frame source with a per-file frame count (default 50).
#[derive(Default)]
pub struct FakeFrames {
    pub totals: HashMap<String, u64>,
    pub calls: AtomicUsize,
}

#[async_trait]
impl FrameSource for FakeFrames {
    async fn frame_count(&self, video: &Path) -> MediaResult<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let name = video
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        Ok(self.totals.get(name).copied().unwrap_or(50))
    }

    async fn extract_frame(&self, _video: &Path, position: u64, output: &Path) -> MediaResult<()> {
        tokio::fs::write(output, format!("jpeg-{}", position)).await?;
        Ok(())
    }
}

/// All fakes of one test, kept for call-count assertions.
#[derive(Clone)]
pub struct Fakes {
    pub ads: Arc<FakeAds>,
    pub resolver: Arc<FakeResolver>,
    pub transport: Arc<FakeTransport>,
    pub speech: Arc<FakeSpeech>,
    pub frames: Arc<FakeFrames>,
    pub model: Arc<FakeModel>,
}

impl Fakes {
    pub fn new(ads: FakeAds, transport: FakeTransport, frames: FakeFrames) -> Self {
        Self {
            ads: Arc::new(ads),
            resolver: Arc::new(FakeResolver::default()),
            transport: Arc::new(transport),
            speech: Arc::new(FakeSpeech::default()),
            frames: Arc::new(frames),
            model: Arc::new(FakeModel::default()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            ads: self.ads.clone(),
            resolver: self.resolver.clone(),
            transport: self.transport.clone(),
            speech: self.speech.clone(),
            frames: self.frames.clone(),
            model: self.model.clone(),
        }
    }
}
