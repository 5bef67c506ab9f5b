//! Speech-to-text stage.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use adlens_models::{LocalVideo, Transcript};
use adlens_storage::{read_text, write_atomic, ArtifactKind, StorageResult};

use super::{for_each_bounded, lookup_or_claim, names, with_timeout, Cached, StageContext, Tally};
use crate::collaborators::SpeechToText;
use crate::engine::{Stage, StateField, StateUpdate, StateView};
use crate::error::PipelineResult;
use crate::metrics::ItemOutcome;

/// Transcribes each downloaded video into `transcriptions/{key}.txt`.
pub struct TranscriberStage {
    ctx: Arc<StageContext>,
    speech: Arc<dyn SpeechToText>,
}

/// Non-empty persisted transcript text.
async fn cached_text(path: &Path) -> StorageResult<Option<String>> {
    Ok(read_text(path).await?.filter(|text| !text.trim().is_empty()))
}

impl TranscriberStage {
    pub fn new(ctx: Arc<StageContext>, speech: Arc<dyn SpeechToText>) -> Self {
        Self { ctx, speech }
    }

    async fn transcribe(&self, video: &LocalVideo) -> (ItemOutcome, Option<Transcript>) {
        let key = video.key.clone();
        let entry = self.ctx.layout.entry(ArtifactKind::Transcript, &key);

        let path = entry.as_path();
        let lookup =
            lookup_or_claim(path, self.ctx.config.stale_claim_after, move || cached_text(path)).await;

        let _claim = match lookup {
            Ok(Cached::Hit(text)) => {
                debug!(video = %key, "Transcript already exists");
                return (ItemOutcome::CacheHit, Some(Transcript { video: key, text }));
            }
            Ok(Cached::Busy) => {
                info!(video = %key, "Transcript is being written by another worker, skipping");
                return (ItemOutcome::Skipped, None);
            }
            Ok(Cached::Claimed(claim)) => claim,
            Err(e) => {
                warn!(video = %key, error = %e, "Transcript cache lookup failed");
                return (ItemOutcome::Failed, None);
            }
        };

        let call = self
            .speech
            .transcribe(&video.path, &self.ctx.config.language_hint);
        let text = match with_timeout(self.ctx.config.call_timeout, call).await {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                warn!(video = %key, path = %video.path.display(), error = %e, "Transcription failed");
                return (ItemOutcome::Failed, None);
            }
        };

        if text.is_empty() {
            warn!(video = %key, "Transcription returned no text, skipping");
            return (ItemOutcome::Skipped, None);
        }

        if let Err(e) = write_atomic(&entry, text.as_bytes()).await {
            warn!(video = %key, error = %e, "Failed to persist transcript");
            return (ItemOutcome::Failed, None);
        }

        info!(video = %key, chars = text.len(), "Transcribed video");
        (ItemOutcome::Produced, Some(Transcript { video: key, text }))
    }
}

#[async_trait]
impl Stage for TranscriberStage {
    fn name(&self) -> &'static str {
        names::TRANSCRIBER
    }

    fn reads(&self) -> &'static [StateField] {
        &[StateField::LocalVideos]
    }

    fn writes(&self) -> StateField {
        StateField::Transcripts
    }

    async fn run(&self, view: StateView<'_>) -> PipelineResult<StateUpdate> {
        let videos = view.local_videos()?;

        let results = for_each_bounded(
            videos.items(),
            self.ctx.config.request_concurrency,
            |video| self.transcribe(video),
        )
        .await;

        let mut tally = Tally::new(self.name());
        let transcripts = tally.collect(results);
        tally.log_summary();

        Ok(StateUpdate::Transcripts(transcripts))
    }
}
