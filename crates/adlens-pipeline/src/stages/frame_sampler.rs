//! Frame sampling stage.

use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use tokio::fs;
use tracing::{debug, info, warn};

use adlens_media::{stride_positions, FrameSource};
use adlens_models::{Frame, FrameSet, LocalVideo};
use adlens_storage::{load_committed_frames, ArtifactKind, FrameDirBuilder};

use super::{for_each_bounded, lookup_or_claim, names, with_timeout, Cached, StageContext, Tally};
use crate::engine::{Stage, StateField, StateUpdate, StateView};
use crate::error::{CollaboratorError, PipelineResult};
use crate::metrics::ItemOutcome;

/// Samples evenly spaced frames of each video into `frames/{key}/`.
///
/// A video with no decodable frames yields an empty frame set, which is
/// committed too so the video is not probed again.
pub struct FrameSamplerStage {
    ctx: Arc<StageContext>,
    frames: Arc<dyn FrameSource>,
}

impl FrameSamplerStage {
    pub fn new(ctx: Arc<StageContext>, frames: Arc<dyn FrameSource>) -> Self {
        Self { ctx, frames }
    }

    pub(crate) async fn sample(&self, video: &LocalVideo) -> (ItemOutcome, Option<FrameSet>) {
        let key = video.key.clone();
        let dir = self.ctx.layout.entry(ArtifactKind::Frames, &key);

        let path = dir.as_path();
        let lookup = lookup_or_claim(path, self.ctx.config.stale_claim_after, move || {
            load_committed_frames(path)
        })
        .await;

        let _claim = match lookup {
            Ok(Cached::Hit(set)) => {
                debug!(video = %key, frames = set.frames.len(), "Frames already sampled");
                return (ItemOutcome::CacheHit, Some(set));
            }
            Ok(Cached::Busy) => {
                info!(video = %key, "Frames are being sampled by another worker, skipping");
                return (ItemOutcome::Skipped, None);
            }
            Ok(Cached::Claimed(claim)) => claim,
            Err(e) => {
                warn!(video = %key, error = %e, "Frame cache lookup failed");
                return (ItemOutcome::Failed, None);
            }
        };

        let limit = self.ctx.config.call_timeout;
        let count = async {
            self.frames
                .frame_count(&video.path)
                .await
                .map_err(CollaboratorError::from)
        };
        let total = match with_timeout(limit, count).await {
            Ok(total) => total,
            Err(e) => {
                warn!(video = %key, path = %video.path.display(), error = %e, "Failed to count frames");
                return (ItemOutcome::Failed, None);
            }
        };

        let wanted = self.ctx.config.frames_per_video;
        let builder = match FrameDirBuilder::begin(&dir).await {
            Ok(builder) => builder,
            Err(e) => {
                warn!(video = %key, error = %e, "Failed to create frame directory");
                return (ItemOutcome::Failed, None);
            }
        };

        let mut frames = Vec::with_capacity(wanted);
        let mut attempted = 0usize;
        for position in stride_positions(total, wanted) {
            if frames.len() >= wanted {
                break;
            }
            attempted += 1;
            let index = frames.len() as u32 + 1;
            let name = Frame::file_name(index);
            let output = builder.frame_path(&name);

            let extract = async {
                self.frames
                    .extract_frame(&video.path, position, &output)
                    .await
                    .map_err(CollaboratorError::from)?;
                fs::read(&output)
                    .await
                    .map_err(|e| CollaboratorError::other(e.to_string()))
            };
            let extracted = with_timeout(limit, extract).await;

            match extracted {
                Ok(bytes) => frames.push(Frame {
                    index,
                    position,
                    path: builder.committed_path(&name),
                    name,
                    encoded: STANDARD.encode(bytes),
                }),
                Err(e) => {
                    warn!(video = %key, position, error = %e, "Failed to extract frame");
                    let _ = fs::remove_file(&output).await;
                }
            }
        }

        if attempted > 0 && frames.is_empty() {
            warn!(video = %key, total, "No frame could be extracted");
            return (ItemOutcome::Failed, None);
        }

        let set = FrameSet {
            video: key.clone(),
            total_frames: total,
            frames,
        };
        if let Err(e) = builder.commit(&set.manifest()).await {
            warn!(video = %key, error = %e, "Failed to commit frame directory");
            return (ItemOutcome::Failed, None);
        }

        if set.is_empty() {
            info!(video = %key, "Video has no decodable frames");
        } else {
            info!(video = %key, total, frames = set.frames.len(), "Sampled frames");
        }
        (ItemOutcome::Produced, Some(set))
    }
}

#[async_trait]
impl Stage for FrameSamplerStage {
    fn name(&self) -> &'static str {
        names::FRAME_SAMPLER
    }

    fn reads(&self) -> &'static [StateField] {
        &[StateField::LocalVideos]
    }

    fn writes(&self) -> StateField {
        StateField::FrameSets
    }

    async fn run(&self, view: StateView<'_>) -> PipelineResult<StateUpdate> {
        let videos = view.local_videos()?;

        let results = for_each_bounded(
            videos.items(),
            self.ctx.config.request_concurrency,
            |video| self.sample(video),
        )
        .await;

        let mut tally = Tally::new(self.name());
        let sets = tally.collect(results);
        tally.log_summary();

        Ok(StateUpdate::FrameSets(sets))
    }
}
