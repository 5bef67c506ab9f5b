//! Frame analysis stage.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use adlens_llm::CompletionRequest;
use adlens_models::{Frame, FrameAnalysis, FrameSet};
use adlens_storage::{read_json, write_json_atomic, ArtifactKind, StorageResult};

use super::{for_each_bounded, lookup_or_claim, names, with_timeout, Cached, StageContext, Tally};
use crate::collaborators::CompletionModel;
use crate::engine::{Stage, StateField, StateUpdate, StateView};
use crate::error::PipelineResult;
use crate::metrics::ItemOutcome;
use crate::prompts;

/// Labels every sampled frame of a video with a vision model.
///
/// Frames whose call fails are left out; a video none of whose frames
/// could be labelled produces nothing and is retried on the next run.
pub struct FrameAnalyzerStage {
    ctx: Arc<StageContext>,
    model: Arc<dyn CompletionModel>,
}

async fn cached_analysis(path: &Path) -> StorageResult<Option<FrameAnalysis>> {
    read_json(path).await
}

impl FrameAnalyzerStage {
    pub fn new(ctx: Arc<StageContext>, model: Arc<dyn CompletionModel>) -> Self {
        Self { ctx, model }
    }

    async fn label(&self, set: &FrameSet, frame: &Frame) -> Option<(String, String)> {
        let request = CompletionRequest {
            image_base64: Some(frame.encoded.clone()),
            max_tokens: Some(50),
            ..CompletionRequest::new(prompts::FRAME_ANALYSIS)
        };

        match with_timeout(self.ctx.config.call_timeout, self.model.complete(request)).await {
            Ok(label) if !label.trim().is_empty() => Some((frame.name.clone(), label.trim().to_string())),
            Ok(_) => {
                warn!(video = %set.video, frame = %frame.name, "Empty frame label");
                None
            }
            Err(e) => {
                warn!(video = %set.video, frame = %frame.name, error = %e, "Frame analysis failed");
                None
            }
        }
    }

    async fn analyze(&self, set: &FrameSet) -> (ItemOutcome, Option<FrameAnalysis>) {
        let key = set.video.clone();
        if set.is_empty() {
            debug!(video = %key, "No frames to analyze");
            return (ItemOutcome::Skipped, None);
        }

        let entry = self.ctx.layout.entry(ArtifactKind::FrameAnalysis, &key);
        let path = entry.as_path();
        let lookup = lookup_or_claim(path, self.ctx.config.stale_claim_after, move || {
            cached_analysis(path)
        })
        .await;

        let _claim = match lookup {
            Ok(Cached::Hit(analysis)) => {
                debug!(video = %key, "Frame analysis already exists");
                return (ItemOutcome::CacheHit, Some(analysis));
            }
            Ok(Cached::Busy) => {
                info!(video = %key, "Frame analysis is being written by another worker, skipping");
                return (ItemOutcome::Skipped, None);
            }
            Ok(Cached::Claimed(claim)) => claim,
            Err(e) => {
                warn!(video = %key, error = %e, "Frame analysis cache lookup failed");
                return (ItemOutcome::Failed, None);
            }
        };

        let labels: BTreeMap<String, String> = for_each_bounded(
            &set.frames,
            self.ctx.config.frame_analysis_concurrency,
            |frame| self.label(set, frame),
        )
        .await
        .into_iter()
        .flatten()
        .collect();

        if labels.is_empty() {
            warn!(video = %key, frames = set.frames.len(), "No frame could be analyzed");
            return (ItemOutcome::Failed, None);
        }

        let analysis = FrameAnalysis {
            video: key.clone(),
            labels,
        };
        if let Err(e) = write_json_atomic(&entry, &analysis).await {
            warn!(video = %key, error = %e, "Failed to persist frame analysis");
            return (ItemOutcome::Failed, None);
        }

        info!(video = %key, labels = analysis.labels.len(), "Analyzed frames");
        (ItemOutcome::Produced, Some(analysis))
    }
}

#[async_trait]
impl Stage for FrameAnalyzerStage {
    fn name(&self) -> &'static str {
        names::FRAME_ANALYZER
    }

    fn reads(&self) -> &'static [StateField] {
        &[StateField::FrameSets]
    }

    fn writes(&self) -> StateField {
        StateField::FrameAnalyses
    }

    async fn run(&self, view: StateView<'_>) -> PipelineResult<StateUpdate> {
        let sets = view.frame_sets()?;

        let results = for_each_bounded(
            sets.items(),
            self.ctx.config.request_concurrency,
            |set| self.analyze(set),
        )
        .await;

        let mut tally = Tally::new(self.name());
        let analyses = tally.collect(results);
        tally.log_summary();

        Ok(StateUpdate::FrameAnalyses(analyses))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::MockCompletionModel;
    use crate::config::PipelineConfig;
    use crate::engine::PipelineState;
    use crate::error::CollaboratorError;
    use adlens_models::VideoId;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn frame_set(id: &str, count: u32) -> FrameSet {
        let video = VideoId::from(id).key();
        FrameSet {
            frames: (1..=count)
                .map(|index| Frame {
                    index,
                    position: u64::from(index - 1) * 10,
                    name: Frame::file_name(index),
                    path: PathBuf::from(Frame::file_name(index)),
                    encoded: format!("img{}", index),
                })
                .collect(),
            video,
            total_frames: 50,
        }
    }

    async fn run(dir: &TempDir, model: MockCompletionModel, sets: Vec<FrameSet>) -> Vec<FrameAnalysis> {
        let ctx = Arc::new(StageContext::new(PipelineConfig::new(dir.path())));
        ctx.layout.ensure_dirs().await.unwrap();
        let stage = FrameAnalyzerStage::new(ctx, Arc::new(model));

        let mut state = PipelineState::new();
        state.apply(StateUpdate::FrameSets(sets));
        match stage
            .run(StateView::new(&state, stage.name(), stage.reads()))
            .await
            .unwrap()
        {
            StateUpdate::FrameAnalyses(analyses) => analyses,
            other => panic!("unexpected update {:?}", other.field()),
        }
    }

    #[tokio::test]
    async fn test_labels_frames_and_omits_failures() {
        let dir = TempDir::new().unwrap();
        let mut model = MockCompletionModel::new();
        model.expect_complete().times(3).returning(|request| {
            match request.image_base64.as_deref() {
                Some("img2") => Err(CollaboratorError::other("rate limited")),
                Some(image) => Ok(format!(" label-{} ", image)),
                None => panic!("frame sent without image"),
            }
        });

        let analyses = run(&dir, model, vec![frame_set("1", 3)]).await;

        assert_eq!(analyses.len(), 1);
        let labels = &analyses[0].labels;
        assert_eq!(labels.len(), 2);
        assert_eq!(labels["frame_1.jpg"], "label-img1");
        assert_eq!(labels["frame_3.jpg"], "label-img3");
        assert!(dir.path().join("frame_analysis/video_1_analysis.json").exists());
    }

    #[tokio::test]
    async fn test_empty_frame_set_is_skipped() {
        let dir = TempDir::new().unwrap();
        let mut model = MockCompletionModel::new();
        model.expect_complete().never();

        let empty = FrameSet::empty(VideoId::from("1").key());
        assert!(run(&dir, model, vec![empty]).await.is_empty());
    }

    #[tokio::test]
    async fn test_all_frames_failing_persists_nothing() {
        let dir = TempDir::new().unwrap();
        let mut model = MockCompletionModel::new();
        model
            .expect_complete()
            .returning(|_| Err(CollaboratorError::other("down")));

        assert!(run(&dir, model, vec![frame_set("1", 2)]).await.is_empty());
        assert!(!dir.path().join("frame_analysis/video_1_analysis.json").exists());
    }

    #[tokio::test]
    async fn test_cached_analysis_skips_model() {
        let dir = TempDir::new().unwrap();
        let cached = FrameAnalysis {
            video: VideoId::from("1").key(),
            labels: BTreeMap::from([("frame_1.jpg".to_string(), "standing".to_string())]),
        };
        let ctx = StageContext::new(PipelineConfig::new(dir.path()));
        ctx.layout.ensure_dirs().await.unwrap();
        write_json_atomic(ctx.layout.entry(ArtifactKind::FrameAnalysis, &cached.video), &cached)
            .await
            .unwrap();

        let mut model = MockCompletionModel::new();
        model.expect_complete().never();

        let analyses = run(&dir, model, vec![frame_set("1", 2)]).await;
        assert_eq!(analyses, vec![cached]);
    }
}
