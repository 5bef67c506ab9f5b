//! Final synthesis stage.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use adlens_llm::CompletionRequest;
use adlens_models::{AdAnalysisResult, FinalAnalysis, TranscriptAnalysis};
use adlens_storage::{read_json, write_json_atomic, ArtifactKind, StorageResult};

use super::{for_each_bounded, lookup_or_claim, names, with_timeout, Cached, StageContext, Tally};
use crate::collaborators::CompletionModel;
use crate::engine::{Stage, StateField, StateUpdate, StateView};
use crate::error::PipelineResult;
use crate::join::{join_by_identity, Matched};
use crate::json_repair::parse_lenient;
use crate::metrics::ItemOutcome;
use crate::prompts;

/// Combines both analysis branches into one structured result per video.
///
/// Only videos present on both branches are synthesized. This is the sink
/// stage: its output replaces the terminal field, even when empty.
pub struct SynthesizerStage {
    ctx: Arc<StageContext>,
    model: Arc<dyn CompletionModel>,
}

async fn cached_result(path: &Path) -> StorageResult<Option<AdAnalysisResult>> {
    read_json(path).await
}

fn transcript_summary(analysis: &TranscriptAnalysis) -> String {
    if analysis.techniques.is_empty() {
        analysis.raw.clone()
    } else {
        analysis.techniques.join("\n")
    }
}

impl SynthesizerStage {
    pub fn new(ctx: Arc<StageContext>, model: Arc<dyn CompletionModel>) -> Self {
        Self { ctx, model }
    }

    async fn synthesize(&self, pair: Matched<'_>) -> (ItemOutcome, Option<AdAnalysisResult>) {
        let Matched {
            key,
            transcript,
            frames,
        } = pair;
        let entry = self.ctx.layout.entry(ArtifactKind::FinalAnalysis, &key);

        let path = entry.as_path();
        let lookup = lookup_or_claim(path, self.ctx.config.stale_claim_after, move || {
            cached_result(path)
        })
        .await;

        let _claim = match lookup {
            Ok(Cached::Hit(result)) => {
                debug!(video = %key, "Final analysis already exists");
                return (ItemOutcome::CacheHit, Some(result));
            }
            Ok(Cached::Busy) => {
                info!(video = %key, "Final analysis is being written by another worker, skipping");
                return (ItemOutcome::Skipped, None);
            }
            Ok(Cached::Claimed(claim)) => claim,
            Err(e) => {
                warn!(video = %key, error = %e, "Final analysis cache lookup failed");
                return (ItemOutcome::Failed, None);
            }
        };

        let prompt = prompts::synthesis(&transcript_summary(transcript), &frames.visual_summary());
        let request = CompletionRequest {
            max_tokens: Some(300),
            ..CompletionRequest::new(prompt)
        };
        let raw = match with_timeout(self.ctx.config.call_timeout, self.model.complete(request)).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(video = %key, error = %e, "Synthesis failed");
                return (ItemOutcome::Failed, None);
            }
        };

        let analysis: FinalAnalysis = match parse_lenient(&raw) {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!(video = %key, error = %e, raw = %raw, "Synthesis output is not a valid analysis");
                return (ItemOutcome::Failed, None);
            }
        };

        let result = AdAnalysisResult {
            video: key.clone(),
            analysis,
            analyzed_at: Utc::now(),
        };
        if let Err(e) = write_json_atomic(&entry, &result).await {
            warn!(video = %key, error = %e, "Failed to persist final analysis");
            return (ItemOutcome::Failed, None);
        }

        info!(video = %key, tone = %result.analysis.tone, "Synthesized ad analysis");
        (ItemOutcome::Produced, Some(result))
    }
}

#[async_trait]
impl Stage for SynthesizerStage {
    fn name(&self) -> &'static str {
        names::SYNTHESIZER
    }

    fn reads(&self) -> &'static [StateField] {
        &[StateField::TranscriptAnalyses, StateField::FrameAnalyses]
    }

    fn writes(&self) -> StateField {
        StateField::FinalAnalyses
    }

    async fn run(&self, view: StateView<'_>) -> PipelineResult<StateUpdate> {
        let transcripts = view.transcript_analyses()?;
        let frames = view.frame_analyses()?;

        let joined = join_by_identity(transcripts.items(), frames.items());
        for key in &joined.transcript_only {
            info!(video = %key, "No frame analysis for video, not synthesized");
        }
        for key in &joined.frames_only {
            info!(video = %key, "No transcript analysis for video, not synthesized");
        }

        let results = for_each_bounded(
            joined.matched,
            self.ctx.config.request_concurrency,
            |pair| self.synthesize(pair),
        )
        .await;

        let mut tally = Tally::new(self.name());
        let results = tally.collect(results);
        tally.log_summary();

        Ok(StateUpdate::FinalAnalyses(results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::MockCompletionModel;
    use crate::config::PipelineConfig;
    use crate::engine::PipelineState;
    use adlens_models::{FrameAnalysis, VideoId, VideoKey};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    const ANSWER: &str = "```json\n{\"hook\": \"Paise wapas guarantee\", \"tone\": \"confident\", \
        \"power_phrases\": [\"aaj hi\", \"paise wapas\",], \"visual\": \"standing with product\"\n```";

    fn transcript(id: &str) -> TranscriptAnalysis {
        TranscriptAnalysis {
            video: VideoId::from(id).key(),
            techniques: vec!["risk reversal".to_string(), "urgency".to_string()],
            raw: String::new(),
        }
    }

    fn frames(id: &str) -> FrameAnalysis {
        FrameAnalysis {
            video: VideoId::from(id).key(),
            labels: BTreeMap::from([
                ("frame_2.jpg".to_string(), "outdoors".to_string()),
                ("frame_1.jpg".to_string(), "standing".to_string()),
            ]),
        }
    }

    async fn run(
        dir: &TempDir,
        model: MockCompletionModel,
        transcripts: Vec<TranscriptAnalysis>,
        frame_analyses: Vec<FrameAnalysis>,
    ) -> Vec<AdAnalysisResult> {
        let ctx = Arc::new(StageContext::new(PipelineConfig::new(dir.path())));
        ctx.layout.ensure_dirs().await.unwrap();
        let stage = SynthesizerStage::new(ctx, Arc::new(model));

        let mut state = PipelineState::new();
        state.apply(StateUpdate::TranscriptAnalyses(transcripts));
        state.apply(StateUpdate::FrameAnalyses(frame_analyses));
        match stage
            .run(StateView::new(&state, stage.name(), stage.reads()))
            .await
            .unwrap()
        {
            StateUpdate::FinalAnalyses(results) => results,
            other => panic!("unexpected update {:?}", other.field()),
        }
    }

    #[tokio::test]
    async fn test_synthesizes_matched_videos_only() {
        let dir = TempDir::new().unwrap();
        let mut model = MockCompletionModel::new();
        model.expect_complete().times(1).returning(|request| {
            assert!(request.prompt.contains("risk reversal\nurgency"));
            assert!(request.prompt.contains("standing\noutdoors"));
            assert_eq!(request.max_tokens, Some(300));
            Ok(ANSWER.to_string())
        });

        let results = run(
            &dir,
            model,
            vec![transcript("1"), transcript("2")],
            vec![frames("1"), frames("3")],
        )
        .await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].video, VideoId::from("1").key());
        assert_eq!(results[0].analysis.tone, "confident");
        assert_eq!(results[0].analysis.power_phrases, vec!["aaj hi", "paise wapas"]);
        assert!(dir.path().join("ad_analysis/video_1_final.json").exists());
    }

    #[tokio::test]
    async fn test_join_ignores_position() {
        let dir = TempDir::new().unwrap();
        let mut model = MockCompletionModel::new();
        model
            .expect_complete()
            .times(2)
            .returning(|_| Ok(ANSWER.to_string()));

        let results = run(
            &dir,
            model,
            vec![transcript("1"), transcript("2")],
            vec![frames("2"), frames("1")],
        )
        .await;

        let videos: Vec<_> = results.iter().map(|r| r.video.to_string()).collect();
        assert_eq!(videos, vec!["video_1", "video_2"]);
    }

    #[tokio::test]
    async fn test_malformed_output_is_not_persisted() {
        let dir = TempDir::new().unwrap();
        let mut model = MockCompletionModel::new();
        model
            .expect_complete()
            .returning(|_| Ok("The hook is strong and the tone is confident.".to_string()));

        let results = run(&dir, model, vec![transcript("1")], vec![frames("1")]).await;

        assert!(results.is_empty());
        assert!(!dir.path().join("ad_analysis/video_1_final.json").exists());
    }

    #[tokio::test]
    async fn test_cached_result_is_reused() {
        let dir = TempDir::new().unwrap();
        let mut model = MockCompletionModel::new();
        model
            .expect_complete()
            .times(1)
            .returning(|_| Ok(ANSWER.to_string()));

        let ctx = Arc::new(StageContext::new(PipelineConfig::new(dir.path())));
        ctx.layout.ensure_dirs().await.unwrap();
        let stage = SynthesizerStage::new(ctx, Arc::new(model));

        let mut state = PipelineState::new();
        state.apply(StateUpdate::TranscriptAnalyses(vec![transcript("1")]));
        state.apply(StateUpdate::FrameAnalyses(vec![frames("1")]));

        let mut outputs = Vec::new();
        for _ in 0..2 {
            match stage
                .run(StateView::new(&state, stage.name(), stage.reads()))
                .await
                .unwrap()
            {
                StateUpdate::FinalAnalyses(results) => outputs.push(results),
                other => panic!("unexpected update {:?}", other.field()),
            }
        }
        assert_eq!(outputs[0], outputs[1]);
    }

    #[tokio::test]
    async fn test_result_is_keyed_by_canonical_video() {
        let dir = TempDir::new().unwrap();
        let mut model = MockCompletionModel::new();
        model
            .expect_complete()
            .times(1)
            .returning(|_| Ok(ANSWER.to_string()));

        let suffixed: VideoKey =
            serde_json::from_value(serde_json::Value::String("video_1_analysis".to_string()))
                .unwrap();
        let mut analysis = transcript("1");
        analysis.video = suffixed;

        let results = run(&dir, model, vec![analysis], vec![frames("1")]).await;

        assert_eq!(results[0].video, VideoId::from("1").key());
        assert!(dir.path().join("ad_analysis/video_1_final.json").exists());
        assert!(!dir.path().join("ad_analysis/video_1_analysis_final.json").exists());
    }

    #[tokio::test]
    async fn test_no_matches_gives_empty_output() {
        let dir = TempDir::new().unwrap();
        let mut model = MockCompletionModel::new();
        model.expect_complete().never();

        assert!(run(&dir, model, vec![], vec![frames("1")]).await.is_empty());
    }
}
