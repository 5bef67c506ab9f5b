//! End-to-end runs over fake collaborators and a temporary cache.

mod common;

use std::collections::HashMap;
use std::sync::atomic::Ordering;

use adlens_models::{Ad, VideoId};
use adlens_pipeline::{AdPipeline, PipelineConfig, PipelineError, StateField};
use tempfile::TempDir;

use common::{calls, FakeAds, FakeFrames, FakeTransport, Fakes};

fn pipeline(dir: &TempDir, fakes: &Fakes) -> AdPipeline {
    AdPipeline::new(PipelineConfig::new(dir.path()), fakes.collaborators()).unwrap()
}

#[tokio::test]
async fn test_mixed_ads_yield_one_result() {
    let dir = TempDir::new().unwrap();
    let ads = vec![
        Ad::new("ad_image"),
        Ad::new("ad_broken").with_video("222"),
        Ad::new("ad_ok").with_video("333"),
    ];
    let transport = FakeTransport {
        broken: vec!["222".to_string()],
        ..Default::default()
    };
    let fakes = Fakes::new(FakeAds::new(ads), transport, FakeFrames::default());

    let output = pipeline(&dir, &fakes).run().await.unwrap();

    assert_eq!(output.results.len(), 1);
    let result = &output.results[0];
    assert_eq!(result.video, VideoId::from("333").key());
    assert_eq!(result.analysis.tone, "confident");
    assert_eq!(result.analysis.power_phrases, vec!["aaj hi order karein"]);

    assert_eq!(output.state.video_refs().len(), 2);
    assert_eq!(output.state.local_videos().len(), 1);
    assert_eq!(output.state.frame_sets()[0].frames.len(), 5);

    let root = dir.path();
    assert!(root.join("ads.json").exists());
    assert!(root.join("videos/video_333.mp4").exists());
    assert!(!root.join("videos/video_222.mp4").exists());
    assert!(root.join("frames/video_333/frame_5.jpg").exists());
    assert!(root.join("transcriptions/video_333.txt").exists());
    assert!(root.join("transcription_analysis/video_333_analysis.json").exists());
    assert!(root.join("frame_analysis/video_333_analysis.json").exists());
    assert!(root.join("ad_analysis/video_333_final.json").exists());
}

#[tokio::test]
async fn test_second_run_is_served_from_cache() {
    let dir = TempDir::new().unwrap();
    let ads = vec![
        Ad::new("ad_1").with_video("111"),
        Ad::new("ad_2").with_video("333"),
    ];
    let fakes = Fakes::new(FakeAds::new(ads.clone()), FakeTransport::default(), FakeFrames::default());
    let first = pipeline(&dir, &fakes).run().await.unwrap();
    assert_eq!(first.results.len(), 2);

    let rerun = Fakes::new(FakeAds::new(ads), FakeTransport::default(), FakeFrames::default());
    let second = pipeline(&dir, &rerun).run().await.unwrap();

    assert_eq!(second.results, first.results);
    assert_ne!(second.run_id, first.run_id);
    assert_eq!(calls(&rerun.transport.calls), 0);
    assert_eq!(calls(&rerun.speech.calls), 0);
    assert_eq!(calls(&rerun.frames.calls), 0);
    assert_eq!(calls(&rerun.model.calls), 0);
}

#[tokio::test]
async fn test_ad_source_failure_aborts_run() {
    let dir = TempDir::new().unwrap();
    let ads = FakeAds::new(vec![Ad::new("ad_1").with_video("111")]);
    ads.fail.store(true, Ordering::SeqCst);
    let fakes = Fakes::new(ads, FakeTransport::default(), FakeFrames::default());

    let failure = pipeline(&dir, &fakes).run().await.unwrap_err();

    assert_eq!(failure.stage.as_deref(), Some("ad_source"));
    assert!(matches!(failure.error, PipelineError::UpstreamUnavailable(_)));
    assert!(!failure.partial_state.is_populated(StateField::Ads));
    assert_eq!(calls(&fakes.resolver.calls), 0);
    assert_eq!(calls(&fakes.transport.calls), 0);
}

#[tokio::test]
async fn test_video_without_frames_is_not_synthesized() {
    let dir = TempDir::new().unwrap();
    let frames = FakeFrames {
        totals: HashMap::from([("video_111.mp4".to_string(), 0)]),
        ..Default::default()
    };
    let fakes = Fakes::new(
        FakeAds::new(vec![Ad::new("ad_1").with_video("111")]),
        FakeTransport::default(),
        frames,
    );

    let output = pipeline(&dir, &fakes).run().await.unwrap();

    assert!(output.results.is_empty());
    assert_eq!(output.state.final_analyses(), Some(&[][..]));
    assert_eq!(output.state.transcript_analyses().len(), 1);
    assert!(output.state.frame_analyses().is_empty());
    assert!(!dir.path().join("frame_analysis/video_111_analysis.json").exists());
}

#[tokio::test]
async fn test_no_video_ads_produce_empty_output() {
    let dir = TempDir::new().unwrap();
    let fakes = Fakes::new(
        FakeAds::new(vec![Ad::new("ad_1"), Ad::new("ad_2")]),
        FakeTransport::default(),
        FakeFrames::default(),
    );

    let output = pipeline(&dir, &fakes).run().await.unwrap();

    assert!(output.results.is_empty());
    assert_eq!(calls(&fakes.resolver.calls), 0);
    assert_eq!(calls(&fakes.model.calls), 0);
}
