//! The ad analysis pipeline: eight stages wired into one graph.

use std::sync::Arc;

use tracing::Instrument;

use adlens_media::FrameSource;
use adlens_models::AdAnalysisResult;

use crate::collaborators::{AdSource, CompletionModel, SpeechToText, VideoResolver, VideoTransport};
use crate::config::PipelineConfig;
use crate::engine::{CancelHandle, Engine, PipelineState, StageGraph};
use crate::error::{PipelineError, PipelineResult, RunFailure};
use crate::logging::RunLogger;
use crate::metrics::record_run;
use crate::stages::{
    names, AdSourceStage, FrameAnalyzerStage, FrameSamplerStage, StageContext, SynthesizerStage,
    TranscriberStage, TranscriptAnalyzerStage, VideoFetcherStage, VideoResolverStage,
};

/// External services the stages call.
#[derive(Clone)]
pub struct Collaborators {
    pub ads: Arc<dyn AdSource>,
    pub resolver: Arc<dyn VideoResolver>,
    pub transport: Arc<dyn VideoTransport>,
    pub speech: Arc<dyn SpeechToText>,
    pub frames: Arc<dyn FrameSource>,
    pub model: Arc<dyn CompletionModel>,
}

/// Result of a completed run.
#[derive(Debug)]
pub struct RunOutput {
    pub run_id: String,
    /// Terminal output, in transcript order
    pub results: Vec<AdAnalysisResult>,
    /// Full state at the end of the run
    pub state: PipelineState,
}

/// Builds the stage graph for the ad analysis workflow.
fn build_graph(ctx: Arc<StageContext>, c: &Collaborators) -> PipelineResult<StageGraph> {
    StageGraph::builder()
        .stage(AdSourceStage::new(ctx.clone(), c.ads.clone()))
        .stage(VideoResolverStage::new(ctx.clone(), c.resolver.clone()))
        .stage(VideoFetcherStage::new(ctx.clone(), c.transport.clone()))
        .stage(TranscriberStage::new(ctx.clone(), c.speech.clone()))
        .stage(FrameSamplerStage::new(ctx.clone(), c.frames.clone()))
        .stage(TranscriptAnalyzerStage::new(ctx.clone(), c.model.clone()))
        .stage(FrameAnalyzerStage::new(ctx.clone(), c.model.clone()))
        .stage(SynthesizerStage::new(ctx, c.model.clone()))
        .edge(names::AD_SOURCE, names::VIDEO_RESOLVER)
        .edge(names::VIDEO_RESOLVER, names::VIDEO_FETCHER)
        .edge(names::VIDEO_FETCHER, names::TRANSCRIBER)
        .edge(names::VIDEO_FETCHER, names::FRAME_SAMPLER)
        .edge(names::TRANSCRIBER, names::TRANSCRIPT_ANALYZER)
        .edge(names::FRAME_SAMPLER, names::FRAME_ANALYZER)
        .edge(names::TRANSCRIPT_ANALYZER, names::SYNTHESIZER)
        .edge(names::FRAME_ANALYZER, names::SYNTHESIZER)
        .build()
}

/// Runs the full workflow against one cache directory.
pub struct AdPipeline {
    ctx: Arc<StageContext>,
    engine: Engine,
}

impl AdPipeline {
    pub fn new(config: PipelineConfig, collaborators: Collaborators) -> PipelineResult<Self> {
        let ctx = Arc::new(StageContext::new(config.checked()?));
        let graph = build_graph(ctx.clone(), &collaborators)?;
        Ok(Self {
            ctx,
            engine: Engine::new(graph),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.ctx.config
    }

    /// Stage names, wave by wave.
    pub fn schedule(&self) -> Vec<Vec<&'static str>> {
        self.engine.graph().schedule()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.engine.cancel_handle()
    }

    /// Run every stage once from an empty state.
    pub async fn run(&self) -> Result<RunOutput, RunFailure> {
        let logger = RunLogger::new("ad_analysis");
        let span = logger.span();
        self.run_with(logger).instrument(span).await
    }

    async fn run_with(&self, logger: RunLogger) -> Result<RunOutput, RunFailure> {
        logger.started(self.ctx.layout.root());

        if let Err(e) = self.ctx.layout.ensure_dirs().await {
            logger.cache_unusable(&e);
            record_run(false);
            return Err(RunFailure {
                stage: None,
                error: PipelineError::from(e),
                partial_state: PipelineState::new(),
            });
        }

        match self.engine.run(PipelineState::new(), &logger).await {
            Ok(state) => {
                let results = state.final_analyses().map(<[_]>::to_vec).unwrap_or_default();
                logger.completed(results.len());
                record_run(true);
                Ok(RunOutput {
                    run_id: logger.run_id().to_string(),
                    results,
                    state,
                })
            }
            Err(failure) => {
                record_run(false);
                Err(failure)
            }
        }
    }
}
