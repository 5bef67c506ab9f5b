//! Pipeline state and its merge rules.
//!
//! The state is only ever mutated by the engine applying a completed
//! stage's [`StateUpdate`]. How an update combines with the existing value
//! is a property of the field ([`StateField::merge_strategy`]), never a
//! choice of the stage that produced it.

use serde::Serialize;
use std::fmt;

use adlens_models::{
    Ad, AdAnalysisResult, FrameAnalysis, FrameSet, LocalVideo, Transcript, TranscriptAnalysis,
    VideoRef,
};

use crate::error::{PipelineError, PipelineResult};

/// How an update combines with the current value of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Append in arrival order, no de-duplication
    Accumulate,
    /// Overwrite the current value
    Replace,
}

/// Fields of [`PipelineState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateField {
    Ads,
    VideoRefs,
    LocalVideos,
    Transcripts,
    FrameSets,
    TranscriptAnalyses,
    FrameAnalyses,
    FinalAnalyses,
}

impl StateField {
    pub const ALL: [StateField; 8] = [
        StateField::Ads,
        StateField::VideoRefs,
        StateField::LocalVideos,
        StateField::Transcripts,
        StateField::FrameSets,
        StateField::TranscriptAnalyses,
        StateField::FrameAnalyses,
        StateField::FinalAnalyses,
    ];

    pub fn merge_strategy(self) -> MergeStrategy {
        match self {
            StateField::FinalAnalyses => MergeStrategy::Replace,
            _ => MergeStrategy::Accumulate,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            StateField::Ads => "ads",
            StateField::VideoRefs => "video_refs",
            StateField::LocalVideos => "local_videos",
            StateField::Transcripts => "transcripts",
            StateField::FrameSets => "frame_sets",
            StateField::TranscriptAnalyses => "transcript_analyses",
            StateField::FrameAnalyses => "frame_analyses",
            StateField::FinalAnalyses => "final_analyses",
        }
    }
}

impl fmt::Display for StateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Partial output of one stage: a value for exactly one field.
#[derive(Debug, Clone)]
pub enum StateUpdate {
    Ads(Vec<Ad>),
    VideoRefs(Vec<VideoRef>),
    LocalVideos(Vec<LocalVideo>),
    Transcripts(Vec<Transcript>),
    FrameSets(Vec<FrameSet>),
    TranscriptAnalyses(Vec<TranscriptAnalysis>),
    FrameAnalyses(Vec<FrameAnalysis>),
    FinalAnalyses(Vec<AdAnalysisResult>),
}

impl StateUpdate {
    pub fn field(&self) -> StateField {
        match self {
            StateUpdate::Ads(_) => StateField::Ads,
            StateUpdate::VideoRefs(_) => StateField::VideoRefs,
            StateUpdate::LocalVideos(_) => StateField::LocalVideos,
            StateUpdate::Transcripts(_) => StateField::Transcripts,
            StateUpdate::FrameSets(_) => StateField::FrameSets,
            StateUpdate::TranscriptAnalyses(_) => StateField::TranscriptAnalyses,
            StateUpdate::FrameAnalyses(_) => StateField::FrameAnalyses,
            StateUpdate::FinalAnalyses(_) => StateField::FinalAnalyses,
        }
    }

    /// Number of items carried.
    pub fn len(&self) -> usize {
        match self {
            StateUpdate::Ads(v) => v.len(),
            StateUpdate::VideoRefs(v) => v.len(),
            StateUpdate::LocalVideos(v) => v.len(),
            StateUpdate::Transcripts(v) => v.len(),
            StateUpdate::FrameSets(v) => v.len(),
            StateUpdate::TranscriptAnalyses(v) => v.len(),
            StateUpdate::FrameAnalyses(v) => v.len(),
            StateUpdate::FinalAnalyses(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Accumulating record threaded through a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineState {
    ads: Vec<Ad>,
    video_refs: Vec<VideoRef>,
    local_videos: Vec<LocalVideo>,
    transcripts: Vec<Transcript>,
    frame_sets: Vec<FrameSet>,
    transcript_analyses: Vec<TranscriptAnalysis>,
    frame_analyses: Vec<FrameAnalysis>,
    /// `None` until the sink stage has run
    final_analyses: Option<Vec<AdAnalysisResult>>,
}

fn merge<T>(slot: &mut Vec<T>, incoming: Vec<T>, strategy: MergeStrategy) {
    match strategy {
        MergeStrategy::Accumulate => slot.extend(incoming),
        MergeStrategy::Replace => *slot = incoming,
    }
}

fn merge_terminal<T>(slot: &mut Option<Vec<T>>, incoming: Vec<T>, strategy: MergeStrategy) {
    match strategy {
        MergeStrategy::Accumulate => slot.get_or_insert_with(Vec::new).extend(incoming),
        MergeStrategy::Replace => *slot = Some(incoming),
    }
}

impl PipelineState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge an update into its field.
    pub(crate) fn apply(&mut self, update: StateUpdate) {
        let strategy = update.field().merge_strategy();
        match update {
            StateUpdate::Ads(v) => merge(&mut self.ads, v, strategy),
            StateUpdate::VideoRefs(v) => merge(&mut self.video_refs, v, strategy),
            StateUpdate::LocalVideos(v) => merge(&mut self.local_videos, v, strategy),
            StateUpdate::Transcripts(v) => merge(&mut self.transcripts, v, strategy),
            StateUpdate::FrameSets(v) => merge(&mut self.frame_sets, v, strategy),
            StateUpdate::TranscriptAnalyses(v) => merge(&mut self.transcript_analyses, v, strategy),
            StateUpdate::FrameAnalyses(v) => merge(&mut self.frame_analyses, v, strategy),
            StateUpdate::FinalAnalyses(v) => merge_terminal(&mut self.final_analyses, v, strategy),
        }
    }

    pub fn ads(&self) -> &[Ad] {
        &self.ads
    }

    pub fn video_refs(&self) -> &[VideoRef] {
        &self.video_refs
    }

    pub fn local_videos(&self) -> &[LocalVideo] {
        &self.local_videos
    }

    pub fn transcripts(&self) -> &[Transcript] {
        &self.transcripts
    }

    pub fn frame_sets(&self) -> &[FrameSet] {
        &self.frame_sets
    }

    pub fn transcript_analyses(&self) -> &[TranscriptAnalysis] {
        &self.transcript_analyses
    }

    pub fn frame_analyses(&self) -> &[FrameAnalysis] {
        &self.frame_analyses
    }

    /// Terminal output; `None` until the sink stage has run.
    pub fn final_analyses(&self) -> Option<&[AdAnalysisResult]> {
        self.final_analyses.as_deref()
    }

    /// Whether the field holds a value. List fields count as populated once
    /// non-empty; the terminal field once written, even if empty.
    pub fn is_populated(&self, field: StateField) -> bool {
        match field {
            StateField::Ads => !self.ads.is_empty(),
            StateField::VideoRefs => !self.video_refs.is_empty(),
            StateField::LocalVideos => !self.local_videos.is_empty(),
            StateField::Transcripts => !self.transcripts.is_empty(),
            StateField::FrameSets => !self.frame_sets.is_empty(),
            StateField::TranscriptAnalyses => !self.transcript_analyses.is_empty(),
            StateField::FrameAnalyses => !self.frame_analyses.is_empty(),
            StateField::FinalAnalyses => self.final_analyses.is_some(),
        }
    }

    pub fn into_final_analyses(self) -> Option<Vec<AdAnalysisResult>> {
        self.final_analyses
    }
}

/// Input batch of a stage. Absence of upstream items is a typed variant,
/// never a missing key.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Batch<'a, T> {
    Empty,
    Items(&'a [T]),
}

impl<'a, T> Batch<'a, T> {
    pub fn from_slice(items: &'a [T]) -> Self {
        if items.is_empty() {
            Batch::Empty
        } else {
            Batch::Items(items)
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Batch::Empty)
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn items(&self) -> &'a [T] {
        match *self {
            Batch::Empty => &[],
            Batch::Items(items) => items,
        }
    }
}

/// Read-only view of the state restricted to a stage's declared reads.
#[derive(Debug, Clone, Copy)]
pub struct StateView<'a> {
    state: &'a PipelineState,
    stage: &'a str,
    reads: &'a [StateField],
}

impl<'a> StateView<'a> {
    pub fn new(state: &'a PipelineState, stage: &'a str, reads: &'a [StateField]) -> Self {
        Self {
            state,
            stage,
            reads,
        }
    }

    fn check(&self, field: StateField) -> PipelineResult<()> {
        if self.reads.contains(&field) {
            Ok(())
        } else {
            Err(PipelineError::UndeclaredRead {
                stage: self.stage.to_string(),
                field,
            })
        }
    }

    pub fn ads(&self) -> PipelineResult<Batch<'a, Ad>> {
        self.check(StateField::Ads)?;
        Ok(Batch::from_slice(&self.state.ads))
    }

    pub fn video_refs(&self) -> PipelineResult<Batch<'a, VideoRef>> {
        self.check(StateField::VideoRefs)?;
        Ok(Batch::from_slice(&self.state.video_refs))
    }

    pub fn local_videos(&self) -> PipelineResult<Batch<'a, LocalVideo>> {
        self.check(StateField::LocalVideos)?;
        Ok(Batch::from_slice(&self.state.local_videos))
    }

    pub fn transcripts(&self) -> PipelineResult<Batch<'a, Transcript>> {
        self.check(StateField::Transcripts)?;
        Ok(Batch::from_slice(&self.state.transcripts))
    }

    pub fn frame_sets(&self) -> PipelineResult<Batch<'a, FrameSet>> {
        self.check(StateField::FrameSets)?;
        Ok(Batch::from_slice(&self.state.frame_sets))
    }

    pub fn transcript_analyses(&self) -> PipelineResult<Batch<'a, TranscriptAnalysis>> {
        self.check(StateField::TranscriptAnalyses)?;
        Ok(Batch::from_slice(&self.state.transcript_analyses))
    }

    pub fn frame_analyses(&self) -> PipelineResult<Batch<'a, FrameAnalysis>> {
        self.check(StateField::FrameAnalyses)?;
        Ok(Batch::from_slice(&self.state.frame_analyses))
    }
}
