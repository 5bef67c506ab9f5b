//! Ad analysis pipeline.
//!
//! This crate provides:
//! - A typed pipeline state with a fixed merge strategy per field
//! - A stage graph engine that runs stages in dependency order
//! - The eight pipeline stages, each cached on disk per video identity
//! - Tolerant recovery of malformed model JSON
//! - Identity join of the transcript and frame branches
//! - Configuration, run logging and metrics

pub mod collaborators;
pub mod config;
pub mod engine;
pub mod error;
pub mod join;
pub mod json_repair;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod prompts;
pub mod stages;

pub use collaborators::{
    AdSource, ByteStream, CompletionModel, HttpTransport, SpeechToText, VideoResolver,
    VideoTransport,
};
pub use config::PipelineConfig;
pub use engine::{
    Batch, CancelHandle, Engine, MergeStrategy, PipelineState, Stage, StageGraph,
    StageGraphBuilder, StateField, StateUpdate, StateView,
};
pub use error::{CollaboratorError, PipelineError, PipelineResult, RunFailure};
pub use logging::RunLogger;
pub use pipeline::{AdPipeline, Collaborators, RunOutput};
