//! Shared data models for the AdLens ad analysis pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Ad records as returned by the ads API
//! - Resolved and downloaded videos
//! - Video identity keys used to correlate artifacts across stages
//! - Transcripts, sampled frames and the per-video analyses

pub mod ad;
pub mod analysis;
pub mod frames;
pub mod key;
pub mod video;

// Re-export common types
pub use ad::{Ad, Creative, ObjectStorySpec, VideoData};
pub use analysis::{AdAnalysisResult, FinalAnalysis, FrameAnalysis, TranscriptAnalysis};
pub use frames::{Frame, FrameManifest, FrameManifestEntry, FrameSet};
pub use key::VideoKey;
pub use video::{LocalVideo, Transcript, VideoId, VideoRef, VideoSource};
