#![deny(unreachable_patterns)]
//! FFmpeg CLI wrapper for video frame sampling.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building
//! - Bounded-time FFmpeg/FFprobe execution
//! - Frame counting and single-frame extraction
//! - Deterministic evenly spaced sampling positions

pub mod command;
pub mod error;
pub mod frames;
pub mod probe;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use frames::{stride_positions, FfmpegFrameSource, FrameSource};
pub use probe::count_frames;
