//! Frame sampling.

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::probe::count_frames;

/// Candidate frame positions for sampling `k` frames from a video with
/// `total` frames.
///
/// stride = max(1, total / k); the walk covers 0, stride, 2*stride, ... up to
/// the end of the video. Callers stop once they hold `k` frames, so a frame
/// that fails to decode is replaced by the next position in the walk.
pub fn stride_positions(total: u64, k: usize) -> impl Iterator<Item = u64> {
    let stride = if k == 0 { 1 } else { (total / k as u64).max(1) };
    let end = if k == 0 { 0 } else { total };
    (0..end).step_by(stride as usize)
}

/// Source of decoded video frames.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Number of decodable frames in the video.
    async fn frame_count(&self, video: &Path) -> MediaResult<u64>;

    /// Write the frame at `position` (zero-based) to `output` as JPEG.
    async fn extract_frame(&self, video: &Path, position: u64, output: &Path) -> MediaResult<()>;
}

/// Frame source backed by the ffmpeg/ffprobe binaries.
#[derive(Debug, Clone)]
pub struct FfmpegFrameSource {
    runner: FfmpegRunner,
    probe_timeout: Duration,
    jpeg_quality: u8,
}

impl Default for FfmpegFrameSource {
    fn default() -> Self {
        Self::new(Duration::from_secs(120))
    }
}

impl FfmpegFrameSource {
    pub fn new(timeout: Duration) -> Self {
        Self {
            runner: FfmpegRunner::new().with_timeout(timeout),
            probe_timeout: timeout,
            jpeg_quality: 2,
        }
    }
}

#[async_trait]
impl FrameSource for FfmpegFrameSource {
    async fn frame_count(&self, video: &Path) -> MediaResult<u64> {
        count_frames(video, self.probe_timeout).await
    }

    async fn extract_frame(&self, video: &Path, position: u64, output: &Path) -> MediaResult<()> {
        let cmd = FfmpegCommand::new(video, output)
            .video_filter(format!("select=eq(n\\,{})", position))
            .output_args(["-vsync", "0"])
            .single_frame()
            .jpeg_quality(self.jpeg_quality);

        self.runner.run(&cmd).await?;

        // select= past the last decodable frame exits 0 without output
        match tokio::fs::metadata(output).await {
            Ok(meta) if meta.len() > 0 => Ok(()),
            _ => Err(MediaError::InvalidVideo(format!(
                "no frame decoded at position {}",
                position
            ))),
        }
    }
}
