//! FFprobe frame counting.

use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::command::check_ffprobe;
use crate::error::{MediaError, MediaResult};

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    nb_frames: Option<String>,
    nb_read_packets: Option<String>,
}

impl FfprobeStream {
    fn frame_count(&self) -> Option<u64> {
        parse_count(self.nb_frames.as_deref()).or_else(|| parse_count(self.nb_read_packets.as_deref()))
    }
}

fn parse_count(value: Option<&str>) -> Option<u64> {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|n| *n > 0)
}

/// Count the frames of the first video stream.
///
/// Uses the container's `nb_frames` when present, otherwise counts packets.
/// A file without a video stream has zero frames.
pub async fn count_frames(path: impl AsRef<Path>, timeout: Duration) -> MediaResult<u64> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    check_ffprobe()?;

    let header = run_ffprobe(path, &["-show_entries", "stream=codec_type,nb_frames"], timeout).await?;
    let Some(stream) = first_video_stream(&header) else {
        debug!(path = %path.display(), "No video stream");
        return Ok(0);
    };
    if let Some(n) = stream.frame_count() {
        return Ok(n);
    }

    // Containers without a frame count in the header (webm, some mp4 muxers)
    let counted = run_ffprobe(
        path,
        &["-count_packets", "-show_entries", "stream=codec_type,nb_read_packets"],
        timeout,
    )
    .await?;

    Ok(first_video_stream(&counted)
        .and_then(FfprobeStream::frame_count)
        .unwrap_or(0))
}

fn first_video_stream(output: &FfprobeOutput) -> Option<&FfprobeStream> {
    output
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
}

async fn run_ffprobe(path: &Path, entries: &[&str], timeout: Duration) -> MediaResult<FfprobeOutput> {
    let child = Command::new("ffprobe")
        .args(["-v", "error", "-select_streams", "v:0", "-print_format", "json"])
        .args(entries)
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(timeout, child)
        .await
        .map_err(|_| MediaError::Timeout(timeout.as_secs()))??;

    if !output.status.success() {
        return Err(MediaError::ffprobe_failed(
            "FFprobe failed",
            Some(String::from_utf8_lossy(&output.stderr).to_string()),
        ));
    }

    Ok(serde_json::from_slice(&output.stdout)?)
}
