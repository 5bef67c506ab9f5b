//! Sampled frame models.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::key::VideoKey;

/// One sampled frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// 1-based index within the frame set
    pub index: u32,
    /// Zero-based frame position in the source video
    pub position: u64,
    /// File name (`frame_{index}.jpg`)
    pub name: String,
    /// Persisted location
    pub path: PathBuf,
    /// Base64 of the JPEG bytes
    #[serde(skip)]
    pub encoded: String,
}

impl Frame {
    /// File name for the frame at a 1-based index.
    pub fn file_name(index: u32) -> String {
        format!("frame_{}.jpg", index)
    }
}

/// Evenly spaced frames sampled from one video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSet {
    pub video: VideoKey,
    /// Frame count of the source video
    pub total_frames: u64,
    pub frames: Vec<Frame>,
}

impl FrameSet {
    /// Frame set of a video with no decodable frames.
    pub fn empty(video: VideoKey) -> Self {
        Self {
            video,
            total_frames: 0,
            frames: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Sampled positions in order.
    pub fn positions(&self) -> Vec<u64> {
        self.frames.iter().map(|f| f.position).collect()
    }

    /// Manifest persisted next to the frame files.
    pub fn manifest(&self) -> FrameManifest {
        FrameManifest {
            video: self.video.clone(),
            total_frames: self.total_frames,
            frames: self
                .frames
                .iter()
                .map(|f| FrameManifestEntry {
                    index: f.index,
                    position: f.position,
                    name: f.name.clone(),
                })
                .collect(),
        }
    }
}

/// On-disk description of a committed frame directory (`frames.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameManifest {
    pub video: VideoKey,
    pub total_frames: u64,
    pub frames: Vec<FrameManifestEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameManifestEntry {
    pub index: u32,
    pub position: u64,
    pub name: String,
}
