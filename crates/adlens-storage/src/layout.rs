//! Cache directory layout.
//!
//! Every entry path is a pure function of the artifact kind and the video
//! key, so a presence check needs nothing but the key.

use std::path::{Path, PathBuf};
use tokio::fs;

use adlens_models::VideoKey;

use crate::error::StorageResult;

/// File name of the raw ads snapshot.
const ADS_SNAPSHOT: &str = "ads.json";

/// Kind of persisted artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Video,
    Frames,
    Transcript,
    TranscriptAnalysis,
    FrameAnalysis,
    FinalAnalysis,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 6] = [
        ArtifactKind::Video,
        ArtifactKind::Frames,
        ArtifactKind::Transcript,
        ArtifactKind::TranscriptAnalysis,
        ArtifactKind::FrameAnalysis,
        ArtifactKind::FinalAnalysis,
    ];

    /// Directory name under the cache root.
    pub fn dir_name(&self) -> &'static str {
        match self {
            ArtifactKind::Video => "videos",
            ArtifactKind::Frames => "frames",
            ArtifactKind::Transcript => "transcriptions",
            ArtifactKind::TranscriptAnalysis => "transcription_analysis",
            ArtifactKind::FrameAnalysis => "frame_analysis",
            ArtifactKind::FinalAnalysis => "ad_analysis",
        }
    }

    /// Entry name for a video key.
    pub fn entry_name(&self, key: &VideoKey) -> String {
        match self {
            ArtifactKind::Video => format!("{}.mp4", key),
            ArtifactKind::Frames => key.to_string(),
            ArtifactKind::Transcript => format!("{}.txt", key),
            ArtifactKind::TranscriptAnalysis | ArtifactKind::FrameAnalysis => {
                format!("{}_analysis.json", key)
            }
            ArtifactKind::FinalAnalysis => format!("{}_final.json", key),
        }
    }
}

/// Layout of the cache root.
#[derive(Debug, Clone)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the raw ads snapshot.
    pub fn ads_snapshot(&self) -> PathBuf {
        self.root.join(ADS_SNAPSHOT)
    }

    /// Directory holding all entries of a kind.
    pub fn dir(&self, kind: ArtifactKind) -> PathBuf {
        self.root.join(kind.dir_name())
    }

    /// Path of the entry for a video key.
    pub fn entry(&self, kind: ArtifactKind, key: &VideoKey) -> PathBuf {
        self.dir(kind).join(kind.entry_name(key))
    }

    /// Create the root and every artifact directory.
    pub async fn ensure_dirs(&self) -> StorageResult<()> {
        for kind in ArtifactKind::ALL {
            fs::create_dir_all(self.dir(kind)).await?;
        }
        Ok(())
    }
}
