//! Video models.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::key::VideoKey;

/// Video identifier as assigned by the video host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoId(pub String);

impl VideoId {
    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Identity key derived from this ID.
    pub fn key(&self) -> VideoKey {
        VideoKey::for_video(self)
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for VideoId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VideoId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Download location of a video as reported by the video host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoSource {
    pub source_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permalink_url: Option<String>,
}

/// A resolved video, one per ad with a video creative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoRef {
    /// Ad the video belongs to
    pub ad_id: String,
    pub video_id: VideoId,
    /// Direct download URL
    pub source_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permalink_url: Option<String>,
}

impl VideoRef {
    pub fn key(&self) -> VideoKey {
        self.video_id.key()
    }
}

/// A downloaded video file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalVideo {
    pub video_id: VideoId,
    pub key: VideoKey,
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Speech-to-text output for one video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    pub video: VideoKey,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_ref_key() {
        let video_ref = VideoRef {
            ad_id: "1".to_string(),
            video_id: VideoId::from("906752448323827"),
            source_url: "https://cdn.example.com/v.mp4".to_string(),
            permalink_url: None,
        };

        assert_eq!(video_ref.key().as_str(), "video_906752448323827");
    }

    #[test]
    fn test_video_id_serializes_transparently() {
        let json = serde_json::to_string(&VideoId::from("42")).unwrap();
        assert_eq!(json, "\"42\"");
    }
}
