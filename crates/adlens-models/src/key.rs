//! Video identity keys.
//!
//! Every artifact the pipeline persists is named after the identity of the
//! video it was derived from. Stages running on independent branches
//! correlate their outputs through this key, never through list position.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;

use crate::video::VideoId;

/// Prefix of every video key (`video_{id}`).
pub const KEY_PREFIX: &str = "video_";

/// Suffixes appended by the pipeline to artifact names.
const PIPELINE_SUFFIXES: &[&str] = &["_analysis", "_final"];

/// Length of the hash tag appended to keys of IDs that needed sanitizing.
const HASH_TAG_LEN: usize = 12;

/// Canonical identity of a video across all stages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoKey(String);

impl VideoKey {
    /// Derive the key for a video ID.
    ///
    /// Stable across runs: the same ID always yields the same key. Characters
    /// outside `[A-Za-z0-9_-]` are replaced by `_`, and a short SHA-256 tag
    /// of the raw ID is appended whenever a replacement happened so that two
    /// distinct IDs cannot collapse onto the same key.
    pub fn for_video(video_id: &VideoId) -> Self {
        let raw = video_id.as_str().trim();
        let sanitized: String = raw
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();

        let ends_like_artifact = PIPELINE_SUFFIXES.iter().any(|s| sanitized.ends_with(s));
        if sanitized == raw && !raw.is_empty() && !ends_like_artifact {
            return Self(format!("{}{}", KEY_PREFIX, sanitized));
        }

        let digest = format!("{:x}", Sha256::digest(raw.as_bytes()));
        Self(format!(
            "{}{}_{}",
            KEY_PREFIX,
            sanitized,
            &digest[..HASH_TAG_LEN]
        ))
    }

    /// Canonicalize an artifact file name back to its video key.
    ///
    /// Strips any directory part, every extension and the pipeline-added
    /// suffixes, so `frame_analysis/video_42_analysis.json`,
    /// `video_42.mp4` and `video_42_final.json` all map to `video_42`.
    pub fn from_artifact_name(name: &str) -> Option<Self> {
        let file_name = Path::new(name.trim()).file_name()?.to_str()?;
        let mut stem = file_name.split('.').next().unwrap_or_default();

        loop {
            match PIPELINE_SUFFIXES.iter().find_map(|s| stem.strip_suffix(s)) {
                Some(stripped) => stem = stripped,
                None => break,
            }
        }

        if stem.is_empty() {
            None
        } else {
            Some(Self(stem.to_string()))
        }
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VideoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
