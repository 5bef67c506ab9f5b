//! Per-video analysis models.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use crate::key::VideoKey;

/// Persuasive techniques extracted from a transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptAnalysis {
    pub video: VideoKey,
    /// Technique labels, in the order the model listed them
    pub techniques: Vec<String>,
    /// Model output as received
    pub raw: String,
}

/// Short descriptive label per sampled frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameAnalysis {
    pub video: VideoKey,
    /// Frame file name -> label
    pub labels: BTreeMap<String, String>,
}

impl FrameAnalysis {
    /// Labels joined by newlines in frame order.
    pub fn visual_summary(&self) -> String {
        let mut entries: Vec<(&String, &String)> = self.labels.iter().collect();
        entries.sort_by_key(|(name, _)| frame_number(name));
        entries
            .into_iter()
            .map(|(_, label)| label.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Numeric part of `frame_{n}.jpg`; unparseable names sort last.
fn frame_number(name: &str) -> (u64, String) {
    let n = name
        .strip_prefix("frame_")
        .and_then(|rest| rest.split('.').next())
        .and_then(|n| n.parse().ok())
        .unwrap_or(u64::MAX);
    (n, name.to_string())
}

/// Final structured analysis of one ad video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FinalAnalysis {
    /// Main hook line or pattern and why it works
    pub hook: String,
    /// Overall tone (emotional, confident, hype, ...)
    pub tone: String,
    /// Power phrases or emotional angles that stood out
    #[serde(deserialize_with = "string_or_list")]
    #[schemars(with = "Vec<String>")]
    pub power_phrases: Vec<String>,
    /// Impactful gestures, expressions, camera angles or visuals
    pub visual: String,
}

/// Externally observable result element of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdAnalysisResult {
    pub video: VideoKey,
    pub analysis: FinalAnalysis,
    pub analyzed_at: DateTime<Utc>,
}

fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrList {
        One(String),
        Many(Vec<String>),
    }

    let phrases = match StringOrList::deserialize(deserializer)? {
        StringOrList::One(s) => vec![s],
        StringOrList::Many(v) => v,
    };

    Ok(phrases
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect())
}
