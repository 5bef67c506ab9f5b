//! Identity join of the two analysis branches.
//!
//! The transcript and frame branches skip failed items independently, so
//! their outputs are correlated by canonical video key, never by position.

use std::collections::{HashMap, HashSet};

use adlens_models::{FrameAnalysis, TranscriptAnalysis, VideoKey};
use tracing::warn;

/// A video present on both branches.
#[derive(Debug)]
pub struct Matched<'a> {
    /// Canonical key both sides were matched on
    pub key: VideoKey,
    pub transcript: &'a TranscriptAnalysis,
    pub frames: &'a FrameAnalysis,
}

/// Result of joining the two branches.
#[derive(Debug, Default)]
pub struct Joined<'a> {
    /// Pairs present on both sides, in transcript order
    pub matched: Vec<Matched<'a>>,
    /// Keys with a transcript analysis but no frame analysis
    pub transcript_only: Vec<VideoKey>,
    /// Keys with a frame analysis but no transcript analysis
    pub frames_only: Vec<VideoKey>,
}

/// Canonical key of an analysis record.
///
/// Keys built from artifact names may still carry an extension or a
/// pipeline suffix; those are folded onto the plain video key.
fn canonical(key: &VideoKey) -> VideoKey {
    VideoKey::from_artifact_name(key.as_str()).unwrap_or_else(|| key.clone())
}

/// Match transcript and frame analyses by canonical video key.
///
/// When one side lists a key twice, the first entry wins.
pub fn join_by_identity<'a>(
    transcripts: &'a [TranscriptAnalysis],
    frames: &'a [FrameAnalysis],
) -> Joined<'a> {
    let mut by_key: HashMap<VideoKey, &'a FrameAnalysis> = HashMap::new();
    let mut frame_order = Vec::new();
    for analysis in frames {
        let key = canonical(&analysis.video);
        if by_key.contains_key(&key) {
            warn!(video = %key, "Duplicate frame analysis, keeping the first");
            continue;
        }
        frame_order.push(key.clone());
        by_key.insert(key, analysis);
    }

    let mut joined = Joined::default();
    let mut seen = HashSet::new();
    for analysis in transcripts {
        let key = canonical(&analysis.video);
        if !seen.insert(key.clone()) {
            warn!(video = %key, "Duplicate transcript analysis, keeping the first");
            continue;
        }
        match by_key.get(&key) {
            Some(frames) => joined.matched.push(Matched {
                key,
                transcript: analysis,
                frames,
            }),
            None => joined.transcript_only.push(key),
        }
    }

    joined.frames_only = frame_order
        .into_iter()
        .filter(|key| !seen.contains(key))
        .collect();

    joined
}

#[cfg(test)]
mod tests {
    use super::*;
    use adlens_models::VideoId;
    use std::collections::BTreeMap;

    fn key(id: &str) -> VideoKey {
        VideoId::from(id).key()
    }

    fn transcript(video: VideoKey) -> TranscriptAnalysis {
        TranscriptAnalysis {
            video,
            techniques: vec!["urgency".to_string()],
            raw: String::new(),
        }
    }

    fn frames(video: VideoKey, label: &str) -> FrameAnalysis {
        let mut labels = BTreeMap::new();
        labels.insert("frame_1.jpg".to_string(), label.to_string());
        FrameAnalysis { video, labels }
    }

    #[test]
    fn test_matches_by_key_not_position() {
        let transcripts = vec![transcript(key("1")), transcript(key("2"))];
        let frame_side = vec![frames(key("2"), "two"), frames(key("1"), "one")];

        let joined = join_by_identity(&transcripts, &frame_side);

        assert_eq!(joined.matched.len(), 2);
        assert_eq!(joined.matched[0].transcript.video, key("1"));
        assert_eq!(joined.matched[0].frames.labels["frame_1.jpg"], "one");
        assert_eq!(joined.matched[1].frames.labels["frame_1.jpg"], "two");
        assert!(joined.transcript_only.is_empty());
        assert!(joined.frames_only.is_empty());
    }

    #[test]
    fn test_unmatched_entries_are_reported() {
        let transcripts = vec![transcript(key("1")), transcript(key("3"))];
        let frame_side = vec![frames(key("1"), "one"), frames(key("2"), "two")];

        let joined = join_by_identity(&transcripts, &frame_side);

        assert_eq!(joined.matched.len(), 1);
        assert_eq!(joined.transcript_only, vec![key("3")]);
        assert_eq!(joined.frames_only, vec![key("2")]);
    }

    fn raw_key(name: &str) -> VideoKey {
        serde_json::from_value(serde_json::Value::String(name.to_string())).unwrap()
    }

    #[test]
    fn test_suffixed_keys_are_canonicalized() {
        let transcripts = vec![transcript(raw_key("video_7_analysis"))];
        let frame_side = vec![frames(raw_key("video_7"), "seven")];

        let joined = join_by_identity(&transcripts, &frame_side);

        assert_eq!(joined.matched.len(), 1);
        assert_eq!(joined.matched[0].key, key("7"));
        assert_eq!(joined.matched[0].transcript.video, raw_key("video_7_analysis"));
    }

    #[test]
    fn test_duplicates_keep_first() {
        let transcripts = vec![transcript(key("1"))];
        let frame_side = vec![frames(key("1"), "first"), frames(key("1"), "second")];

        let joined = join_by_identity(&transcripts, &frame_side);

        assert_eq!(joined.matched.len(), 1);
        assert_eq!(joined.matched[0].frames.labels["frame_1.jpg"], "first");
    }

    #[test]
    fn test_empty_sides() {
        let frame_side = [frames(key("1"), "one")];
        let joined = join_by_identity(&[], &frame_side);
        assert!(joined.matched.is_empty());
        assert_eq!(joined.frames_only, vec![key("1")]);
    }
}
