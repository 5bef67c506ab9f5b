//! Ad records from the ads API.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::video::VideoId;

/// One advertisement record.
///
/// Only the fields the pipeline reads are typed; everything else the API
/// returns (campaign, adset, labels, ...) is kept in `extra` so the raw
/// snapshot round-trips unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ad {
    /// Ad ID
    #[serde(default)]
    pub id: String,

    /// Ad name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Delivery status (ACTIVE, PAUSED, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// Creative attached to the ad
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creative: Option<Creative>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Ad creative metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Creative {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_object_story_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_story_spec: Option<ObjectStorySpec>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Story spec of a creative; video creatives carry `video_data`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectStorySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_data: Option<VideoData>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Ad {
    /// Create a bare ad with the given ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            status: None,
            creative: None,
            extra: Map::new(),
        }
    }

    /// Attach a video creative (story spec form).
    pub fn with_video(mut self, video_id: impl Into<String>) -> Self {
        let creative = self.creative.get_or_insert_with(Creative::default);
        creative.object_story_spec = Some(ObjectStorySpec {
            video_data: Some(VideoData {
                video_id: Some(video_id.into()),
                extra: Map::new(),
            }),
            extra: Map::new(),
        });
        self
    }

    /// Embedded video ID, if this is a video ad.
    ///
    /// Prefers `creative.object_story_spec.video_data.video_id` and falls
    /// back to `creative.video_id`. Blank values count as absent.
    pub fn video_id(&self) -> Option<VideoId> {
        let creative = self.creative.as_ref()?;

        let from_story = creative
            .object_story_spec
            .as_ref()
            .and_then(|spec| spec.video_data.as_ref())
            .and_then(|data| data.video_id.as_deref());

        from_story
            .into_iter()
            .chain(creative.video_id.as_deref())
            .map(str::trim)
            .find(|id| !id.is_empty())
            .map(VideoId::from)
    }
}
