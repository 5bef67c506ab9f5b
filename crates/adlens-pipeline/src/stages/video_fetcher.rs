//! Video download stage.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::fs;
use tracing::{debug, info, warn};

use adlens_models::{LocalVideo, VideoId, VideoKey, VideoRef};
use adlens_storage::{is_valid_video, ArtifactKind, PartFile, StorageResult};

use super::{for_each_bounded, lookup_or_claim, names, Cached, StageContext, Tally};
use crate::collaborators::VideoTransport;
use crate::engine::{Stage, StateField, StateUpdate, StateView};
use crate::error::{CollaboratorError, PipelineResult};
use crate::metrics::ItemOutcome;

/// Downloads each resolved video into `videos/{key}.mp4`.
pub struct VideoFetcherStage {
    ctx: Arc<StageContext>,
    transport: Arc<dyn VideoTransport>,
}

/// A valid cached file for this video, if any.
async fn cached_video(video_id: &VideoId, key: &VideoKey, path: &Path) -> StorageResult<Option<LocalVideo>> {
    if !is_valid_video(path).await {
        return Ok(None);
    }

    let size_bytes = fs::metadata(path).await?.len();
    Ok(Some(LocalVideo {
        video_id: video_id.clone(),
        key: key.clone(),
        path: path.to_path_buf(),
        size_bytes,
    }))
}

impl VideoFetcherStage {
    pub fn new(ctx: Arc<StageContext>, transport: Arc<dyn VideoTransport>) -> Self {
        Self { ctx, transport }
    }

    /// Stream `url` into `dest`; nothing is left at `dest` on failure.
    async fn download(&self, url: &str, dest: &Path) -> Result<u64, CollaboratorError> {
        let mut stream = self.transport.open(url).await?;
        let mut part = PartFile::create(dest)
            .await
            .map_err(|e| CollaboratorError::other(e.to_string()))?;

        while let Some(chunk) = stream.next().await {
            part.write(&chunk?)
                .await
                .map_err(|e| CollaboratorError::other(e.to_string()))?;
        }

        if part.written() == 0 {
            return Err(CollaboratorError::transport("empty response body"));
        }

        part.commit()
            .await
            .map_err(|e| CollaboratorError::other(e.to_string()))
    }

    pub(crate) async fn fetch(&self, video: &VideoRef) -> (ItemOutcome, Option<LocalVideo>) {
        let key = video.key();
        let entry = self.ctx.layout.entry(ArtifactKind::Video, &key);

        let (id, k, path) = (&video.video_id, &key, entry.as_path());
        let lookup = lookup_or_claim(path, self.ctx.config.stale_claim_after, move || {
            cached_video(id, k, path)
        })
        .await;

        let claim = match lookup {
            Ok(Cached::Hit(local)) => {
                debug!(video = %key, "Video already downloaded");
                return (ItemOutcome::CacheHit, Some(local));
            }
            Ok(Cached::Busy) => {
                info!(video = %key, "Video is being downloaded by another worker, skipping");
                return (ItemOutcome::Skipped, None);
            }
            Ok(Cached::Claimed(claim)) => claim,
            Err(e) => {
                warn!(video = %key, error = %e, "Video cache lookup failed");
                return (ItemOutcome::Failed, None);
            }
        };

        let limit = self.ctx.config.download_timeout;
        let result = match tokio::time::timeout(limit, self.download(&video.source_url, &entry)).await {
            Ok(result) => result,
            Err(_) => Err(CollaboratorError::Timeout(limit)),
        };
        drop(claim);

        match result {
            Ok(size_bytes) => {
                info!(video = %key, ad_id = %video.ad_id, size_bytes, "Downloaded video");
                (
                    ItemOutcome::Produced,
                    Some(LocalVideo {
                        video_id: video.video_id.clone(),
                        key,
                        path: entry,
                        size_bytes,
                    }),
                )
            }
            Err(e) => {
                warn!(video = %key, ad_id = %video.ad_id, error = %e, "Failed to download video");
                (ItemOutcome::Failed, None)
            }
        }
    }
}

#[async_trait]
impl Stage for VideoFetcherStage {
    fn name(&self) -> &'static str {
        names::VIDEO_FETCHER
    }

    fn reads(&self) -> &'static [StateField] {
        &[StateField::VideoRefs]
    }

    fn writes(&self) -> StateField {
        StateField::LocalVideos
    }

    async fn run(&self, view: StateView<'_>) -> PipelineResult<StateUpdate> {
        let refs = view.video_refs()?;

        // Several ads may share one video; it is fetched once
        let mut seen = HashSet::new();
        let unique: Vec<&VideoRef> = refs
            .items()
            .iter()
            .filter(|video| seen.insert(video.key()))
            .collect();

        let results = for_each_bounded(unique, self.ctx.config.fetch_concurrency, |video| {
            self.fetch(video)
        })
        .await;

        let mut tally = Tally::new(self.name());
        let videos = tally.collect(results);
        tally.log_summary();

        Ok(StateUpdate::LocalVideos(videos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{ByteStream, MockVideoTransport};
    use crate::config::PipelineConfig;
    use crate::engine::PipelineState;
    use bytes::Bytes;
    use futures::stream;
    use tempfile::TempDir;

    fn video_ref(id: &str) -> VideoRef {
        VideoRef {
            ad_id: format!("ad_{}", id),
            video_id: VideoId::from(id),
            source_url: format!("https://cdn.example.com/{}.mp4", id),
            permalink_url: None,
        }
    }

    fn body(chunks: &[&'static str]) -> ByteStream {
        let chunks: Vec<_> = chunks
            .iter()
            .map(|c| Ok(Bytes::from_static(c.as_bytes())))
            .collect();
        stream::iter(chunks).boxed()
    }

    async fn stage(dir: &TempDir, transport: MockVideoTransport) -> VideoFetcherStage {
        let ctx = Arc::new(StageContext::new(PipelineConfig::new(dir.path())));
        ctx.layout.ensure_dirs().await.unwrap();
        VideoFetcherStage::new(ctx, Arc::new(transport))
    }

    async fn run(stage: &VideoFetcherStage, refs: Vec<VideoRef>) -> Vec<LocalVideo> {
        let mut state = PipelineState::new();
        state.apply(StateUpdate::VideoRefs(refs));
        match stage
            .run(StateView::new(&state, stage.name(), stage.reads()))
            .await
            .unwrap()
        {
            StateUpdate::LocalVideos(videos) => videos,
            other => panic!("unexpected update {:?}", other.field()),
        }
    }

    #[tokio::test]
    async fn test_second_run_hits_cache() {
        let dir = TempDir::new().unwrap();
        let mut transport = MockVideoTransport::new();
        transport
            .expect_open()
            .times(1)
            .returning(|_| Ok(body(&["abc", "def"])));

        let stage = stage(&dir, transport).await;
        let first = run(&stage, vec![video_ref("1")]).await;
        let second = run(&stage, vec![video_ref("1")]).await;

        assert_eq!(first.len(), 1);
        assert_eq!(first[0].size_bytes, 6);
        assert_eq!(first, second);
        assert_eq!(fs::read(&first[0].path).await.unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn test_failed_download_leaves_nothing() {
        let dir = TempDir::new().unwrap();
        let mut transport = MockVideoTransport::new();
        transport.expect_open().returning(|_| {
            Ok(stream::iter(vec![
                Ok(Bytes::from_static(b"partial")),
                Err(CollaboratorError::transport("connection reset")),
            ])
            .boxed())
        });

        let stage = stage(&dir, transport).await;
        let videos = run(&stage, vec![video_ref("1")]).await;

        assert!(videos.is_empty());
        let mut entries = fs::read_dir(dir.path().join("videos")).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_body_is_a_failure() {
        let dir = TempDir::new().unwrap();
        let mut transport = MockVideoTransport::new();
        transport.expect_open().returning(|_| Ok(body(&[])));

        let stage = stage(&dir, transport).await;
        assert!(run(&stage, vec![video_ref("1")]).await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_cached_file_is_refetched() {
        let dir = TempDir::new().unwrap();
        let mut transport = MockVideoTransport::new();
        transport
            .expect_open()
            .times(1)
            .returning(|_| Ok(body(&["fresh"])));

        let stage = stage(&dir, transport).await;
        fs::write(dir.path().join("videos/video_1.mp4"), b"").await.unwrap();

        let videos = run(&stage, vec![video_ref("1")]).await;
        assert_eq!(videos[0].size_bytes, 5);
    }

    #[tokio::test]
    async fn test_duplicate_refs_fetch_once() {
        let dir = TempDir::new().unwrap();
        let mut transport = MockVideoTransport::new();
        transport
            .expect_open()
            .times(1)
            .returning(|_| Ok(body(&["x"])));

        let stage = stage(&dir, transport).await;
        let videos = run(&stage, vec![video_ref("1"), video_ref("1")]).await;
        assert_eq!(videos.len(), 1);
    }

    #[tokio::test]
    async fn test_claimed_entry_is_skipped() {
        let dir = TempDir::new().unwrap();
        let mut transport = MockVideoTransport::new();
        transport.expect_open().never();

        let stage = stage(&dir, transport).await;
        let entry = dir.path().join("videos/video_1.mp4");
        let _claim = adlens_storage::WriteClaim::try_acquire(&entry, std::time::Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();

        assert!(run(&stage, vec![video_ref("1")]).await.is_empty());
    }
}
