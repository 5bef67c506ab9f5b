//! Pipeline stages.
//!
//! Every per-item stage follows the same discipline: look the item up in
//! the on-disk cache, return it on a hit, otherwise claim the entry,
//! look again, compute and persist atomically. One failed item never fails
//! the batch; an empty input batch yields an empty output without touching
//! any collaborator.

mod ad_source;
mod frame_analyzer;
mod frame_sampler;
mod synthesizer;
mod transcriber;
mod transcript_analyzer;
mod video_fetcher;
mod video_resolver;

pub use ad_source::AdSourceStage;
pub use frame_analyzer::FrameAnalyzerStage;
pub use frame_sampler::FrameSamplerStage;
pub use synthesizer::SynthesizerStage;
pub use transcriber::TranscriberStage;
pub use transcript_analyzer::TranscriptAnalyzerStage;
pub use video_fetcher::VideoFetcherStage;
pub use video_resolver::VideoResolverStage;

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use adlens_storage::{CacheLayout, StorageResult, WriteClaim};

use crate::config::PipelineConfig;
use crate::error::CollaboratorError;
use crate::metrics::{record_item, ItemOutcome};

/// Stage names.
pub mod names {
    pub const AD_SOURCE: &str = "ad_source";
    pub const VIDEO_RESOLVER: &str = "video_resolver";
    pub const VIDEO_FETCHER: &str = "video_fetcher";
    pub const TRANSCRIBER: &str = "transcriber";
    pub const FRAME_SAMPLER: &str = "frame_sampler";
    pub const TRANSCRIPT_ANALYZER: &str = "transcript_analyzer";
    pub const FRAME_ANALYZER: &str = "frame_analyzer";
    pub const SYNTHESIZER: &str = "synthesizer";
}

/// Shared by all stages of one pipeline.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub layout: CacheLayout,
    pub config: PipelineConfig,
}

impl StageContext {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            layout: CacheLayout::new(config.cache_root.clone()),
            config,
        }
    }
}

/// Bound a collaborator call.
pub(crate) async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, CollaboratorError>
where
    F: Future<Output = Result<T, CollaboratorError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(CollaboratorError::Timeout(limit)),
    }
}

/// Run `f` over `items` with at most `limit` in flight, keeping input order.
pub(crate) async fn for_each_bounded<'a, I, T, F, Fut>(items: I, limit: usize, f: F) -> Vec<T>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = T> + Send + 'a,
{
    let futures: Vec<BoxFuture<'a, T>> = items.into_iter().map(f).map(FutureExt::boxed).collect();
    stream::iter(futures)
        .buffered(limit.max(1))
        .collect()
        .await
}

/// State of a cache entry after lookup.
pub(crate) enum Cached<T> {
    /// Already persisted
    Hit(T),
    /// Missing; this worker now owns the entry
    Claimed(WriteClaim),
    /// Missing and owned by another worker
    Busy,
}

/// Look an entry up, claiming it on a miss.
///
/// The lookup is repeated after the claim is taken so that an entry
/// committed by the previous owner is never recomputed.
pub(crate) async fn lookup_or_claim<T, L, Fut>(
    entry: &Path,
    stale_after: Duration,
    load: L,
) -> StorageResult<Cached<T>>
where
    L: Fn() -> Fut,
    Fut: Future<Output = StorageResult<Option<T>>>,
{
    if let Some(value) = load().await? {
        return Ok(Cached::Hit(value));
    }

    let Some(claim) = WriteClaim::try_acquire(entry, stale_after).await? else {
        return Ok(Cached::Busy);
    };

    if let Some(value) = load().await? {
        return Ok(Cached::Hit(value));
    }

    Ok(Cached::Claimed(claim))
}

/// Per-item outcomes of one stage execution.
#[derive(Debug)]
pub(crate) struct Tally {
    stage: &'static str,
    produced: usize,
    cache_hit: usize,
    skipped: usize,
    failed: usize,
}

impl Tally {
    pub(crate) fn new(stage: &'static str) -> Self {
        Self {
            stage,
            produced: 0,
            cache_hit: 0,
            skipped: 0,
            failed: 0,
        }
    }

    pub(crate) fn record(&mut self, outcome: ItemOutcome) {
        record_item(self.stage, outcome);
        match outcome {
            ItemOutcome::Produced => self.produced += 1,
            ItemOutcome::CacheHit => self.cache_hit += 1,
            ItemOutcome::Skipped => self.skipped += 1,
            ItemOutcome::Failed => self.failed += 1,
        }
    }

    /// Record every outcome and keep the produced values, in order.
    pub(crate) fn collect<T>(&mut self, results: Vec<(ItemOutcome, Option<T>)>) -> Vec<T> {
        results
            .into_iter()
            .filter_map(|(outcome, value)| {
                self.record(outcome);
                value
            })
            .collect()
    }

    pub(crate) fn failed(&self) -> usize {
        self.failed
    }

    pub(crate) fn log_summary(&self) {
        if self.failed > 0 {
            warn!(
                stage = self.stage,
                produced = self.produced,
                cache_hit = self.cache_hit,
                skipped = self.skipped,
                failed = self.failed,
                "Stage finished with failed items"
            );
        } else {
            info!(
                stage = self.stage,
                produced = self.produced,
                cache_hit = self.cache_hit,
                skipped = self.skipped,
                "Stage items processed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let result: Result<(), _> = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(CollaboratorError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_for_each_bounded_keeps_order() {
        let out = for_each_bounded(vec![30u64, 10, 20], 3, |ms| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            ms
        })
        .await;

        assert_eq!(out, vec![30, 10, 20]);
    }

    #[tokio::test]
    async fn test_lookup_or_claim() {
        let dir = TempDir::new().unwrap();
        let entry = dir.path().join("video_1.txt");

        let counter = AtomicUsize::new(0);
        let loads = &counter;
        let load = move || async move {
            loads.fetch_add(1, Ordering::SeqCst);
            Ok::<Option<String>, adlens_storage::StorageError>(None)
        };

        let first = lookup_or_claim(&entry, Duration::from_secs(60), load)
            .await
            .unwrap();
        assert!(matches!(first, Cached::Claimed(_)));
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        let second = lookup_or_claim(&entry, Duration::from_secs(60), load)
            .await
            .unwrap();
        assert!(matches!(second, Cached::Busy));

        drop(first);
        tokio::fs::write(&entry, "cached").await.unwrap();
        let path = &entry;
        let hit = lookup_or_claim(&entry, Duration::from_secs(60), move || async move {
            adlens_storage::read_text(path).await
        })
        .await
        .unwrap();
        assert!(matches!(hit, Cached::Hit(text) if text == "cached"));
    }

    #[test]
    fn test_tally_collect() {
        let mut tally = Tally::new("test");
        let values = tally.collect(vec![
            (ItemOutcome::Produced, Some(1)),
            (ItemOutcome::Failed, None),
            (ItemOutcome::CacheHit, Some(2)),
            (ItemOutcome::Skipped, None),
        ]);

        assert_eq!(values, vec![1, 2]);
        assert_eq!(tally.failed(), 1);
        assert_eq!(tally.produced, 1);
        assert_eq!(tally.cache_hit, 1);
        assert_eq!(tally.skipped, 1);
    }
}
