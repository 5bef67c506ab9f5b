//! Video resolution stage.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use adlens_models::{Ad, VideoRef};

use super::{for_each_bounded, names, with_timeout, StageContext, Tally};
use crate::collaborators::VideoResolver;
use crate::engine::{Stage, StateField, StateUpdate, StateView};
use crate::error::{PipelineError, PipelineResult};
use crate::metrics::ItemOutcome;

/// Fewest failed lookups that count as a resolver outage.
const OUTAGE_MIN_LOOKUPS: usize = 2;

/// Maps each video ad to its download URL.
///
/// Ads without a video and videos the host does not know are skipped. If
/// every lookup of a batch with at least two video ads fails, the resolver
/// is considered down and the run aborts. A lone failed lookup is skipped
/// like any other per-item failure.
pub struct VideoResolverStage {
    ctx: Arc<StageContext>,
    resolver: Arc<dyn VideoResolver>,
}

impl VideoResolverStage {
    pub fn new(ctx: Arc<StageContext>, resolver: Arc<dyn VideoResolver>) -> Self {
        Self { ctx, resolver }
    }

    async fn resolve_one(&self, ad: &Ad) -> (ItemOutcome, Option<VideoRef>) {
        let Some(video_id) = ad.video_id() else {
            debug!(ad_id = %ad.id, "Ad has no video creative");
            return (ItemOutcome::Skipped, None);
        };

        match with_timeout(self.ctx.config.call_timeout, self.resolver.resolve(&video_id)).await {
            Ok(Some(source)) => (
                ItemOutcome::Produced,
                Some(VideoRef {
                    ad_id: ad.id.clone(),
                    video_id,
                    source_url: source.source_url,
                    permalink_url: source.permalink_url,
                }),
            ),
            Ok(None) => {
                warn!(ad_id = %ad.id, video = %video_id, "Video not found or has no source");
                (ItemOutcome::Skipped, None)
            }
            Err(e) => {
                warn!(ad_id = %ad.id, video = %video_id, error = %e, "Failed to resolve video");
                (ItemOutcome::Failed, None)
            }
        }
    }
}

#[async_trait]
impl Stage for VideoResolverStage {
    fn name(&self) -> &'static str {
        names::VIDEO_RESOLVER
    }

    fn reads(&self) -> &'static [StateField] {
        &[StateField::Ads]
    }

    fn writes(&self) -> StateField {
        StateField::VideoRefs
    }

    async fn run(&self, view: StateView<'_>) -> PipelineResult<StateUpdate> {
        let ads = view.ads()?;
        if ads.is_empty() {
            return Ok(StateUpdate::VideoRefs(Vec::new()));
        }

        let results = for_each_bounded(
            ads.items(),
            self.ctx.config.request_concurrency,
            |ad| self.resolve_one(ad),
        )
        .await;

        let lookups = ads.items().iter().filter(|ad| ad.video_id().is_some()).count();
        let mut tally = Tally::new(self.name());
        let refs = tally.collect(results);
        tally.log_summary();

        if lookups >= OUTAGE_MIN_LOOKUPS && tally.failed() == lookups {
            return Err(PipelineError::upstream_unavailable(format!(
                "video resolver: all {} lookups failed",
                lookups
            )));
        }

        Ok(StateUpdate::VideoRefs(refs))
    }
}
