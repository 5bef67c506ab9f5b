//! Ad listing stage.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use adlens_storage::write_json_atomic;

use super::{names, with_timeout, StageContext};
use crate::collaborators::AdSource;
use crate::engine::{Stage, StateField, StateUpdate, StateView};
use crate::error::{PipelineError, PipelineResult};

/// Fetches the raw ad records. Any failure is fatal for the run.
pub struct AdSourceStage {
    ctx: Arc<StageContext>,
    source: Arc<dyn AdSource>,
}

impl AdSourceStage {
    pub fn new(ctx: Arc<StageContext>, source: Arc<dyn AdSource>) -> Self {
        Self { ctx, source }
    }
}

#[async_trait]
impl Stage for AdSourceStage {
    fn name(&self) -> &'static str {
        names::AD_SOURCE
    }

    fn reads(&self) -> &'static [StateField] {
        &[]
    }

    fn writes(&self) -> StateField {
        StateField::Ads
    }

    async fn run(&self, _view: StateView<'_>) -> PipelineResult<StateUpdate> {
        let ads = with_timeout(self.ctx.config.call_timeout, self.source.list_ads())
            .await
            .map_err(|e| PipelineError::upstream_unavailable(format!("ad source: {}", e)))?;

        info!(count = ads.len(), "Fetched ads");

        // The snapshot is informational; a failed write does not fail the run
        let snapshot = self.ctx.layout.ads_snapshot();
        if let Err(e) = write_json_atomic(&snapshot, &ads).await {
            warn!(path = %snapshot.display(), error = %e, "Failed to write ads snapshot");
        }

        Ok(StateUpdate::Ads(ads))
    }
}
