//! Stage contract.

use async_trait::async_trait;

use super::state::{StateField, StateUpdate, StateView};
use crate::error::PipelineResult;

/// One transformation over a batch of items.
///
/// A stage sees only the fields it declares in [`Stage::reads`] and returns
/// a value for the single field it owns. Per-item failures are absorbed
/// inside the stage; returning `Err` aborts the run.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Unique name within a graph.
    fn name(&self) -> &'static str;

    fn reads(&self) -> &'static [StateField];

    fn writes(&self) -> StateField;

    async fn run(&self, view: StateView<'_>) -> PipelineResult<StateUpdate>;
}
