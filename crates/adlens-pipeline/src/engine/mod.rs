//! Stage graph execution engine.
//!
//! Stages run wave by wave in dependency order. All stages of one wave run
//! concurrently against the same snapshot of the state, so siblings never
//! observe each other's writes; their updates are merged after the whole
//! wave has finished, in registration order.

mod graph;
mod stage;
mod state;

pub use graph::{StageGraph, StageGraphBuilder};
pub use stage::Stage;
pub use state::{Batch, MergeStrategy, PipelineState, StateField, StateUpdate, StateView};

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, Instrument};

use crate::error::{PipelineError, PipelineResult, RunFailure};
use crate::logging::RunLogger;
use crate::metrics::record_stage_duration;

/// Requests a run-level abort. In-flight stages finish; no further stage
/// is scheduled.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Executes a [`StageGraph`].
pub struct Engine {
    graph: StageGraph,
    cancel_tx: Arc<watch::Sender<bool>>,
    cancel_rx: watch::Receiver<bool>,
}

impl Engine {
    pub fn new(graph: StageGraph) -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            graph,
            cancel_tx: Arc::new(tx),
            cancel_rx: rx,
        }
    }

    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: Arc::clone(&self.cancel_tx),
        }
    }

    /// Run every stage once, starting from `state`.
    ///
    /// The first stage error aborts the run; the failure carries the stage
    /// name and everything merged before it.
    pub async fn run(
        &self,
        mut state: PipelineState,
        logger: &RunLogger,
    ) -> Result<PipelineState, RunFailure> {
        for (wave_no, wave) in self.graph.waves().enumerate() {
            if *self.cancel_rx.borrow() {
                logger.cancelled(wave_no);
                return Err(RunFailure {
                    stage: None,
                    error: PipelineError::Cancelled,
                    partial_state: state,
                });
            }

            debug!(
                wave = wave_no,
                stages = ?wave.iter().map(|s| s.name()).collect::<Vec<_>>(),
                "Starting wave"
            );

            let snapshot = &state;
            let results = join_all(wave.iter().map(|stage| run_stage(stage, snapshot))).await;

            let mut updates = Vec::with_capacity(results.len());
            let mut failure = None;
            for (stage, result) in wave.iter().zip(results) {
                match result {
                    Ok(update) => updates.push(update),
                    Err(error) if failure.is_none() => failure = Some((stage.name(), error)),
                    Err(error) => {
                        error!(stage = stage.name(), error = %error, "Sibling stage also failed");
                    }
                }
            }

            // Successful siblings of a failed stage still count as completed
            for update in updates {
                state.apply(update);
            }

            if let Some((stage, error)) = failure {
                logger.stage_failed(stage, &error);
                return Err(RunFailure {
                    stage: Some(stage.to_string()),
                    error,
                    partial_state: state,
                });
            }
        }

        Ok(state)
    }
}

async fn run_stage(stage: &Arc<dyn Stage>, state: &PipelineState) -> PipelineResult<StateUpdate> {
    let name = stage.name();
    let span = info_span!("stage", stage = name);

    async move {
        let start = Instant::now();
        let view = StateView::new(state, name, stage.reads());
        let result = stage.run(view).await.and_then(|update| {
            if update.field() == stage.writes() {
                Ok(update)
            } else {
                Err(PipelineError::UndeclaredWrite {
                    stage: name.to_string(),
                    field: update.field(),
                })
            }
        });

        let elapsed = start.elapsed();
        record_stage_duration(name, elapsed.as_secs_f64(), result.is_ok());
        match &result {
            Ok(update) => info!(
                items = update.len(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Stage completed"
            ),
            Err(e) => error!(error = %e, "Stage failed"),
        }
        result
    }
    .instrument(span)
    .await
}
