//! Pipeline metrics.

use metrics::{counter, histogram};

/// Metric name constants for consistency.
pub mod names {
    /// Per-item stage outcomes by stage and outcome.
    pub const STAGE_ITEMS_TOTAL: &str = "adlens_stage_items_total";

    /// Stage wall time in seconds by stage and status.
    pub const STAGE_DURATION_SECONDS: &str = "adlens_stage_duration_seconds";

    /// Completed runs by status.
    pub const RUNS_TOTAL: &str = "adlens_runs_total";
}

/// What happened to one item inside a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Computed and persisted this run
    Produced,
    /// Served from the on-disk cache
    CacheHit,
    /// Not applicable, or owned by another writer
    Skipped,
    /// Collaborator or storage failure
    Failed,
}

impl ItemOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemOutcome::Produced => "produced",
            ItemOutcome::CacheHit => "cache_hit",
            ItemOutcome::Skipped => "skipped",
            ItemOutcome::Failed => "failed",
        }
    }
}

pub fn record_item(stage: &'static str, outcome: ItemOutcome) {
    counter!(
        names::STAGE_ITEMS_TOTAL,
        "stage" => stage,
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

pub fn record_stage_duration(stage: &'static str, seconds: f64, success: bool) {
    histogram!(
        names::STAGE_DURATION_SECONDS,
        "stage" => stage,
        "status" => if success { "ok" } else { "error" }
    )
    .record(seconds);
}

pub fn record_run(success: bool) {
    counter!(
        names::RUNS_TOTAL,
        "status" => if success { "ok" } else { "error" }
    )
    .increment(1);
}
