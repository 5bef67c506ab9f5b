//! Structured run logging.
//!
//! Every log line of a run carries the run ID so interleaved runs against
//! one cache directory can be told apart.

use std::fmt::Display;
use std::path::Path;

use tracing::{error, info, warn, Span};
use uuid::Uuid;

/// Run-level events of one workflow execution.
#[derive(Debug, Clone)]
pub struct RunLogger {
    run_id: String,
    workflow: &'static str,
}

impl RunLogger {
    /// Logger for a fresh run with a random ID.
    pub fn new(workflow: &'static str) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            workflow,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Span covering the whole run; stage logs nest under it.
    pub fn span(&self) -> Span {
        tracing::info_span!("run", run_id = %self.run_id, workflow = self.workflow)
    }

    pub fn started(&self, cache_root: &Path) {
        info!(
            run_id = %self.run_id,
            workflow = self.workflow,
            cache = %cache_root.display(),
            "Run started"
        );
    }

    pub fn cache_unusable(&self, error: &dyn Display) {
        error!(
            run_id = %self.run_id,
            workflow = self.workflow,
            error = %error,
            "Cache directory unusable, run not started"
        );
    }

    pub fn cancelled(&self, completed_waves: usize) {
        warn!(
            run_id = %self.run_id,
            workflow = self.workflow,
            completed_waves,
            "Run cancelled before all stages ran"
        );
    }

    pub fn stage_failed(&self, stage: &str, error: &dyn Display) {
        error!(
            run_id = %self.run_id,
            workflow = self.workflow,
            stage,
            error = %error,
            "Run aborted by stage failure"
        );
    }

    pub fn completed(&self, results: usize) {
        info!(
            run_id = %self.run_id,
            workflow = self.workflow,
            results,
            "Run completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_each_run_gets_its_own_id() {
        let a = RunLogger::new("ad_analysis");
        let b = RunLogger::new("ad_analysis");

        assert!(Uuid::parse_str(a.run_id()).is_ok());
        assert_ne!(a.run_id(), b.run_id());
    }

    #[test]
    fn test_clone_keeps_run_id() {
        let logger = RunLogger::new("ad_analysis");
        assert_eq!(logger.clone().run_id(), logger.run_id());
    }
}
