//! Transcript analysis stage.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use adlens_llm::CompletionRequest;
use adlens_models::{Transcript, TranscriptAnalysis};
use adlens_storage::{read_json, write_json_atomic, ArtifactKind, StorageResult};

use super::{for_each_bounded, lookup_or_claim, names, with_timeout, Cached, StageContext, Tally};
use crate::collaborators::CompletionModel;
use crate::engine::{Stage, StateField, StateUpdate, StateView};
use crate::error::PipelineResult;
use crate::json_repair::parse_lenient;
use crate::metrics::ItemOutcome;
use crate::prompts;

/// Extracts persuasive techniques from each transcript.
pub struct TranscriptAnalyzerStage {
    ctx: Arc<StageContext>,
    model: Arc<dyn CompletionModel>,
}

/// Technique labels out of a JSON payload, if it has a recognised shape.
fn techniques_from_json(value: Value) -> Option<Vec<String>> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("techniques") {
            Some(Value::Array(items)) => items,
            Some(_) => return None,
            None => map.into_iter().map(|(_, v)| v).collect(),
        },
        _ => return None,
    };

    let labels: Vec<String> = items
        .into_iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.trim().to_string()),
            _ => None,
        })
        .filter(|s| !s.is_empty())
        .collect();

    if labels.is_empty() {
        None
    } else {
        Some(labels)
    }
}

/// Technique labels out of model output.
///
/// Tries a JSON payload first, then dash or bullet lines; otherwise the
/// trimmed text itself is the only label.
pub(crate) fn parse_techniques(raw: &str) -> Vec<String> {
    if let Some(labels) = parse_lenient::<Value>(raw).ok().and_then(techniques_from_json) {
        return labels;
    }

    let bullets: Vec<String> = raw
        .lines()
        .map(str::trim)
        .filter_map(|line| {
            line.strip_prefix('-')
                .or_else(|| line.strip_prefix('*'))
                .or_else(|| line.strip_prefix('•'))
        })
        .map(|label| label.trim().to_string())
        .filter(|label| !label.is_empty())
        .collect();
    if !bullets.is_empty() {
        return bullets;
    }

    let text = raw.trim();
    if text.is_empty() {
        Vec::new()
    } else {
        vec![text.to_string()]
    }
}

async fn cached_analysis(path: &Path) -> StorageResult<Option<TranscriptAnalysis>> {
    read_json(path).await
}

impl TranscriptAnalyzerStage {
    pub fn new(ctx: Arc<StageContext>, model: Arc<dyn CompletionModel>) -> Self {
        Self { ctx, model }
    }

    async fn analyze(&self, transcript: &Transcript) -> (ItemOutcome, Option<TranscriptAnalysis>) {
        let key = transcript.video.clone();
        let entry = self.ctx.layout.entry(ArtifactKind::TranscriptAnalysis, &key);

        let path = entry.as_path();
        let lookup = lookup_or_claim(path, self.ctx.config.stale_claim_after, move || {
            cached_analysis(path)
        })
        .await;

        let _claim = match lookup {
            Ok(Cached::Hit(analysis)) => {
                debug!(video = %key, "Transcript analysis already exists");
                return (ItemOutcome::CacheHit, Some(analysis));
            }
            Ok(Cached::Busy) => {
                info!(video = %key, "Transcript analysis is being written by another worker, skipping");
                return (ItemOutcome::Skipped, None);
            }
            Ok(Cached::Claimed(claim)) => claim,
            Err(e) => {
                warn!(video = %key, error = %e, "Transcript analysis cache lookup failed");
                return (ItemOutcome::Failed, None);
            }
        };

        let request = CompletionRequest {
            system: Some(prompts::TRANSCRIPT_ANALYSIS_SYSTEM.to_string()),
            temperature: Some(0.5),
            ..CompletionRequest::new(prompts::transcript_analysis(&transcript.text))
        };
        let raw = match with_timeout(self.ctx.config.call_timeout, self.model.complete(request)).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(video = %key, error = %e, "Transcript analysis failed");
                return (ItemOutcome::Failed, None);
            }
        };

        let techniques = parse_techniques(&raw);
        if techniques.is_empty() {
            warn!(video = %key, "Transcript analysis returned nothing, skipping");
            return (ItemOutcome::Skipped, None);
        }

        let analysis = TranscriptAnalysis {
            video: key.clone(),
            techniques,
            raw,
        };
        if let Err(e) = write_json_atomic(&entry, &analysis).await {
            warn!(video = %key, error = %e, "Failed to persist transcript analysis");
            return (ItemOutcome::Failed, None);
        }

        info!(video = %key, techniques = analysis.techniques.len(), "Analyzed transcript");
        (ItemOutcome::Produced, Some(analysis))
    }
}

#[async_trait]
impl Stage for TranscriptAnalyzerStage {
    fn name(&self) -> &'static str {
        names::TRANSCRIPT_ANALYZER
    }

    fn reads(&self) -> &'static [StateField] {
        &[StateField::Transcripts]
    }

    fn writes(&self) -> StateField {
        StateField::TranscriptAnalyses
    }

    async fn run(&self, view: StateView<'_>) -> PipelineResult<StateUpdate> {
        let transcripts = view.transcripts()?;

        let results = for_each_bounded(
            transcripts.items(),
            self.ctx.config.request_concurrency,
            |transcript| self.analyze(transcript),
        )
        .await;

        let mut tally = Tally::new(self.name());
        let analyses = tally.collect(results);
        tally.log_summary();

        Ok(StateUpdate::TranscriptAnalyses(analyses))
    }
}
