//! Pipeline configuration.

use std::path::PathBuf;
use std::time::Duration;

use validator::{Validate, ValidationError};

use crate::error::{PipelineError, PipelineResult};

/// Pipeline configuration.
#[derive(Debug, Clone, Validate)]
pub struct PipelineConfig {
    /// Root of the on-disk cache
    pub cache_root: PathBuf,
    /// Frames sampled per video
    #[validate(range(min = 1, max = 50))]
    pub frames_per_video: usize,
    /// Bound on every speech-to-text and model call
    #[validate(custom(function = "non_zero_duration"))]
    pub call_timeout: Duration,
    /// Longest wait for the next chunk of a download
    #[validate(custom(function = "non_zero_duration"))]
    pub download_read_timeout: Duration,
    /// Bound on one whole download
    #[validate(custom(function = "non_zero_duration"))]
    pub download_timeout: Duration,
    /// Concurrent downloads
    #[validate(range(min = 1, max = 32))]
    pub fetch_concurrency: usize,
    /// Concurrent resolver, transcription and text-model calls
    #[validate(range(min = 1, max = 32))]
    pub request_concurrency: usize,
    /// Concurrent vision calls within one frame analysis batch
    #[validate(range(min = 1, max = 64))]
    pub frame_analysis_concurrency: usize,
    /// ISO-639-1 language hint for transcription
    #[validate(length(min = 2, max = 8))]
    pub language_hint: String,
    /// Age after which another writer's claim is broken
    #[validate(custom(function = "non_zero_duration"))]
    pub stale_claim_after: Duration,
}

fn non_zero_duration(value: &Duration) -> Result<(), ValidationError> {
    if value.is_zero() {
        return Err(ValidationError::new("zero_duration"));
    }
    Ok(())
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cache_root: PathBuf::from("data"),
            frames_per_video: 5,
            call_timeout: Duration::from_secs(120),
            download_read_timeout: Duration::from_secs(20),
            download_timeout: Duration::from_secs(300),
            fetch_concurrency: 2,
            request_concurrency: 2,
            frame_analysis_concurrency: 4,
            language_hint: "ur".to_string(),
            stale_claim_after: Duration::from_secs(3600),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

impl PipelineConfig {
    /// Create a config rooted at `cache_root` with defaults otherwise.
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
            ..Default::default()
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> PipelineResult<Self> {
        let defaults = Self::default();

        let config = Self {
            cache_root: std::env::var("ADLENS_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_root),
            frames_per_video: env_parse("ADLENS_FRAMES_PER_VIDEO")
                .unwrap_or(defaults.frames_per_video),
            call_timeout: env_parse("ADLENS_CALL_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.call_timeout),
            download_read_timeout: env_parse("ADLENS_DOWNLOAD_READ_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.download_read_timeout),
            download_timeout: env_parse("ADLENS_DOWNLOAD_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.download_timeout),
            fetch_concurrency: env_parse("ADLENS_FETCH_CONCURRENCY")
                .unwrap_or(defaults.fetch_concurrency),
            request_concurrency: env_parse("ADLENS_REQUEST_CONCURRENCY")
                .unwrap_or(defaults.request_concurrency),
            frame_analysis_concurrency: env_parse("ADLENS_FRAME_ANALYSIS_CONCURRENCY")
                .unwrap_or(defaults.frame_analysis_concurrency),
            language_hint: std::env::var("ADLENS_LANGUAGE_HINT")
                .unwrap_or(defaults.language_hint),
            stale_claim_after: env_parse("ADLENS_STALE_CLAIM_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.stale_claim_after),
        };

        config.checked()
    }

    /// Validate, mapping failures to a configuration error.
    pub fn checked(self) -> PipelineResult<Self> {
        self.validate()
            .map_err(|e| PipelineError::config_error(e.to_string()))?;
        Ok(self)
    }
}
