//! Graph API HTTP client.

use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info, info_span, warn, Instrument};
use url::Url;

use adlens_models::{Ad, VideoId, VideoSource};
use adlens_retry::{parse_retry_after, retry};

use crate::config::GraphConfig;
use crate::error::{GraphError, GraphResult};
use crate::metrics::record_request;
use crate::types::{AdsPage, VideoNode};

/// Ad fields requested from the ads edge.
const AD_FIELDS: &[&str] = &[
    "id",
    "name",
    "ad_active_time",
    "adlabels",
    "campaign{id,name}",
    "adset{id,name,targeting}",
    "creative{id,video_id,effective_object_story_id,object_story_spec}",
    "status",
];

/// Video fields needed to download a video.
const VIDEO_FIELDS: &str = "source,permalink_url";

/// Graph API client.
#[derive(Clone)]
pub struct GraphClient {
    http: Client,
    config: GraphConfig,
}

impl GraphClient {
    /// Create a new client.
    pub fn new(config: GraphConfig) -> GraphResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(concat!("adlens-graph/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(GraphError::Network)?;

        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> GraphResult<Self> {
        Self::new(GraphConfig::from_env()?)
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// List every ad of the configured account.
    ///
    /// Follows `paging.next` up to `max_pages` pages.
    pub async fn list_ads(&self) -> GraphResult<Vec<Ad>> {
        let first = Url::parse_with_params(
            &format!(
                "{}/{}/ads",
                self.config.versioned_url(),
                self.config.ad_account_id
            ),
            &[
                ("access_token", self.config.access_token.as_str()),
                ("fields", AD_FIELDS.join(",").as_str()),
            ],
        )
        .map_err(|e| GraphError::config(format!("Invalid Graph URL: {}", e)))?;

        let mut ads = Vec::new();
        let mut next = Some(first.to_string());
        let mut pages = 0;

        while let Some(url) = next.take() {
            if pages >= self.config.max_pages {
                warn!(pages, "Stopped following ads pages at the configured limit");
                break;
            }

            let page: AdsPage = self.get_json("list_ads", &url).await?;
            pages += 1;
            debug!(page = pages, ads = page.data.len(), "Fetched ads page");

            ads.extend(page.data);
            next = page.paging.and_then(|p| p.next).filter(|n| !n.is_empty());
        }

        info!(ads = ads.len(), pages, "Retrieved ads");
        Ok(ads)
    }

    /// Resolve a video to its download location.
    ///
    /// Returns `None` when the video does not exist or exposes no source.
    pub async fn resolve_video(&self, video_id: &VideoId) -> GraphResult<Option<VideoSource>> {
        let url = Url::parse_with_params(
            &format!("{}/{}", self.config.versioned_url(), video_id),
            &[
                ("access_token", self.config.access_token.as_str()),
                ("fields", VIDEO_FIELDS),
            ],
        )
        .map_err(|e| GraphError::config(format!("Invalid Graph URL: {}", e)))?;

        let node: VideoNode = match self.get_json("resolve_video", url.as_str()).await {
            Ok(node) => node,
            Err(GraphError::NotFound(_)) => {
                debug!(video_id = %video_id, "Video not found");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        Ok(node
            .source
            .filter(|s| !s.trim().is_empty())
            .map(|source_url| VideoSource {
                source_url,
                permalink_url: node.permalink_url,
            }))
    }

    async fn get_json<T: DeserializeOwned>(&self, operation: &str, url: &str) -> GraphResult<T> {
        self.execute_request(operation, async {
            retry(&self.config.retry, operation, || async {
                let response = self.http.get(url).send().await?;
                let status = response.status();

                match status {
                    StatusCode::OK => Ok(response.json::<T>().await?),
                    _ => Err(Self::handle_error_response(status, operation, response).await),
                }
            })
            .await
        })
        .await
    }

    async fn execute_request<T, F>(&self, operation: &str, fut: F) -> GraphResult<T>
    where
        F: std::future::Future<Output = GraphResult<T>>,
    {
        let span = info_span!("graph_request", operation = %operation);

        let start = Instant::now();
        let result = fut.instrument(span).await;
        let latency_ms = start.elapsed().as_millis() as f64;

        let status = match &result {
            Ok(_) => 200,
            Err(e) => e.http_status().unwrap_or(0),
        };
        record_request(operation, status, latency_ms);

        result
    }

    // The URL carries the access token, so only the operation is reported.
    async fn handle_error_response(
        status: StatusCode,
        operation: &str,
        response: reqwest::Response,
    ) -> GraphError {
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let body = response.text().await.unwrap_or_default();

        let error =
            GraphError::from_http_status(status.as_u16(), format!("{} failed: {}", operation, body));
        match (error, retry_after) {
            (GraphError::RateLimited(_), Some(after)) => GraphError::RateLimited(after.as_millis() as u64),
            (error, _) => error,
        }
    }
}
