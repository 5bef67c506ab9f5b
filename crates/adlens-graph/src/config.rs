//! Graph API client configuration.

use std::time::Duration;

use adlens_retry::Backoff;

use crate::error::{GraphError, GraphResult};

/// Default Graph API host.
pub const DEFAULT_BASE_URL: &str = "https://graph.facebook.com";

/// Default Graph API version.
pub const DEFAULT_API_VERSION: &str = "v19.0";

/// Graph API client configuration.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// Access token sent with every request
    pub access_token: String,
    /// Ad account (`act_...`) whose ads are listed
    pub ad_account_id: String,
    /// API version path segment
    pub api_version: String,
    /// Scheme and host, no trailing slash
    pub base_url: String,
    /// Maximum number of ads pages to follow
    pub max_pages: u32,
    /// Request timeout
    pub timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// Backoff for rate limits and server errors
    pub retry: Backoff,
}

impl GraphConfig {
    /// Config with defaults for everything but the credentials.
    pub fn new(access_token: impl Into<String>, ad_account_id: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            ad_account_id: ad_account_id.into(),
            api_version: DEFAULT_API_VERSION.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            max_pages: 10,
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            retry: Backoff::default(),
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> GraphResult<Self> {
        let access_token = required_var("FB_ACCESS_TOKEN")?;
        let ad_account_id = required_var("FB_AD_ACCOUNT_ID")?;

        let mut config = Self::new(access_token, ad_account_id);

        if let Ok(version) = std::env::var("FB_GRAPH_VERSION") {
            if !version.trim().is_empty() {
                config.api_version = version.trim().to_string();
            }
        }

        if let Ok(base_url) = std::env::var("FB_GRAPH_BASE_URL") {
            if !base_url.trim().is_empty() {
                config.base_url = base_url.trim().trim_end_matches('/').to_string();
            }
        }

        config.max_pages = std::env::var("FB_MAX_PAGES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(config.max_pages);

        config.timeout = std::env::var("FB_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(config.timeout);

        config.retry.max_retries = std::env::var("FB_MAX_RETRIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(config.retry.max_retries);

        Ok(config)
    }

    /// Base of every versioned request URL.
    pub fn versioned_url(&self) -> String {
        format!("{}/{}", self.base_url, self.api_version)
    }
}

fn required_var(name: &str) -> GraphResult<String> {
    let value = std::env::var(name)
        .map_err(|_| GraphError::config(format!("{} must be set to access the Graph API", name)))?;

    if value.trim().is_empty() {
        return Err(GraphError::config(format!("{} cannot be empty", name)));
    }

    Ok(value.trim().to_string())
}
