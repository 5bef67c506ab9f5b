//! Meta Graph API client.
//!
//! This crate provides:
//! - Ads listing for an ad account, following `paging.next`
//! - Video source resolution (`source`, `permalink_url`)
//! - HTTP status to error mapping with transient classification
//! - Request metrics

pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
mod types;

pub use client::GraphClient;
pub use config::GraphConfig;
pub use error::{GraphError, GraphResult};
