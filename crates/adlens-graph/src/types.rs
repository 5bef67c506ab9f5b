//! Graph API response shapes.

use serde::Deserialize;

use adlens_models::Ad;

/// One page of an edge listing.
#[derive(Debug, Deserialize)]
pub(crate) struct AdsPage {
    #[serde(default)]
    pub data: Vec<Ad>,
    #[serde(default)]
    pub paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Paging {
    #[serde(default)]
    pub next: Option<String>,
}

/// Video node with the requested fields.
#[derive(Debug, Deserialize)]
pub(crate) struct VideoNode {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub permalink_url: Option<String>,
}
