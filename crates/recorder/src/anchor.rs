use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use live_stream::Headers;

/// A broadcaster on a platform
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Anchor {
    /// Platform tag, e.g. "bili"
    pub plat: String,
    /// Platform-specific anchor ID
    pub id: String,
}

impl Anchor {
    pub fn new(plat: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            plat: plat.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.plat, self.id)
    }
}

/// Registry key of an anchor, "<plat>_<id>" such as "bili_12345"
pub fn capturing_key(anchor: &Anchor) -> String {
    format!("{}_{}", anchor.plat, anchor.id)
}

/// Snapshot of an anchor's live status
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnchorInfo {
    pub is_live: bool,
    /// Display name of the anchor
    pub name: String,
    /// Broadcast title
    pub title: String,
    pub stream_url: String,
}

#[derive(Error, Debug)]
pub enum SiteError {
    #[error("NetworkError: {0}")]
    NetworkError(#[from] reqwest::Error),
    #[error("ParseError: {0}")]
    ParseError(String),
    #[error("AuthError: {0}")]
    AuthError(String),
    #[error("UnsupportedPlatform: {0}")]
    UnsupportedPlatform(String),
}

/// Platform integration resolving an anchor to its live stream
#[async_trait]
pub trait AnchorSite: Send + Sync {
    fn anchor(&self) -> &Anchor;

    async fn get_anchor_info(&self) -> Result<AnchorInfo, SiteError>;

    /// Human-readable platform name used in captions
    fn plat_name(&self) -> &str;

    /// Headers the stream CDN expects, e.g. Referer
    fn stream_headers(&self) -> Headers;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capturing_key_joins_platform_and_id() {
        assert_eq!(capturing_key(&Anchor::new("bili", "12345")), "bili_12345");
        assert_eq!(
            capturing_key(&Anchor::new("douyin", "12345")),
            capturing_key(&Anchor::new("douyin", "12345"))
        );
        assert_ne!(
            capturing_key(&Anchor::new("bili", "12345")),
            capturing_key(&Anchor::new("bili", "54321"))
        );
    }
}
