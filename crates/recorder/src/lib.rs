pub mod anchor;
pub mod caption;
pub mod downloader;
pub mod recorder;
pub mod registry;
pub mod retry;
pub mod storage;

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// Re-export main types
pub use anchor::{capturing_key, Anchor, AnchorInfo, AnchorSite, SiteError};
pub use caption::{gen_caption, human_bytes};
pub use downloader::HttpDownloader;
pub use recorder::Recorder;
pub use registry::{CaptureProgress, CapturingRegistry};
pub use retry::try_get_anchor_info;
pub use storage::StorageManager;

use live_stream::{Handler, StreamError};

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("获取主播信息出错：{0}")]
    AnchorInfo(#[from] SiteError),
    #[error(transparent)]
    Stream(#[from] StreamError),
}

/// Recorder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Extra attempts after a failed anchor info lookup
    pub max_info_retries: u32,
    /// Fixed delay between anchor info attempts in milliseconds
    pub retry_delay_ms: u64,
    /// Delay between playlist fetches in milliseconds
    pub playlist_interval_ms: u64,
    /// Capacity of the segment queue between poller and downloader
    pub segment_buffer: usize,
    /// Per-segment download timeout in seconds
    pub download_timeout: u64,
    /// Connect timeout for stream requests in seconds
    pub connect_timeout: u64,
    /// Maximum retry count for a failed segment download
    pub max_retry_count: u32,
    pub user_agent: String,
    /// Honor HTTP(S)_PROXY from the environment
    pub use_system_proxy: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            max_info_retries: 3,
            retry_delay_ms: 1000,
            playlist_interval_ms: 1000,
            segment_buffer: 16,
            download_timeout: 30,
            connect_timeout: 10,
            max_retry_count: 3,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string(),
            use_system_proxy: true,
        }
    }
}

/// Where and how one anchor's capture is written
#[derive(Clone)]
pub struct CaptureOptions {
    /// Directory for output files
    pub path: PathBuf,
    /// Bytes per output file; 0 keeps a single file
    pub size_threshold: u64,
    /// Receives every finished file with its caption
    pub handler: Option<Arc<dyn Handler>>,
}

impl CaptureOptions {
    pub fn new(path: impl Into<PathBuf>, size_threshold: u64) -> Self {
        Self {
            path: path.into(),
            size_threshold,
            handler: None,
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handler = Some(handler);
        self
    }
}
