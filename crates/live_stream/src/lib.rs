pub mod downloader;
pub mod kind;
pub mod playlist;
pub mod segment;
pub mod segmented;
pub mod session;

use std::collections::HashMap;

use thiserror::Error;

// Re-export main types
pub use downloader::{CaptureEnd, CaptureJob, Downloader, Handler, StreamCapture};
pub use kind::StreamKind;
pub use playlist::PlaylistDecoder;
pub use segment::Segment;
pub use segmented::SegmentQueue;
pub use session::{SessionParams, SessionPhase, StreamSession, Termination, TerminationSignals};

/// HTTP headers sent with every request for a stream
pub type Headers = HashMap<String, String>;

/// Boxed error used to carry collaborator failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("解码 m3u8 文件出错：{0}")]
    Decode(#[source] BoxError),
    #[error("准备录制直播流时出错：{0}")]
    Prepare(#[source] BoxError),
    #[error("没有匹配到直播流的类型：{0}")]
    UnknownFormat(String),
    #[error("NetworkError: {0}")]
    NetworkError(#[from] reqwest::Error),
    #[error("IOError: {0}")]
    IOError(#[from] std::io::Error),
    #[error("DownloadError: {0}")]
    DownloadError(String),
    #[error("session has not been reset before start")]
    NotConfigured,
}
