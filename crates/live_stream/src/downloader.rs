use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use crate::{Headers, SegmentQueue, SessionParams, StreamError, StreamKind};

/// How a downloader finished with the current output file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureEnd {
    /// The size threshold was reached; capture must restart into a new file
    Rotate,
    /// The source closed (stream ended or segment queue finished)
    Closed,
}

/// Everything a downloader needs for one capture run
#[derive(Clone)]
pub struct CaptureJob {
    pub kind: StreamKind,
    /// Caption of the finished file, handed to the handler
    pub title: String,
    pub stream_url: String,
    pub headers: Headers,
    /// Directory the output files are written to
    pub path: PathBuf,
    /// Bytes per file before rotating; 0 disables rotation
    pub size_threshold: u64,
    pub handler: Option<Arc<dyn Handler>>,
    progress: Arc<AtomicU64>,
}

impl CaptureJob {
    pub fn new(kind: StreamKind, params: &SessionParams, progress: Arc<AtomicU64>) -> Self {
        Self {
            kind,
            title: params.title.clone(),
            stream_url: params.stream_url.clone(),
            headers: params.headers.clone(),
            path: params.path.clone(),
            size_threshold: params.size_threshold,
            handler: params.handler.clone(),
            progress,
        }
    }

    /// Account bytes written to disk for progress inspection
    pub fn add_bytes(&self, n: u64) {
        self.progress.fetch_add(n, Ordering::Relaxed);
    }

    pub fn bytes_written(&self) -> u64 {
        self.progress.load(Ordering::Relaxed)
    }

    /// Whether a file holding `file_bytes` has crossed the rotation threshold
    pub fn should_rotate(&self, file_bytes: u64) -> bool {
        self.size_threshold > 0 && file_bytes >= self.size_threshold
    }

    /// Hand a finished file to the handler in the background
    pub fn finish_file(&self, file: &Path) {
        let Some(handler) = self.handler.clone() else {
            return;
        };
        let file = file.to_path_buf();
        let caption = self.title.clone();
        tokio::spawn(async move {
            if let Err(e) = handler.handle(&file, &caption).await {
                log::error!("Handler failed for {:?}: {}", file, e);
            }
        });
    }
}

/// Writes stream bytes to disk.
///
/// Implementations rotate files at `size_threshold`, call [`CaptureJob::add_bytes`]
/// for everything written and pass finished files to [`CaptureJob::finish_file`].
#[async_trait]
pub trait Downloader: Send + Sync {
    /// One-time setup before the capture task is spawned
    async fn prepare(&self, _job: &CaptureJob) -> Result<(), StreamError> {
        Ok(())
    }

    /// Open the connection of a continuous stream.
    ///
    /// Runs during session start, so a refused or failed connection fails
    /// the start instead of the background capture.
    async fn open_stream(&self, job: &CaptureJob) -> Result<Box<dyn StreamCapture>, StreamError>;

    /// Download segments from the queue until it closes or the file must rotate.
    ///
    /// Segments left in the queue on rotation belong to the next run.
    async fn capture_segments(
        &self,
        job: CaptureJob,
        segments: SegmentQueue,
    ) -> Result<CaptureEnd, StreamError>;
}

/// A continuous stream with its connection already open
#[async_trait]
pub trait StreamCapture: Send {
    /// Read the stream until the source closes or the file must rotate
    async fn capture(self: Box<Self>, job: CaptureJob) -> Result<CaptureEnd, StreamError>;
}

/// Post-processes a finished file, e.g. uploads it with its caption
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, file: &Path, caption: &str) -> Result<(), StreamError>;
}
