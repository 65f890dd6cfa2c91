use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::segmented::PlaylistPoller;
use crate::{
    CaptureEnd, CaptureJob, Downloader, Handler, Headers, PlaylistDecoder, SegmentQueue,
    StreamCapture, StreamError, StreamKind,
};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_SEGMENT_BUFFER: usize = 16;

/// Parameters of one capture run, replaced on every reset
#[derive(Clone)]
pub struct SessionParams {
    pub title: String,
    pub stream_url: String,
    pub headers: Headers,
    /// Directory for output files
    pub path: PathBuf,
    pub size_threshold: u64,
    pub handler: Option<Arc<dyn Handler>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    /// Never configured
    Idle,
    /// Reset with fresh parameters, not started yet
    Ready,
    Capturing,
    Stopped,
}

/// Why a capture run stopped
#[derive(Debug)]
pub enum Termination {
    /// Capture failed; the orchestrator decides whether that means offline
    Failed(StreamError),
    /// The output file is full, capture must restart into a new file
    Restart,
    /// The source ended without error
    Ended,
}

/// Receiving side of a running session's error and restart endpoints
pub struct TerminationSignals {
    errors: mpsc::Receiver<StreamError>,
    restart: mpsc::Receiver<bool>,
}

impl TerminationSignals {
    /// Block until the session reports how it stopped.
    ///
    /// Errors take priority over a pending restart. Both endpoints closing
    /// without a message means the source ended normally.
    pub async fn wait(&mut self) -> Termination {
        tokio::select! {
            biased;
            Some(err) = self.errors.recv() => Termination::Failed(err),
            Some(restart) = self.restart.recv() => {
                if restart {
                    Termination::Restart
                } else {
                    Termination::Ended
                }
            }
            else => Termination::Ended,
        }
    }
}

/// Delivery-specific parts of a session
enum Delivery {
    Segmented {
        decoder: Arc<dyn PlaylistDecoder>,
        poll_interval: Duration,
        /// Shared by every run of this session
        queue: SegmentQueue,
    },
    Continuous,
}

/// Where the downloader reads from in one run
enum Source {
    Segments(SegmentQueue),
    Stream(Box<dyn StreamCapture>),
}

/// Endpoints created by a reset and consumed by the next start
struct Endpoints {
    errors_tx: mpsc::Sender<StreamError>,
    errors_rx: mpsc::Receiver<StreamError>,
    restart_tx: mpsc::Sender<bool>,
    restart_rx: mpsc::Receiver<bool>,
}

struct SessionState {
    phase: SessionPhase,
    params: Option<SessionParams>,
    pending: Option<Endpoints>,
    tasks: Vec<JoinHandle<()>>,
}

impl SessionState {
    fn teardown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.pending = None;
    }
}

/// One live capture, reusable across file rotations.
///
/// Shared behind an `Arc` between the orchestrating run and the capturing
/// registry; progress readers see resets in place.
pub struct StreamSession {
    delivery: Delivery,
    downloader: Arc<dyn Downloader>,
    bytes: Arc<AtomicU64>,
    state: Mutex<SessionState>,
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession").finish_non_exhaustive()
    }
}

impl StreamSession {
    fn new(delivery: Delivery, downloader: Arc<dyn Downloader>) -> Self {
        Self {
            delivery,
            downloader,
            bytes: Arc::new(AtomicU64::new(0)),
            state: Mutex::new(SessionState {
                phase: SessionPhase::Idle,
                params: None,
                pending: None,
                tasks: Vec::new(),
            }),
        }
    }

    /// Session for playlist (m3u8) delivery
    pub fn segmented(decoder: Arc<dyn PlaylistDecoder>, downloader: Arc<dyn Downloader>) -> Self {
        Self::new(
            Delivery::Segmented {
                decoder,
                poll_interval: DEFAULT_POLL_INTERVAL,
                queue: SegmentQueue::new(DEFAULT_SEGMENT_BUFFER),
            },
            downloader,
        )
    }

    /// Session for continuous (flv) delivery
    pub fn continuous(downloader: Arc<dyn Downloader>) -> Self {
        Self::new(Delivery::Continuous, downloader)
    }

    /// Delay between playlist fetches; no effect on continuous sessions
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        if let Delivery::Segmented { poll_interval, .. } = &mut self.delivery {
            *poll_interval = interval;
        }
        self
    }

    /// Capacity of the segment queue; no effect on continuous sessions
    pub fn with_segment_buffer(mut self, capacity: usize) -> Self {
        if let Delivery::Segmented { queue, .. } = &mut self.delivery {
            *queue = SegmentQueue::new(capacity);
        }
        self
    }

    pub fn kind(&self) -> StreamKind {
        match self.delivery {
            Delivery::Segmented { .. } => StreamKind::Segmented,
            Delivery::Continuous => StreamKind::Continuous,
        }
    }

    /// Bytes written since the last reset
    pub fn bytes_written(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn phase(&self) -> SessionPhase {
        self.lock().phase
    }

    pub fn title(&self) -> Option<String> {
        self.lock().params.as_ref().map(|p| p.title.clone())
    }

    pub fn stream_url(&self) -> Option<String> {
        self.lock().params.as_ref().map(|p| p.stream_url.clone())
    }

    pub fn size_threshold(&self) -> u64 {
        self.lock().params.as_ref().map_or(0, |p| p.size_threshold)
    }

    /// Reinitialize for a new capture run.
    ///
    /// Stops anything still running, creates fresh endpoints and clears the
    /// byte counter. Segments already queued or captured are kept, so a run
    /// after a file rotation continues where the previous one stopped.
    pub fn reset(&self, params: SessionParams) {
        let mut state = self.lock();
        state.teardown();

        let (errors_tx, errors_rx) = mpsc::channel(1);
        let (restart_tx, restart_rx) = mpsc::channel(1);
        if let Some(queue) = self.queue() {
            queue.reopen();
        }

        state.pending = Some(Endpoints {
            errors_tx,
            errors_rx,
            restart_tx,
            restart_rx,
        });
        state.params = Some(params);
        state.phase = SessionPhase::Ready;
        self.bytes.store(0, Ordering::Relaxed);
    }

    /// Forget queued and captured segments before a new capture of the stream.
    ///
    /// Runs that follow a file rotation must not call this.
    pub fn clear_history(&self) {
        if let Some(queue) = self.queue() {
            queue.clear();
        }
    }

    /// Begin capturing in the background.
    ///
    /// Returns once the downloader is prepared and, for continuous delivery,
    /// the stream is open; the returned signals report how the run ends.
    pub async fn start(&self) -> Result<TerminationSignals, StreamError> {
        let (params, endpoints) = {
            let mut state = self.lock();
            match (state.params.clone(), state.pending.take()) {
                (Some(params), Some(endpoints)) => (params, endpoints),
                _ => return Err(StreamError::NotConfigured),
            }
        };

        let job = CaptureJob::new(self.kind(), &params, self.bytes.clone());
        self.downloader
            .prepare(&job)
            .await
            .map_err(|e| StreamError::Prepare(Box::new(e)))?;

        let Endpoints {
            errors_tx,
            errors_rx,
            restart_tx,
            restart_rx,
        } = endpoints;

        let mut tasks = Vec::new();
        let source = match &self.delivery {
            Delivery::Segmented {
                decoder,
                poll_interval,
                queue,
            } => {
                let poller = PlaylistPoller::new(
                    decoder.clone(),
                    params.stream_url.clone(),
                    params.headers.clone(),
                    *poll_interval,
                );
                tasks.push(tokio::spawn(poller.run(queue.clone(), errors_tx.clone())));
                Source::Segments(queue.clone())
            }
            Delivery::Continuous => {
                let stream = self
                    .downloader
                    .open_stream(&job)
                    .await
                    .map_err(|e| StreamError::Prepare(Box::new(e)))?;
                Source::Stream(stream)
            }
        };

        log::info!("Starting {} capture: {}", self.kind(), params.stream_url);

        let downloader = self.downloader.clone();
        tasks.push(tokio::spawn(drive(downloader, job, source, errors_tx, restart_tx)));

        let mut state = self.lock();
        state.tasks = tasks;
        state.phase = SessionPhase::Capturing;

        Ok(TerminationSignals {
            errors: errors_rx,
            restart: restart_rx,
        })
    }

    /// Abort background work and close the endpoints
    pub fn stop(&self) {
        let mut state = self.lock();
        state.teardown();
        if let Some(queue) = self.queue() {
            queue.close();
        }
        state.phase = SessionPhase::Stopped;
    }

    fn queue(&self) -> Option<&SegmentQueue> {
        match &self.delivery {
            Delivery::Segmented { queue, .. } => Some(queue),
            Delivery::Continuous => None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.state
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .teardown();
    }
}

/// Run the downloader and translate its outcome into termination signals
async fn drive(
    downloader: Arc<dyn Downloader>,
    job: CaptureJob,
    source: Source,
    errors: mpsc::Sender<StreamError>,
    restart: mpsc::Sender<bool>,
) {
    let result = match source {
        Source::Segments(queue) => downloader.capture_segments(job, queue).await,
        Source::Stream(stream) => stream.capture(job).await,
    };

    match result {
        Ok(CaptureEnd::Rotate) => {
            let _ = restart.send(true).await;
        }
        Ok(CaptureEnd::Closed) => {
            log::debug!("Capture source closed");
        }
        Err(e) => {
            log::error!("Capture failed: {}", e);
            let _ = errors.send(e).await;
        }
    }
}
