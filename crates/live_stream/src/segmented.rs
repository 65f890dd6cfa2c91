use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, Notify};

use crate::{Headers, PlaylistDecoder, Segment, StreamError};

/// How many segment URLs are remembered for deduplication
const SEEN_CAPACITY: usize = 1000;

/// Bounded memory of segment URLs already queued
#[derive(Default)]
struct SeenSegments {
    order: VecDeque<String>,
    urls: HashSet<String>,
}

impl SeenSegments {
    fn contains(&self, url: &str) -> bool {
        self.urls.contains(url)
    }

    /// Returns false if the URL was queued before
    fn insert(&mut self, url: &str) -> bool {
        if self.urls.contains(url) {
            return false;
        }
        self.urls.insert(url.to_string());
        self.order.push_back(url.to_string());

        // Live playlists only list a rolling window, old URLs never come back
        while self.order.len() > SEEN_CAPACITY {
            if let Some(old) = self.order.pop_front() {
                self.urls.remove(&old);
            }
        }
        true
    }
}

struct QueueState {
    items: VecDeque<Segment>,
    seen: SeenSegments,
    closed: bool,
}

struct QueueInner {
    capacity: usize,
    state: Mutex<QueueState>,
    /// A segment was queued or the queue closed
    ready: Notify,
    /// A slot was freed or the queue closed
    space: Notify,
}

/// Segment queue between a playlist poller and a downloader.
///
/// The queue belongs to a session and outlives a single capture run: segments
/// still queued when a file rotates are picked up by the next run, and a URL
/// that was queued once is never queued again until [`SegmentQueue::clear`].
///
/// It is bounded, so `push` waits for the consumer instead of dropping.
/// [`SegmentQueue::close`] marks the end of the sequence; the consumer still
/// drains what is queued before it sees the end.
#[derive(Clone)]
pub struct SegmentQueue {
    inner: Arc<QueueInner>,
}

impl SegmentQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                capacity: capacity.max(1),
                state: Mutex::new(QueueState {
                    items: VecDeque::new(),
                    seen: SeenSegments::default(),
                    closed: false,
                }),
                ready: Notify::new(),
                space: Notify::new(),
            }),
        }
    }

    /// Queue a segment, waiting while the queue is full.
    ///
    /// Returns `Ok(false)` without queueing if the URL was queued before.
    /// Gives the segment back if the queue is closed.
    pub async fn push(&self, segment: Segment) -> Result<bool, Segment> {
        loop {
            {
                let mut state = self.lock();
                if state.closed {
                    return Err(segment);
                }
                if state.seen.contains(&segment.url) {
                    return Ok(false);
                }
                if state.items.len() < self.inner.capacity {
                    state.seen.insert(&segment.url);
                    state.items.push_back(segment);
                    drop(state);
                    self.inner.ready.notify_one();
                    return Ok(true);
                }
            }
            self.inner.space.notified().await;
        }
    }

    /// Next queued segment, or `None` once the queue is closed and drained
    pub async fn recv(&self) -> Option<Segment> {
        loop {
            {
                let mut state = self.lock();
                if let Some(segment) = state.items.pop_front() {
                    drop(state);
                    self.inner.space.notify_one();
                    return Some(segment);
                }
                if state.closed {
                    return None;
                }
            }
            self.inner.ready.notified().await;
        }
    }

    /// Mark the end of the segment sequence
    pub fn close(&self) {
        self.lock().closed = true;
        self.inner.ready.notify_one();
        self.inner.space.notify_one();
    }

    /// Accept segments again, keeping what is queued and remembered
    pub fn reopen(&self) {
        self.lock().closed = false;
    }

    /// Forget queued and remembered segments, for a capture starting over
    pub fn clear(&self) {
        let mut state = self.lock();
        state.items.clear();
        state.seen = SeenSegments::default();
        state.closed = false;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Segments queued and not yet taken
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Re-fetches a live playlist and queues every newly listed segment
pub struct PlaylistPoller {
    decoder: Arc<dyn PlaylistDecoder>,
    url: String,
    headers: Headers,
    interval: Duration,
}

impl PlaylistPoller {
    pub fn new(
        decoder: Arc<dyn PlaylistDecoder>,
        url: impl Into<String>,
        headers: Headers,
        interval: Duration,
    ) -> Self {
        Self {
            decoder,
            url: url.into(),
            headers,
            interval,
        }
    }

    /// Poll until the playlist runs dry, decoding fails or the queue closes.
    ///
    /// An empty playlist closes `segments`. A decode failure is reported once
    /// on `errors` and leaves `segments` open.
    pub async fn run(self, segments: SegmentQueue, errors: mpsc::Sender<StreamError>) {
        loop {
            let playlist = match self.decoder.decode(&self.url, &self.headers).await {
                Ok(playlist) => playlist,
                Err(e) => {
                    log::error!("Failed to decode playlist {}: {}", self.url, e);
                    let _ = errors.send(StreamError::Decode(Box::new(e))).await;
                    return;
                }
            };

            if playlist.is_empty() {
                log::info!("Playlist has no segments, stream ended: {}", self.url);
                segments.close();
                return;
            }

            let mut fresh = 0usize;
            for segment in playlist {
                match segments.push(segment).await {
                    Ok(true) => fresh += 1,
                    Ok(false) => {}
                    Err(_) => {
                        log::debug!("Segment queue closed, stop polling {}", self.url);
                        return;
                    }
                }
            }
            log::debug!("Playlist refreshed with {} new segments", fresh);

            tokio::time::sleep(self.interval).await;
        }
    }
}
