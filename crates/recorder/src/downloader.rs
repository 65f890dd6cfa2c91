use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;

use live_stream::{CaptureEnd, CaptureJob, Downloader, Headers, SegmentQueue, StreamCapture, StreamError};

use crate::{RecorderConfig, StorageManager};

/// Downloader writing live streams to disk over HTTP
pub struct HttpDownloader {
    /// Client for segments, bounded by the download timeout
    client: reqwest::Client,
    /// Client for continuous streams, which stay open for hours
    stream_client: reqwest::Client,
    config: RecorderConfig,
    storage: StorageManager,
}

impl HttpDownloader {
    pub fn new(config: RecorderConfig) -> Result<Self, StreamError> {
        let client = Self::client_builder(&config)
            .timeout(Duration::from_secs(config.download_timeout))
            .build()?;
        let stream_client = Self::client_builder(&config).build()?;

        Ok(Self {
            client,
            stream_client,
            config,
            storage: StorageManager::new(),
        })
    }

    fn client_builder(config: &RecorderConfig) -> reqwest::ClientBuilder {
        let builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .user_agent(config.user_agent.as_str());
        if config.use_system_proxy {
            builder
        } else {
            builder.no_proxy()
        }
    }

    async fn get(
        &self,
        client: &reqwest::Client,
        url: &str,
        headers: &Headers,
    ) -> Result<reqwest::Response, StreamError> {
        let mut request = client.get(url);
        for (key, value) in headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(StreamError::DownloadError(format!(
                "HTTP error {}: {}",
                response.status(),
                url
            )));
        }
        Ok(response)
    }

    /// Fetch one segment body, retrying with a growing delay
    async fn download_segment(&self, url: &str, headers: &Headers) -> Result<Vec<u8>, StreamError> {
        let mut retry_count = 0;
        loop {
            match self.fetch_segment(url, headers).await {
                Ok(body) => return Ok(body),
                Err(e) if retry_count < self.config.max_retry_count => {
                    retry_count += 1;
                    log::warn!(
                        "Download attempt {} failed for {}: {}, retrying in {}ms",
                        retry_count,
                        url,
                        e,
                        self.config.retry_delay_ms * retry_count as u64
                    );
                    tokio::time::sleep(Duration::from_millis(
                        self.config.retry_delay_ms * retry_count as u64,
                    ))
                    .await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_segment(&self, url: &str, headers: &Headers) -> Result<Vec<u8>, StreamError> {
        let download = async {
            let response = self.get(&self.client, url, headers).await?;
            let body = response.bytes().await?;
            Ok::<_, StreamError>(body.to_vec())
        };

        let body = timeout(Duration::from_secs(self.config.download_timeout), download)
            .await
            .map_err(|_| StreamError::DownloadError(format!("Download timeout: {}", url)))??;

        if body.is_empty() {
            return Err(StreamError::DownloadError(format!("Empty segment: {}", url)));
        }
        Ok(body)
    }

    async fn copy_segments(
        &self,
        job: &CaptureJob,
        segments: &SegmentQueue,
        file: &mut File,
        written: &mut u64,
    ) -> Result<CaptureEnd, StreamError> {
        while let Some(segment) = segments.recv().await {
            let body = self.download_segment(&segment.url, &job.headers).await?;
            file.write_all(&body).await?;
            *written += body.len() as u64;
            job.add_bytes(body.len() as u64);
            log::debug!("Downloaded segment {} ({} bytes)", segment.file_name(), body.len());

            if job.should_rotate(*written) {
                return Ok(CaptureEnd::Rotate);
            }
        }
        Ok(CaptureEnd::Closed)
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn prepare(&self, job: &CaptureJob) -> Result<(), StreamError> {
        self.storage.create_work_dir(&job.path).await?;
        Ok(())
    }

    async fn open_stream(&self, job: &CaptureJob) -> Result<Box<dyn StreamCapture>, StreamError> {
        let response = self.get(&self.stream_client, &job.stream_url, &job.headers).await?;
        log::debug!("Stream connected: {} ({})", job.stream_url, response.status());
        Ok(Box::new(HttpStream {
            response,
            storage: self.storage.clone(),
        }))
    }

    async fn capture_segments(
        &self,
        job: CaptureJob,
        segments: SegmentQueue,
    ) -> Result<CaptureEnd, StreamError> {
        let (path, mut file) = self.storage.create_file(&job.path, job.kind.file_extension()).await?;
        let mut written = 0u64;

        let result = self.copy_segments(&job, &segments, &mut file, &mut written).await;
        finish(&self.storage, &job, file, &path, written).await;
        result
    }
}

/// A continuous stream response, opened and waiting to be written
struct HttpStream {
    response: reqwest::Response,
    storage: StorageManager,
}

#[async_trait]
impl StreamCapture for HttpStream {
    async fn capture(self: Box<Self>, job: CaptureJob) -> Result<CaptureEnd, StreamError> {
        let HttpStream { response, storage } = *self;
        let (path, mut file) = storage.create_file(&job.path, job.kind.file_extension()).await?;
        let mut written = 0u64;

        let result = copy_stream(&job, response, &mut file, &mut written).await;
        finish(&storage, &job, file, &path, written).await;
        result
    }
}

async fn copy_stream(
    job: &CaptureJob,
    response: reqwest::Response,
    file: &mut File,
    written: &mut u64,
) -> Result<CaptureEnd, StreamError> {
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        *written += chunk.len() as u64;
        job.add_bytes(chunk.len() as u64);

        if job.should_rotate(*written) {
            return Ok(CaptureEnd::Rotate);
        }
    }
    Ok(CaptureEnd::Closed)
}

/// Flush a file and pass it on, or drop it if nothing was written
async fn finish(storage: &StorageManager, job: &CaptureJob, mut file: File, path: &Path, written: u64) {
    if let Err(e) = file.flush().await {
        log::error!("Failed to flush {:?}: {}", path, e);
    }
    drop(file);

    if written == 0 {
        if let Err(e) = storage.discard_if_empty(path).await {
            log::warn!("Failed to remove empty file {:?}: {}", path, e);
        }
        return;
    }

    log::info!("Finished capture file {:?} ({} bytes)", path, written);
    job.finish_file(path);
}

#[cfg(test)]
mod tests {
    use super::*;
    use live_stream::{Handler, Segment, SessionParams, StreamKind, StreamSession};
    use std::path::PathBuf;
    use std::sync::atomic::AtomicU64;
    use std::sync::Arc;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    /// Serve the same response to every connection
    async fn serve(status: &'static str, body: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let body = body.clone();
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let _ = socket.read(&mut buf).await;
                    let head = format!(
                        "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        status,
                        body.len()
                    );
                    let _ = socket.write_all(head.as_bytes()).await;
                    let _ = socket.write_all(&body).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        format!("http://{}", addr)
    }

    struct ChannelHandler(mpsc::UnboundedSender<(PathBuf, String)>);

    #[async_trait]
    impl Handler for ChannelHandler {
        async fn handle(&self, file: &Path, caption: &str) -> Result<(), StreamError> {
            let _ = self.0.send((file.to_path_buf(), caption.to_string()));
            Ok(())
        }
    }

    struct FailingHandler(mpsc::UnboundedSender<PathBuf>);

    #[async_trait]
    impl Handler for FailingHandler {
        async fn handle(&self, file: &Path, _caption: &str) -> Result<(), StreamError> {
            let _ = self.0.send(file.to_path_buf());
            Err(StreamError::DownloadError("upload rejected".into()))
        }
    }

    fn params(url: String, dir: &Path, threshold: u64, handler: Option<Arc<dyn Handler>>) -> SessionParams {
        SessionParams {
            title: "#Alice #bilibili 20261019\ntest".into(),
            stream_url: url,
            headers: Headers::from([("Referer".to_string(), "https://live.example.com/".to_string())]),
            path: dir.to_path_buf(),
            size_threshold: threshold,
            handler,
        }
    }

    fn job(kind: StreamKind, url: String, dir: &Path, threshold: u64, handler: Option<Arc<dyn Handler>>) -> CaptureJob {
        CaptureJob::new(kind, &params(url, dir, threshold, handler), Arc::new(AtomicU64::new(0)))
    }

    async fn capture_stream(job: &CaptureJob) -> Result<CaptureEnd, StreamError> {
        let stream = downloader().open_stream(job).await?;
        stream.capture(job.clone()).await
    }

    fn downloader() -> HttpDownloader {
        HttpDownloader::new(RecorderConfig {
            retry_delay_ms: 10,
            max_retry_count: 1,
            use_system_proxy: false,
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn continuous_stream_rotates_at_threshold() {
        let base = serve("200 OK", vec![7u8; 64 * 1024]).await;
        let dir = tempfile::tempdir().unwrap();
        let job = job(StreamKind::Continuous, format!("{}/live.flv", base), dir.path(), 4096, None);

        let end = capture_stream(&job).await.unwrap();

        assert_eq!(end, CaptureEnd::Rotate);
        assert!(job.bytes_written() >= 4096);
        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn continuous_stream_hands_finished_file_to_handler() {
        let base = serve("200 OK", vec![1u8; 10_000]).await;
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let job = job(
            StreamKind::Continuous,
            format!("{}/live.flv", base),
            dir.path(),
            0,
            Some(Arc::new(ChannelHandler(tx))),
        );

        let end = capture_stream(&job).await.unwrap();
        assert_eq!(end, CaptureEnd::Closed);
        assert_eq!(job.bytes_written(), 10_000);

        let (file, caption) = rx.recv().await.unwrap();
        assert_eq!(caption, "#Alice #bilibili 20261019\ntest");
        assert_eq!(file.extension().and_then(|e| e.to_str()), Some("flv"));
        assert_eq!(std::fs::metadata(&file).unwrap().len(), 10_000);
    }

    #[tokio::test]
    async fn handler_failure_does_not_fail_the_capture() {
        let base = serve("200 OK", vec![5u8; 2048]).await;
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let job = job(
            StreamKind::Continuous,
            format!("{}/live.flv", base),
            dir.path(),
            0,
            Some(Arc::new(FailingHandler(tx))),
        );

        let end = capture_stream(&job).await.unwrap();
        assert_eq!(end, CaptureEnd::Closed);

        let file = rx.recv().await.unwrap();
        assert_eq!(std::fs::metadata(&file).unwrap().len(), 2048);
    }

    #[tokio::test]
    async fn segments_are_appended_until_queue_closes() {
        let base = serve("200 OK", vec![9u8; 100]).await;
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut handled) = mpsc::unbounded_channel();
        let job = job(
            StreamKind::Segmented,
            format!("{}/index.m3u8", base),
            dir.path(),
            0,
            Some(Arc::new(ChannelHandler(tx))),
        );

        let queue = SegmentQueue::new(4);
        for i in 0..3 {
            queue.push(Segment::new(format!("{}/{}.ts", base, i))).await.unwrap();
        }
        queue.close();

        let end = downloader().capture_segments(job.clone(), queue).await.unwrap();
        assert_eq!(end, CaptureEnd::Closed);
        assert_eq!(job.bytes_written(), 300);

        let (file, _) = handled.recv().await.unwrap();
        assert_eq!(file.extension().and_then(|e| e.to_str()), Some("ts"));
        assert_eq!(std::fs::metadata(&file).unwrap().len(), 300);
    }

    #[tokio::test]
    async fn http_errors_fail_opening_the_stream() {
        let base = serve("404 Not Found", Vec::new()).await;
        let dir = tempfile::tempdir().unwrap();
        let job = job(StreamKind::Continuous, format!("{}/live.flv", base), dir.path(), 0, None);

        let err = capture_stream(&job).await.unwrap_err();
        assert!(matches!(err, StreamError::DownloadError(ref msg) if msg.contains("404")));
    }

    #[tokio::test]
    async fn missing_stream_fails_session_start() {
        let base = serve("404 Not Found", Vec::new()).await;
        let dir = tempfile::tempdir().unwrap();
        let session = StreamSession::continuous(Arc::new(downloader()));
        session.reset(params(format!("{}/live.flv", base), dir.path(), 0, None));

        let err = session.start().await.err().expect("start fails");
        assert!(matches!(err, StreamError::Prepare(_)));
        assert!(err.to_string().starts_with("准备录制直播流时出错"));
        assert!(err.to_string().contains("404"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn rotation_leaves_remaining_segments_queued() {
        let base = serve("200 OK", vec![3u8; 100]).await;
        let dir = tempfile::tempdir().unwrap();
        let job = job(StreamKind::Segmented, format!("{}/index.m3u8", base), dir.path(), 200, None);

        let queue = SegmentQueue::new(4);
        for i in 0..3 {
            queue.push(Segment::new(format!("{}/{}.ts", base, i))).await.unwrap();
        }

        let end = downloader().capture_segments(job.clone(), queue.clone()).await.unwrap();
        assert_eq!(end, CaptureEnd::Rotate);
        assert_eq!(job.bytes_written(), 200);
        assert_eq!(queue.recv().await.unwrap().url, format!("{}/2.ts", base));
    }

    #[tokio::test]
    async fn closed_queue_without_segments_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let job = job(StreamKind::Segmented, "http://127.0.0.1:9/index.m3u8".into(), dir.path(), 0, None);
        let queue = SegmentQueue::new(1);
        queue.close();

        let end = downloader().capture_segments(job, queue).await.unwrap();
        assert_eq!(end, CaptureEnd::Closed);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
