use std::sync::Arc;
use std::time::Duration;

use live_stream::{
    Downloader, PlaylistDecoder, SessionParams, StreamKind, StreamSession, Termination,
};

use crate::{
    capturing_key, gen_caption, human_bytes, try_get_anchor_info, AnchorInfo, AnchorSite,
    CaptureOptions, CapturingRegistry, HttpDownloader, RecorderConfig, RecorderError, SiteError,
};

/// Drives live captures for anchors.
///
/// Each `start_*` call runs one capture to completion: it returns once the
/// anchor is offline, already being captured by another call, or capture
/// failed. Calls for different anchors may run concurrently; calls for the
/// same anchor are deduplicated through the shared [`CapturingRegistry`].
pub struct Recorder {
    config: RecorderConfig,
    registry: CapturingRegistry,
    decoder: Arc<dyn PlaylistDecoder>,
    downloader: Arc<dyn Downloader>,
}

impl Recorder {
    pub fn new(
        config: RecorderConfig,
        decoder: Arc<dyn PlaylistDecoder>,
        downloader: Arc<dyn Downloader>,
    ) -> Self {
        Self {
            config,
            registry: CapturingRegistry::new(),
            decoder,
            downloader,
        }
    }

    /// Recorder writing through [`HttpDownloader`]
    pub fn with_http_downloader(
        config: RecorderConfig,
        decoder: Arc<dyn PlaylistDecoder>,
    ) -> Result<Self, RecorderError> {
        let downloader = Arc::new(HttpDownloader::new(config.clone())?);
        Ok(Self::new(config, decoder, downloader))
    }

    /// Share a registry with other recorders
    pub fn with_registry(mut self, registry: CapturingRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &CapturingRegistry {
        &self.registry
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Fresh session of the given kind backed by this recorder's collaborators
    pub fn new_session(&self, kind: StreamKind) -> StreamSession {
        match kind {
            StreamKind::Segmented => {
                StreamSession::segmented(self.decoder.clone(), self.downloader.clone())
                    .with_poll_interval(Duration::from_millis(self.config.playlist_interval_ms))
                    .with_segment_buffer(self.config.segment_buffer)
            }
            StreamKind::Continuous => StreamSession::continuous(self.downloader.clone()),
        }
    }

    /// Capture a flv stream, skipping URL detection
    pub async fn start_flv_anchor(
        &self,
        site: &dyn AnchorSite,
        options: &CaptureOptions,
    ) -> Result<(), RecorderError> {
        let session = Arc::new(self.new_session(StreamKind::Continuous));
        self.start_anchor(site, Some(session), options).await
    }

    /// Capture an m3u8 stream, skipping URL detection
    pub async fn start_m3u8_anchor(
        &self,
        site: &dyn AnchorSite,
        options: &CaptureOptions,
    ) -> Result<(), RecorderError> {
        let session = Arc::new(self.new_session(StreamKind::Segmented));
        self.start_anchor(site, Some(session), options).await
    }

    /// Capture the anchor's live stream.
    ///
    /// Without a `session` the kind is detected from the stream URL. Every
    /// time the output file fills up the anchor is looked up again and the
    /// same session restarts with the new stream URL.
    pub async fn start_anchor(
        &self,
        site: &dyn AnchorSite,
        session: Option<Arc<StreamSession>>,
        options: &CaptureOptions,
    ) -> Result<(), RecorderError> {
        let anchor = site.anchor();
        let key = capturing_key(anchor);
        let start_date = chrono::Local::now().format("%Y%m%d").to_string();

        // Set once this call holds the registry entry for the key
        let mut owned: Option<Arc<StreamSession>> = None;

        loop {
            let info = match self.resolve(site).await {
                Ok(info) => info,
                Err(e) => {
                    if let Some(current) = owned.take() {
                        self.release(&key, &current).await;
                    }
                    return Err(e.into());
                }
            };

            if !info.is_live {
                log::info!("[{}] {} is not live", info.name, anchor);
                self.registry.remove(&key).await;
                if let Some(current) = owned.take() {
                    current.stop();
                }
                return Ok(());
            }

            let current = match &owned {
                Some(current) => current.clone(),
                None => {
                    let candidate = match &session {
                        Some(given) => given.clone(),
                        None => Arc::new(self.new_session(StreamKind::classify(&info.stream_url)?)),
                    };
                    // Only the run holding the registry entry may touch the session
                    if let Err(existing) = self.registry.try_insert(&key, candidate.clone()).await {
                        self.log_in_progress(&info, site, &existing, options);
                        return Ok(());
                    }
                    candidate.clear_history();
                    owned = Some(candidate.clone());
                    candidate
                }
            };

            current.reset(SessionParams {
                title: gen_caption(&info.name, site.plat_name(), &start_date, &info.title),
                stream_url: info.stream_url.clone(),
                headers: site.stream_headers(),
                path: options.path.clone(),
                size_threshold: options.size_threshold,
                handler: options.handler.clone(),
            });

            log::info!("Start capturing [{}] {} ({})", info.name, anchor, current.kind());
            let mut signals = match current.start().await {
                Ok(signals) => signals,
                Err(e) => {
                    self.release(&key, &current).await;
                    return Err(e.into());
                }
            };

            match signals.wait().await {
                Termination::Restart => {
                    log::info!(
                        "[{}] {} reached {}, continuing in a new file",
                        info.name,
                        anchor,
                        human_bytes(options.size_threshold)
                    );
                }
                Termination::Ended => {
                    log::info!("[{}] {} stream ended, capture finished", info.name, anchor);
                    self.release(&key, &current).await;
                    return Ok(());
                }
                Termination::Failed(err) => {
                    let recheck = self.resolve(site).await;
                    self.release(&key, &current).await;
                    return match recheck {
                        Ok(info) if !info.is_live => {
                            log::info!(
                                "[{}] {} went offline, capture finished ({})",
                                info.name,
                                anchor,
                                err
                            );
                            Ok(())
                        }
                        Ok(_) => Err(err.into()),
                        Err(e) => {
                            log::warn!("Could not recheck {} after capture error: {}", anchor, e);
                            Err(err.into())
                        }
                    };
                }
            }
        }
    }

    async fn resolve(&self, site: &dyn AnchorSite) -> Result<AnchorInfo, SiteError> {
        try_get_anchor_info(
            site,
            self.config.max_info_retries,
            Duration::from_millis(self.config.retry_delay_ms),
        )
        .await
    }

    /// Stop a session this call owns and drop its registry entry
    async fn release(&self, key: &str, session: &Arc<StreamSession>) {
        session.stop();
        self.registry.remove_session(key, session).await;
    }

    fn log_in_progress(
        &self,
        info: &AnchorInfo,
        site: &dyn AnchorSite,
        existing: &StreamSession,
        options: &CaptureOptions,
    ) {
        log::info!(
            "[{}] {} is already being captured, {}/{} written",
            info.name,
            site.anchor(),
            human_bytes(existing.bytes_written()),
            human_bytes(options.size_threshold)
        );
    }
}
