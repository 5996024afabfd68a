//! MJPEG stream source
//!
//! Pulls an upstream MJPEG feed, cuts it into frames and hands a copy of each
//! frame to every subscriber queue.
//!
//! ```text
//!   open feed ──► read chunk ──► extract JPEGs ──► decode ──► rate check ──► publish
//!       ▲                                                          │
//!       │                                         too slow / error │
//!       └──────── sleep retry_interval ◄──── publish Gap ◄─────────┘
//! ```
//!
//! A camera that cannot keep up with real time starts queueing frames on its
//! side, and the viewer-facing delay then grows without bound. The framerate
//! floor catches that: a connection whose measured rate drops below
//! `min_fps` is torn down and reopened, which flushes the backlog.

use std::sync::atomic::{AtomicU64, Ordering};

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{ConfigError, UpstreamError};
use crate::media::{Frame, JpegExtractor};
use crate::stats::{SourceState, SourceStatus};

use super::config::SourceConfig;
use super::consumer::{self, ConsumerQueue, SourceEvent, StreamConsumer};
use super::framerate::{FramerateWindow, RateCheck, DEFAULT_WINDOW};
use super::upstream::Upstream;

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Source of decoded frames pulled from one upstream feed
///
/// Subscribe every consumer first, then [`start`](Self::start) it. Starting
/// consumes the source, so it can only be started once.
pub struct StreamSource<U: Upstream> {
    id: u64,
    config: SourceConfig,
    upstream: U,
    subscribers: Vec<ConsumerQueue>,
    status: watch::Sender<SourceStatus>,
    cancel: CancellationToken,
}

impl<U: Upstream> StreamSource<U> {
    /// Create a source, validating its configuration
    pub fn new(config: SourceConfig, upstream: U) -> Result<Self, ConfigError> {
        config.validate()?;

        let id = NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed);
        let (status, _) = watch::channel(SourceStatus::new());

        tracing::info!(
            source_id = id,
            url = upstream.feed_url(),
            width = config.width,
            height = config.height,
            quality = config.quality,
            min_fps = config.min_fps,
            "Creating source stream"
        );

        Ok(Self {
            id,
            config,
            upstream,
            subscribers: Vec::new(),
            status,
            cancel: CancellationToken::new(),
        })
    }

    /// Source identifier, used in logs
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Source configuration
    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    /// Requested frame width
    pub fn width(&self) -> u16 {
        self.config.width
    }

    /// Requested frame height
    pub fn height(&self) -> u16 {
        self.config.height
    }

    /// Add a subscriber with its own queue
    ///
    /// Dropping the returned consumer unsubscribes it.
    pub fn subscribe(&mut self) -> StreamConsumer {
        let (queue, consumer) =
            consumer::channel(self.config.queue_policy, self.config.stall_timeout);
        self.subscribers.push(queue);

        tracing::debug!(
            source_id = self.id,
            subscribers = self.subscribers.len(),
            "Subscriber added"
        );

        consumer
    }

    /// Number of subscribers, including ones not yet pruned
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Watch the source status
    pub fn status(&self) -> watch::Receiver<SourceStatus> {
        self.status.subscribe()
    }

    /// Push a copy of `frame` to every subscriber
    pub fn publish_frame(&mut self, frame: Frame) {
        self.publish(SourceEvent::Frame(frame));
    }

    /// Tell every subscriber the feed was interrupted
    pub fn publish_gap(&mut self) {
        self.publish(SourceEvent::Gap);
    }

    fn publish(&mut self, event: SourceEvent) {
        let before = self.subscribers.len();
        self.subscribers.retain(|queue| !queue.is_closed());
        if self.subscribers.len() != before {
            tracing::debug!(
                source_id = self.id,
                removed = before - self.subscribers.len(),
                "Pruned dropped subscribers"
            );
        }

        for queue in &self.subscribers {
            queue.push(event.clone());
        }

        let subscribers = self.subscribers.len();
        let is_frame = matches!(event, SourceEvent::Frame(_));
        self.status.send_modify(|status| {
            status.subscribers = subscribers;
            if is_frame {
                status.frames_published += 1;
            }
        });
    }

    /// Spawn the ingestion task
    pub fn start(self) -> SourceHandle {
        let handle = SourceHandle {
            id: self.id,
            status: self.status.subscribe(),
            cancel: self.cancel.clone(),
            task: None,
        };

        tracing::debug!(source_id = self.id, "Starting streaming task");
        let task = tokio::spawn(self.run());

        SourceHandle {
            task: Some(task),
            ..handle
        }
    }

    async fn run(mut self) {
        let cancel = self.cancel.clone();

        loop {
            self.set_state(SourceState::Connecting);

            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.ingest() => result,
            };

            let reason = match result {
                Ok(()) => "feed ended".to_string(),
                Err(e) => e.to_string(),
            };

            let retry = self.config.retry_interval;
            tracing::debug!(
                source_id = self.id,
                reason = %reason,
                retry_secs = retry.as_secs_f64(),
                "Finished stream, retrying"
            );

            // Subscribers must not mistake the silence for a stall
            self.publish_gap();
            self.status.send_modify(|status| {
                status.state = SourceState::Retrying;
                status.framerate = None;
                status.reconnects += 1;
                status.last_error = Some(reason);
            });

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(retry) => {}
            }
        }

        self.publish_gap();
        self.set_state(SourceState::Stopped);
        tracing::info!(source_id = self.id, "Source stopped");
    }

    /// Run one connection until it fails or turns out too slow
    async fn ingest(&mut self) -> Result<(), UpstreamError> {
        tracing::info!(
            source_id = self.id,
            url = self.upstream.feed_url(),
            "Attempting to connect to stream"
        );

        if !self.upstream.is_connected() {
            tracing::info!(source_id = self.id, "Camera not connected");
            return Err(UpstreamError::NotConnected);
        }

        let read_timeout = self.config.read_timeout;
        let mut body = self.upstream.open(read_timeout).await?;

        self.set_state(SourceState::Measuring);

        let mut extractor = JpegExtractor::with_max_frame_size(self.config.max_frame_size);
        let mut window = FramerateWindow::new(DEFAULT_WINDOW);

        loop {
            let chunk = match tokio::time::timeout(read_timeout, body.next()).await {
                Err(_) => return Err(UpstreamError::Timeout(read_timeout)),
                Ok(None) => return Ok(()),
                Ok(Some(chunk)) => chunk?,
            };

            extractor.push(&chunk).map_err(UpstreamError::Decode)?;

            while let Some(jpeg) = extractor.next_frame() {
                let frame = Frame::decode(jpeg).map_err(UpstreamError::Decode)?;

                if let Some(fps) = window.record(Instant::now()) {
                    tracing::debug!(source_id = self.id, fps = fps, "Framerate updated");
                    self.status.send_modify(|status| status.framerate = Some(fps));
                }

                match window.check(self.config.min_fps) {
                    RateCheck::Unknown => {
                        // Unknown rate: hold back rather than risk relaying a backlog
                        self.status.send_modify(|status| status.frames_withheld += 1);
                    }
                    RateCheck::TooLow(fps) => {
                        tracing::debug!(
                            source_id = self.id,
                            fps = fps,
                            min_fps = self.config.min_fps,
                            "Stopping because of low framerate"
                        );
                        return Err(UpstreamError::LowFramerate {
                            fps,
                            min_fps: self.config.min_fps,
                        });
                    }
                    RateCheck::Acceptable(_) => {
                        if self.status.borrow().state != SourceState::Streaming {
                            self.set_state(SourceState::Streaming);
                        }
                        self.publish_frame(frame);
                    }
                }
            }
        }
    }

    fn set_state(&self, state: SourceState) {
        self.status.send_modify(|status| status.state = state);
    }
}

/// Handle to a running source
#[derive(Debug)]
pub struct SourceHandle {
    id: u64,
    status: watch::Receiver<SourceStatus>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SourceHandle {
    /// Source identifier
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current status snapshot
    pub fn status(&self) -> SourceStatus {
        self.status.borrow().clone()
    }

    /// Watch status changes
    pub fn watch_status(&self) -> watch::Receiver<SourceStatus> {
        self.status.clone()
    }

    /// Ask the ingestion task to stop
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Wait for the ingestion task to finish
    pub async fn join(mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!(source_id = self.id, error = %e, "Source task failed");
            }
        }
    }

    /// Whether the ingestion task has finished
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |task| task.is_finished())
    }
}
