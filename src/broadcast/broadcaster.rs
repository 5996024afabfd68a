//! Multi-viewer MJPEG broadcaster
//!
//! One production loop per route. Each frame is framed as a multipart part
//! once, and the same `Bytes` chunk is queued on every attached viewer.
//!
//! ```text
//!                         ┌──► ViewerHandle ──► send loop ──► socket
//!   FrameFeed ──► encode ─┼──► ViewerHandle ──► send loop ──► socket
//!                         └──► ViewerHandle ──► send loop ──► socket
//! ```
//!
//! While the feed is down the loop alternates between the placeholder and a
//! short retry sleep, so viewers keep receiving images.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::media::{multipart, Frame};
use crate::stats::{BroadcastState, BroadcastStatus};

use super::transform::FrameFeed;
use super::viewer::{ViewerConfig, ViewerConnection, ViewerHandle};

/// Broadcaster options
#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    /// Multipart boundary token
    pub boundary: String,

    /// Pause between placeholder rounds while the feed is down
    pub retry_interval: Duration,

    /// Options for each attached viewer
    pub viewer: ViewerConfig,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            boundary: multipart::DEFAULT_BOUNDARY.to_string(),
            retry_interval: Duration::from_secs(1),
            viewer: ViewerConfig::default(),
        }
    }
}

impl BroadcastConfig {
    /// Set the boundary token
    pub fn boundary(mut self, boundary: impl Into<String>) -> Self {
        self.boundary = boundary.into();
        self
    }

    /// Set the placeholder retry interval
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Set the viewer options
    pub fn viewer(mut self, viewer: ViewerConfig) -> Self {
        self.viewer = viewer;
        self
    }
}

/// Serves one frame feed to any number of viewers
pub struct FrameBroadcaster<F: FrameFeed> {
    key: String,
    feed: F,
    config: BroadcastConfig,
    viewers: Vec<ViewerHandle>,
    attach_tx: mpsc::UnboundedSender<ViewerHandle>,
    attach_rx: mpsc::UnboundedReceiver<ViewerHandle>,
    status: watch::Sender<BroadcastStatus>,
    cancel: CancellationToken,
}

impl<F: FrameFeed> FrameBroadcaster<F> {
    /// Create a broadcaster for route `key`
    pub fn new(key: impl Into<String>, feed: F, config: BroadcastConfig) -> Self {
        let (attach_tx, attach_rx) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(BroadcastStatus::new());

        Self {
            key: key.into(),
            feed,
            config,
            viewers: Vec::new(),
            attach_tx,
            attach_rx,
            status,
            cancel: CancellationToken::new(),
        }
    }

    /// Route key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Spawn the production loop
    pub fn start(self) -> BroadcasterHandle {
        let handle = BroadcasterHandle {
            key: self.key.clone(),
            boundary: self.config.boundary.clone(),
            viewer_config: self.config.viewer.clone(),
            attach: self.attach_tx.clone(),
            status: self.status.subscribe(),
            cancel: self.cancel.clone(),
            next_viewer_id: AtomicU64::new(1),
        };

        tracing::info!(
            stream = %self.key,
            boundary = %self.config.boundary,
            "Starting broadcaster"
        );
        tokio::spawn(self.run());

        handle
    }

    async fn run(mut self) {
        let cancel = self.cancel.clone();

        'produce: loop {
            self.send_placeholder();

            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => break 'produce,
                    next = self.feed.next_frame() => next,
                };

                match next {
                    Ok(Some(frame)) => self.send_frame(&frame),
                    Ok(None) => {
                        tracing::debug!(stream = %self.key, "Frame feed interrupted");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(stream = %self.key, error = %e, "Frame feed failed");
                        self.status.send_modify(|status| status.feed_errors += 1);
                        break;
                    }
                }
            }

            if self.status.borrow().state == BroadcastState::Streaming {
                tracing::info!(stream = %self.key, "Source down, sending placeholder");
                self.set_state(BroadcastState::SourceDown);
            }

            self.send_placeholder();

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.retry_interval) => {}
            }
        }

        self.viewers.clear();
        self.set_state(BroadcastState::Stopped);
        tracing::info!(stream = %self.key, "Broadcaster stopped");
    }

    fn send_frame(&mut self, frame: &Frame) {
        if self.status.borrow().state != BroadcastState::Streaming {
            tracing::info!(
                stream = %self.key,
                width = frame.width,
                height = frame.height,
                "Streaming live frames"
            );
            self.set_state(BroadcastState::Streaming);
        }

        self.broadcast(multipart::encode_part(&self.config.boundary, frame));
        self.status.send_modify(|status| status.frames_sent += 1);
    }

    fn send_placeholder(&mut self) {
        let frame = self.feed.placeholder();
        self.broadcast(multipart::encode_part(&self.config.boundary, &frame));
        self.status.send_modify(|status| status.placeholders_sent += 1);
    }

    /// Queue `chunk` on every viewer, pruning the ones that have gone
    fn broadcast(&mut self, chunk: Bytes) {
        while let Ok(viewer) = self.attach_rx.try_recv() {
            tracing::debug!(stream = %self.key, viewer_id = viewer.id(), "Viewer joined");
            self.viewers.push(viewer);
        }

        let before = self.viewers.len();
        self.viewers.retain(|viewer| viewer.send(chunk.clone()));

        let viewers = self.viewers.len();
        if viewers < before {
            tracing::debug!(
                stream = %self.key,
                removed = before - viewers,
                viewers = viewers,
                "Pruned viewers"
            );
        }

        self.status.send_modify(|status| status.viewers = viewers);
    }

    fn set_state(&self, state: BroadcastState) {
        self.status.send_modify(|status| status.state = state);
    }
}

/// Handle to a running broadcaster, used to attach viewers
#[derive(Debug)]
pub struct BroadcasterHandle {
    key: String,
    boundary: String,
    viewer_config: ViewerConfig,
    attach: mpsc::UnboundedSender<ViewerHandle>,
    status: watch::Receiver<BroadcastStatus>,
    cancel: CancellationToken,
    next_viewer_id: AtomicU64,
}

impl BroadcasterHandle {
    /// Route key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Multipart boundary token
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Whether new viewers can attach
    pub fn is_broadcasting(&self) -> bool {
        !self.cancel.is_cancelled() && self.status.borrow().state.is_broadcasting()
    }

    /// Current status snapshot
    pub fn status(&self) -> BroadcastStatus {
        self.status.borrow().clone()
    }

    /// Watch status changes
    pub fn watch_status(&self) -> watch::Receiver<BroadcastStatus> {
        self.status.clone()
    }

    /// Turn `writer` into a viewer of this broadcaster
    ///
    /// The multipart preamble is queued ahead of any frame. Returns `None`
    /// if the broadcaster has stopped.
    pub fn attach<W>(&self, writer: W) -> Option<ViewerHandle>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        if !self.is_broadcasting() {
            return None;
        }

        let id = self.next_viewer_id.fetch_add(1, Ordering::Relaxed);
        let viewer =
            ViewerConnection::spawn(id, writer, self.viewer_config.clone(), self.cancel.clone());
        viewer.send(multipart::preamble(&self.boundary));

        if self.attach.send(viewer.clone()).is_err() {
            return None;
        }

        tracing::debug!(stream = %self.key, viewer_id = id, "Viewer attached");
        Some(viewer)
    }

    /// Stop the production loop and kill every viewer
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Wait until the production loop has stopped
    pub async fn stopped(&self) {
        let mut status = self.status.clone();
        // An error means the loop is gone, which is just as stopped
        let _ = status
            .wait_for(|s| s.state == BroadcastState::Stopped)
            .await;
    }
}
