//! Status snapshots for sources, broadcasters and the server
//!
//! Each long-running task owns its own counters and publishes copies of them;
//! readers only ever see an immutable snapshot.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lifecycle of a stream source's ingestion task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    /// Created, not started
    Idle,
    /// Opening the upstream feed
    Connecting,
    /// Connected, waiting for the first framerate window
    Measuring,
    /// Publishing frames to subscribers
    Streaming,
    /// Waiting out the retry interval
    Retrying,
    /// Stopped for good
    Stopped,
}

/// Snapshot of a stream source
#[derive(Debug, Clone, PartialEq)]
pub struct SourceStatus {
    /// Current state
    pub state: SourceState,
    /// Last completed framerate window, if any
    pub framerate: Option<f64>,
    /// Frames pushed to subscribers
    pub frames_published: u64,
    /// Frames dropped while the framerate was unknown
    pub frames_withheld: u64,
    /// Completed connection attempts that ended in a retry
    pub reconnects: u64,
    /// Live subscriber count as of the last publish
    pub subscribers: usize,
    /// Why the last connection ended
    pub last_error: Option<String>,
}

impl SourceStatus {
    pub fn new() -> Self {
        Self {
            state: SourceState::Idle,
            framerate: None,
            frames_published: 0,
            frames_withheld: 0,
            reconnects: 0,
            subscribers: 0,
            last_error: None,
        }
    }
}

impl Default for SourceStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle of a broadcaster's production loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastState {
    /// Started, no live frame seen yet
    AwaitingFirstFrame,
    /// Relaying live frames
    Streaming,
    /// Upstream gone, serving placeholders
    SourceDown,
    /// Stopped for good
    Stopped,
}

impl BroadcastState {
    /// Whether new viewers may still attach
    pub fn is_broadcasting(&self) -> bool {
        !matches!(self, BroadcastState::Stopped)
    }
}

/// Snapshot of a broadcaster
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastStatus {
    /// Current state
    pub state: BroadcastState,
    /// Attached viewers as of the last chunk
    pub viewers: usize,
    /// Live frames sent
    pub frames_sent: u64,
    /// Placeholder frames sent
    pub placeholders_sent: u64,
    /// Errors raised by the frame feed
    pub feed_errors: u64,
}

impl BroadcastStatus {
    pub fn new() -> Self {
        Self {
            state: BroadcastState::AwaitingFirstFrame,
            viewers: 0,
            frames_sent: 0,
            placeholders_sent: 0,
            feed_errors: 0,
        }
    }
}

impl Default for BroadcastStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Server-wide counters, shared between the accept loop and request handlers
#[derive(Debug, Default)]
pub struct ServerCounters {
    connections: AtomicU64,
    upgraded: AtomicU64,
    redirected: AtomicU64,
    closed: AtomicU64,
}

impl ServerCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn connection(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn upgraded(&self) {
        self.upgraded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn redirected(&self) {
        self.redirected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn closed(&self) {
        self.closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot
    pub fn snapshot(&self) -> ServerStats {
        ServerStats {
            connections: self.connections.load(Ordering::Relaxed),
            upgraded: self.upgraded.load(Ordering::Relaxed),
            redirected: self.redirected.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Relaxed),
        }
    }
}

/// Server-wide statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// Accepted connections
    pub connections: u64,
    /// Connections upgraded into a stream
    pub upgraded: u64,
    /// Connections answered with a redirect
    pub redirected: u64,
    /// Connections closed without a response
    pub closed: u64,
}
