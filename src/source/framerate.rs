//! Rolling framerate estimate
//!
//! Frames are counted in windows of (at least) one second. A window closes on
//! the first frame that arrives after the window length has passed, and the
//! estimate becomes `frames / elapsed` for that window. Until the first
//! window closes the rate is unknown, and an unknown rate is never treated as
//! good enough to publish.

use std::time::Duration;

use tokio::time::Instant;

/// Default window length
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(1);

/// Outcome of checking the current estimate against a floor
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateCheck {
    /// No window has completed yet
    Unknown,
    /// At or above the floor
    Acceptable(f64),
    /// Below the floor; the estimate has been reset
    TooLow(f64),
}

/// Framerate estimate over fixed windows
#[derive(Debug, Clone)]
pub struct FramerateWindow {
    window: Duration,
    started: Instant,
    count: u32,
    rate: Option<f64>,
}

impl FramerateWindow {
    /// Start a window now
    pub fn new(window: Duration) -> Self {
        Self::starting_at(window, Instant::now())
    }

    /// Start a window at `started`
    pub fn starting_at(window: Duration, started: Instant) -> Self {
        Self {
            window,
            started,
            count: 0,
            rate: None,
        }
    }

    /// Count a frame seen at `now`
    ///
    /// Returns the new estimate if this frame closed a window.
    pub fn record(&mut self, now: Instant) -> Option<f64> {
        self.count += 1;

        let elapsed = now.saturating_duration_since(self.started);
        if elapsed <= self.window {
            return None;
        }

        let rate = self.count as f64 / elapsed.as_secs_f64();
        self.rate = Some(rate);
        self.count = 0;
        self.started = now;
        Some(rate)
    }

    /// Compare the estimate with `min_fps`, resetting it when too low
    pub fn check(&mut self, min_fps: f64) -> RateCheck {
        match self.rate {
            None => RateCheck::Unknown,
            Some(rate) if rate < min_fps => {
                self.rate = None;
                RateCheck::TooLow(rate)
            }
            Some(rate) => RateCheck::Acceptable(rate),
        }
    }

    /// Last completed estimate
    pub fn rate(&self) -> Option<f64> {
        self.rate
    }

    /// Frames counted in the open window
    pub fn pending(&self) -> u32 {
        self.count
    }
}
