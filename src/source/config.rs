//! Stream source configuration

use std::time::Duration;

use crate::error::ConfigError;
use crate::media::jpeg::DEFAULT_MAX_FRAME_SIZE;

use super::consumer::{QueuePolicy, DEFAULT_STALL_TIMEOUT};

/// Stream source configuration options
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Requested frame width
    pub width: u16,

    /// Requested frame height
    pub height: u16,

    /// Requested JPEG quality (1-100). Lower uses less bandwidth.
    pub quality: u8,

    /// Framerate below which the feed is considered backlogged and dropped
    pub min_fps: f64,

    /// Wait between connection attempts
    pub retry_interval: Duration,

    /// Longest wait for the feed to respond or send the next chunk
    pub read_timeout: Duration,

    /// Overflow behaviour of subscriber queues
    pub queue_policy: QueuePolicy,

    /// How long subscribers wait for a frame before ending a read
    pub stall_timeout: Duration,

    /// Largest amount of buffered feed data without a complete frame
    pub max_frame_size: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            width: 480,
            height: 360,
            quality: 90,
            min_fps: 10.0,
            retry_interval: Duration::from_secs(5),
            read_timeout: Duration::from_secs(6),
            queue_policy: QueuePolicy::Unbounded,
            stall_timeout: DEFAULT_STALL_TIMEOUT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl SourceConfig {
    /// Set the requested frame size
    pub fn dimensions(mut self, width: u16, height: u16) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the requested JPEG quality
    pub fn quality(mut self, quality: u8) -> Self {
        self.quality = quality;
        self
    }

    /// Set the minimum framerate
    pub fn min_fps(mut self, min_fps: f64) -> Self {
        self.min_fps = min_fps;
        self
    }

    /// Set the retry interval
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Set the read timeout
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the subscriber queue policy
    pub fn queue_policy(mut self, policy: QueuePolicy) -> Self {
        self.queue_policy = policy;
        self
    }

    /// Set the subscriber stall timeout
    pub fn stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    /// Set the maximum frame size
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Reject settings the source cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.quality) {
            return Err(ConfigError::InvalidQuality(self.quality));
        }
        if !self.min_fps.is_finite() || self.min_fps < 0.0 {
            return Err(ConfigError::InvalidMinFps(self.min_fps));
        }
        self.queue_policy.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SourceConfig::default();

        assert_eq!(config.width, 480);
        assert_eq!(config.height, 360);
        assert_eq!(config.quality, 90);
        assert_eq!(config.min_fps, 10.0);
        assert_eq!(config.retry_interval, Duration::from_secs(5));
        assert_eq!(config.stall_timeout, Duration::from_secs(1));
        assert_eq!(config.queue_policy, QueuePolicy::Unbounded);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_quality_range() {
        assert_eq!(
            SourceConfig::default().quality(0).validate(),
            Err(ConfigError::InvalidQuality(0))
        );
        assert_eq!(
            SourceConfig::default().quality(101).validate(),
            Err(ConfigError::InvalidQuality(101))
        );
        assert!(SourceConfig::default().quality(1).validate().is_ok());
        assert!(SourceConfig::default().quality(100).validate().is_ok());
    }

    #[test]
    fn test_invalid_min_fps() {
        let result = SourceConfig::default().min_fps(f64::NAN).validate();
        assert!(matches!(result, Err(ConfigError::InvalidMinFps(_))));

        let result = SourceConfig::default().min_fps(-1.0).validate();
        assert!(matches!(result, Err(ConfigError::InvalidMinFps(_))));
    }

    #[test]
    fn test_zero_capacity_queue() {
        let result = SourceConfig::default()
            .queue_policy(QueuePolicy::DropOldest(0))
            .validate();
        assert_eq!(result, Err(ConfigError::ZeroQueueCapacity));
    }

    #[test]
    fn test_builder_chaining() {
        let config = SourceConfig::default()
            .dimensions(640, 480)
            .quality(75)
            .min_fps(5.0)
            .retry_interval(Duration::from_secs(1))
            .read_timeout(Duration::from_secs(2))
            .queue_policy(QueuePolicy::DropOldest(30));

        assert_eq!((config.width, config.height), (640, 480));
        assert_eq!(config.quality, 75);
        assert_eq!(config.min_fps, 5.0);
        assert_eq!(config.retry_interval, Duration::from_secs(1));
        assert_eq!(config.read_timeout, Duration::from_secs(2));
        assert_eq!(config.queue_policy, QueuePolicy::DropOldest(30));
    }
}
