//! Relayed video frames

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use crate::error::ProtocolError;

use super::jpeg;

/// One JPEG image with its capture time
///
/// Cheap to clone: the payload is reference counted, so every subscriber and
/// viewer shares one allocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Encoded JPEG bytes
    pub data: Bytes,
    /// Image width in pixels
    pub width: u16,
    /// Image height in pixels
    pub height: u16,
    /// Capture or production time
    pub timestamp: SystemTime,
}

impl Frame {
    /// Create a frame from parts already known to be consistent
    pub fn new(data: Bytes, width: u16, height: u16, timestamp: SystemTime) -> Self {
        Self {
            data,
            width,
            height,
            timestamp,
        }
    }

    /// Decode a JPEG captured now
    pub fn decode(data: Bytes) -> Result<Self, ProtocolError> {
        Self::decode_at(data, SystemTime::now())
    }

    /// Decode a JPEG captured at `timestamp`
    pub fn decode_at(data: Bytes, timestamp: SystemTime) -> Result<Self, ProtocolError> {
        let info = jpeg::parse_header(&data)?;
        Ok(Self::new(data, info.width, info.height, timestamp))
    }

    /// Same image metadata with a replacement payload
    ///
    /// Used by transforms that re-encode the image at the same size.
    pub fn with_data(&self, data: Bytes) -> Self {
        Self {
            data,
            ..self.clone()
        }
    }

    /// Copy of this frame stamped with the current time
    pub fn restamped(&self) -> Self {
        Self {
            timestamp: SystemTime::now(),
            ..self.clone()
        }
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the payload is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Seconds since the Unix epoch, as sent in the `X-Timestamp` header
    pub fn unix_timestamp(&self) -> f64 {
        self.timestamp
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs_f64()
    }
}
