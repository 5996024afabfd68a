//! Media handling for MJPEG relaying
//!
//! This module provides:
//! - JPEG frame extraction from raw feed bytes
//! - JPEG header decoding (dimensions only)
//! - A blank placeholder JPEG encoder
//! - The shared `Frame` type
//! - `multipart/x-mixed-replace` framing for viewers

pub mod frame;
pub mod jpeg;
pub mod multipart;

pub use frame::Frame;
pub use jpeg::{blank_jpeg, JpegExtractor, JpegInfo};
