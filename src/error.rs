//! Error types
//!
//! Every failure the relay can observe is one of these. Only [`ConfigError`]
//! is ever returned to the caller of a long-running loop, and only at setup;
//! everything else is logged and recovered by the loop that hit it.

use std::fmt;
use std::io;
use std::time::Duration;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// Socket or other I/O failure
    Io(io::Error),
    /// Invalid setup, raised before anything starts
    Config(ConfigError),
    /// Upstream camera feed failure
    Upstream(UpstreamError),
    /// Malformed request or malformed frame
    Protocol(ProtocolError),
    /// Viewer write failure
    Transmit(TransmitError),
    /// A frame transform failed
    Transform(TransformError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Config(e) => write!(f, "Configuration error: {}", e),
            Error::Upstream(e) => write!(f, "Upstream error: {}", e),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e),
            Error::Transmit(e) => write!(f, "Transmit error: {}", e),
            Error::Transform(e) => write!(f, "Transform error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Config(e) => Some(e),
            Error::Upstream(e) => Some(e),
            Error::Protocol(e) => Some(e),
            Error::Transmit(e) => Some(e),
            Error::Transform(e) => Some(e),
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl From<UpstreamError> for Error {
    fn from(e: UpstreamError) -> Self {
        Error::Upstream(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Protocol(e)
    }
}

impl From<TransmitError> for Error {
    fn from(e: TransmitError) -> Self {
        Error::Transmit(e)
    }
}

impl From<TransformError> for Error {
    fn from(e: TransformError) -> Self {
        Error::Transform(e)
    }
}

/// Setup errors. Fatal, returned before serving starts.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A broadcaster is already registered under this route key
    DuplicateRoute(String),
    /// JPEG quality outside 1..=100
    InvalidQuality(u8),
    /// Minimum framerate must be finite and non-negative
    InvalidMinFps(f64),
    /// Bounded queue policies need a capacity of at least one
    ZeroQueueCapacity,
    /// The upstream feed URL could not be built or parsed
    InvalidFeedUrl(String),
    /// The upstream HTTP client could not be constructed
    HttpClient(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::DuplicateRoute(key) => {
                write!(f, "Broadcaster already registered for route: {}", key)
            }
            ConfigError::InvalidQuality(q) => {
                write!(f, "Video quality should be in range [1, 100], got {}", q)
            }
            ConfigError::InvalidMinFps(fps) => write!(f, "Invalid minimum framerate: {}", fps),
            ConfigError::ZeroQueueCapacity => write!(f, "Bounded queue capacity must be non-zero"),
            ConfigError::InvalidFeedUrl(url) => write!(f, "Invalid feed URL: {}", url),
            ConfigError::HttpClient(msg) => write!(f, "Failed to build HTTP client: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Upstream feed failures. All of them lead to the same retry path.
#[derive(Debug)]
pub enum UpstreamError {
    /// The camera reports itself as not connected
    NotConnected,
    /// The request could not be sent or the connection failed
    Connect(String),
    /// The feed answered with a non-success status
    Status(u16),
    /// Reading the body failed
    Read(String),
    /// No bytes arrived within the read timeout
    Timeout(Duration),
    /// The measured framerate fell below the configured floor
    LowFramerate { fps: f64, min_fps: f64 },
    /// A complete frame failed to decode
    Decode(ProtocolError),
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamError::NotConnected => write!(f, "Camera not connected"),
            UpstreamError::Connect(msg) => write!(f, "Connection failed: {}", msg),
            UpstreamError::Status(code) => write!(f, "Feed returned status {}", code),
            UpstreamError::Read(msg) => write!(f, "Read failed: {}", msg),
            UpstreamError::Timeout(t) => write!(f, "No data for {:?}", t),
            UpstreamError::LowFramerate { fps, min_fps } => {
                write!(f, "Framerate {:.2} below minimum {:.2}", fps, min_fps)
            }
            UpstreamError::Decode(e) => write!(f, "Frame decode failed: {}", e),
        }
    }
}

impl std::error::Error for UpstreamError {}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            UpstreamError::Status(status.as_u16())
        } else if e.is_body() || e.is_decode() {
            UpstreamError::Read(e.to_string())
        } else {
            UpstreamError::Connect(e.to_string())
        }
    }
}

/// Malformed input on either side of the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The request does not start with a `GET <path> <version>` line
    MalformedRequestLine,
    /// The request header grew past the allowed size
    HeaderTooLarge(usize),
    /// The client did not finish its request header in time
    HeaderTimeout,
    /// JPEG data does not start with the SOI marker
    MissingStartMarker,
    /// JPEG data ended inside a segment
    TruncatedJpeg,
    /// A segment header is not a marker
    InvalidMarker(u8),
    /// Scan data started before any frame header
    MissingFrameHeader,
    /// No end marker within the allowed frame size
    FrameTooLarge(usize),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::MalformedRequestLine => write!(f, "Malformed request line"),
            ProtocolError::HeaderTooLarge(n) => write!(f, "Request header exceeds {} bytes", n),
            ProtocolError::HeaderTimeout => write!(f, "Request header timed out"),
            ProtocolError::MissingStartMarker => write!(f, "JPEG start marker missing"),
            ProtocolError::TruncatedJpeg => write!(f, "JPEG data truncated"),
            ProtocolError::InvalidMarker(b) => write!(f, "Invalid JPEG marker byte: 0x{:02X}", b),
            ProtocolError::MissingFrameHeader => write!(f, "JPEG has no frame header"),
            ProtocolError::FrameTooLarge(n) => write!(f, "No complete JPEG within {} bytes", n),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Viewer socket failures
#[derive(Debug)]
pub enum TransmitError {
    /// The socket write failed
    Write(io::Error),
    /// The socket accepted zero bytes
    WriteZero,
    /// A write did not complete within the timeout
    Timeout(Duration),
}

impl fmt::Display for TransmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransmitError::Write(e) => write!(f, "Write failed: {}", e),
            TransmitError::WriteZero => write!(f, "Socket accepted zero bytes"),
            TransmitError::Timeout(t) => write!(f, "Write timed out after {:?}", t),
        }
    }
}

impl std::error::Error for TransmitError {}

/// Failure raised by a frame transform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformError {
    /// Name of the failing transform
    pub transform: String,
    /// What went wrong
    pub message: String,
}

impl TransformError {
    /// Error raised by the transform named `transform`
    pub fn new(transform: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            transform: transform.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.transform, self.message)
    }
}

impl std::error::Error for TransformError {}
