//! Upstream ingestion
//!
//! A [`StreamSource`] owns one camera feed and fans decoded frames out to
//! [`StreamConsumer`]s, each with a private queue.

pub mod config;
pub mod consumer;
pub mod framerate;
pub mod stream;
pub mod upstream;

pub use config::SourceConfig;
pub use consumer::{QueuePolicy, SourceEvent, StreamConsumer};
pub use framerate::{FramerateWindow, RateCheck};
pub use stream::{SourceHandle, StreamSource};
pub use upstream::{feed_url, ByteStream, CameraTopic, HttpOptions, HttpUpstream, Upstream};
