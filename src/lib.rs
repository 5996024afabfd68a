//! # mjpeg-relay
//!
//! Ingest one MJPEG camera feed and re-broadcast it to any number of HTTP
//! viewers, each at its own pace.
//!
//! ```text
//!   camera ──HTTP──► StreamSource ──┬──► StreamConsumer ──► TransformChain ──► FrameBroadcaster ──┬──► viewer
//!                                   │                                          "0/live"           └──► viewer
//!                                   └──► StreamConsumer ──► TransformChain ──► FrameBroadcaster ──► viewer
//!                                                                              "0/live_hud"
//! ```
//!
//! - [`source::StreamSource`] pulls the feed, cuts it into JPEG frames, drops
//!   connections that fall behind real time and reconnects forever.
//! - [`source::StreamConsumer`] is one subscriber's private frame queue.
//! - [`broadcast::TransformChain`] applies per-frame transforms and builds
//!   the placeholder shown while the feed is down.
//! - [`broadcast::FrameBroadcaster`] frames images as multipart parts and
//!   queues the same bytes on every attached viewer.
//! - [`server::RelayServer`] routes `GET /stream/<key>` to a broadcaster.
//!
//! A slow viewer only grows its own backlog; it never holds up other viewers
//! or the camera.
//!
//! ## Example
//!
//! ```no_run
//! use mjpeg_relay::broadcast::{BroadcastConfig, FrameBroadcaster, TransformChain};
//! use mjpeg_relay::media::{blank_jpeg, Frame};
//! use mjpeg_relay::server::{RelayServer, ServerConfig};
//! use mjpeg_relay::source::{feed_url, CameraTopic, HttpUpstream, SourceConfig, StreamSource};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SourceConfig::default();
//!     let url = feed_url("https://192.168.1.20", CameraTopic::Display, &config)?;
//!     let mut source = StreamSource::new(config, HttpUpstream::new(url)?)?;
//!
//!     let placeholder = Frame::decode(blank_jpeg(480, 360))?;
//!     let chain = TransformChain::new(source.subscribe(), placeholder);
//!     let broadcaster = FrameBroadcaster::new("0/live", chain, BroadcastConfig::default());
//!
//!     let mut server = RelayServer::new(ServerConfig::default());
//!     server.add_broadcaster(broadcaster.start())?;
//!     let _source = source.start();
//!
//!     server.run_until(async { let _ = tokio::signal::ctrl_c().await; }).await?;
//!     Ok(())
//! }
//! ```

pub mod broadcast;
pub mod error;
pub mod media;
pub mod registry;
pub mod server;
pub mod source;
pub mod stats;

pub use broadcast::{
    BroadcastConfig, BroadcasterHandle, FrameBroadcaster, FrameTransform, TransformChain,
};
pub use error::{Error, Result};
pub use media::Frame;
pub use server::{RelayServer, ServerConfig};
pub use source::{SourceConfig, StreamConsumer, StreamSource};
