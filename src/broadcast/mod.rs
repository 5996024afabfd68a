//! Viewer-facing broadcast
//!
//! ```text
//!   StreamConsumer ──► TransformChain ──► FrameBroadcaster ──► ViewerConnection(s)
//! ```
//!
//! A broadcaster never waits on a viewer. Every viewer owns a send loop and a
//! backlog of its own, and is dropped from the broadcaster once that loop
//! ends.

pub mod broadcaster;
pub mod transform;
pub mod viewer;

pub use broadcaster::{BroadcastConfig, BroadcasterHandle, FrameBroadcaster};
pub use transform::{FrameFeed, FrameTransform, TransformChain};
pub use viewer::{SendBuffer, ViewerConfig, ViewerConnection, ViewerHandle};
