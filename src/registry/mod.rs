//! Route table
//!
//! Maps the `<key>` part of `GET /stream/<key>` to a running broadcaster.
//! The table is filled before serving starts and only read afterwards, so
//! request handlers share it without locking.
//!
//! ```text
//!   "0/live"      ──► BroadcasterHandle ──► viewers
//!   "0/live_hud"  ──► BroadcasterHandle ──► viewers
//!   "1/live"      ──► BroadcasterHandle ──► viewers
//! ```

pub mod store;

pub use store::{Route, RouteRegistry};
