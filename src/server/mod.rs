//! HTTP relay server
//!
//! Routes `GET /stream/<key>` to the broadcaster registered under `<key>` and
//! turns the connection into a long-lived `multipart/x-mixed-replace`
//! response. Anything else is redirected to `/` or closed.

pub mod config;
pub mod listener;
pub mod request;

pub use config::ServerConfig;
pub use listener::RelayServer;
