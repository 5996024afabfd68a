//! Statistics and status snapshots

pub mod metrics;

pub use metrics::{
    BroadcastState, BroadcastStatus, ServerCounters, ServerStats, SourceState, SourceStatus,
};
