//! Replication status plumbing
//!
//! Tally does not speak a replication protocol itself. A
//! [`ReplicationEngine`] does the replicating and reports its lifecycle as
//! [`ReplicationEvent`]s; the [`SyncStatusBridge`] turns those into health
//! updates.
//!
//! ## Usage
//!
//! ```ignore
//! let bridge = SyncStatusBridge::new(monitor.clone(), session)
//!     .with_prewarm_views(config.prewarm_views.clone());
//! let task = bridge.attach(&engine, &url, &SyncOptions::default());
//! ```

mod bridge;
mod events;

pub use bridge::SyncStatusBridge;
pub use events::{
    ReplicationEngine, ReplicationError, ReplicationEvent, SessionInvalidator, SyncOptions,
};
