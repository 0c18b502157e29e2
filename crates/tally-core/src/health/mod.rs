//! Database health monitoring
//!
//! - `metrics`: the raw numbers and the shared cell holding them
//! - `check`: turning metrics into a healthy/degraded/unhealthy verdict
//! - `monitor`: periodic probing, sync status updates and listeners

pub mod check;
pub mod metrics;
pub mod monitor;

pub use check::{evaluate, HealthCheck, HealthStatus, Issue, Severity};
pub use metrics::{HealthMetrics, MetricsCell, StorageQuota, SyncStatus};
pub use monitor::{HealthListener, HealthMonitor, PROBE_DOC_ID};
