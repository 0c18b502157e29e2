//! Tally Core Library
//!
//! This crate provides the resilience layer for Tally, a local-first task
//! manager whose data lives in a replicated document store.
//!
//! # Architecture
//!
//! - **Safe operations**: every read and write is timed, classified into a
//!   `DatabaseError` and recorded into shared health metrics
//! - **Health monitor**: periodic probes plus replication status updates,
//!   judged into a healthy/degraded/unhealthy verdict and broadcast to
//!   listeners
//! - **Sync bridge**: replication lifecycle events into health updates
//! - **Local store**: Automerge replica as source of truth, with a lazily
//!   built SQLite index for named views
//!
//! # Quick Start
//!
//! ```text
//! let store = Arc::new(LocalStore::open(&config)?);
//! let ops = Arc::new(SafeOperations::new(store));
//! let monitor = HealthMonitor::new(ops.clone(), config.health.clone());
//!
//! ops.safe_put(Todo::new("Buy milk").to_document()).await?;
//! let check = monitor.perform_health_check().await;
//! println!("{}", check.status);
//! ```
//!
//! # Modules
//!
//! - `error`: error taxonomy and classification of raw store failures
//! - `document`: JSON documents and revisions
//! - `store`: the `DocumentStore` interface and `LocalStore`
//! - `storage`: replica persistence and the view index
//! - `safe`: the safe operations facade
//! - `retry`: opt-in retries for transient failures
//! - `health`: metrics, verdicts and the health monitor
//! - `sync`: replication events and the status bridge
//! - `models`: the todo model
//! - `config`: application configuration

pub mod config;
pub mod document;
pub mod error;
pub mod health;
pub mod models;
pub mod retry;
pub mod safe;
pub mod storage;
pub mod store;
pub mod sync;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{Config, HealthConfig};
pub use document::{Document, DocumentError, Revision};
pub use error::{classify, DatabaseError, ErrorKind, NetworkFailure, StoreFailure};
pub use health::{
    evaluate, HealthCheck, HealthListener, HealthMetrics, HealthMonitor, HealthStatus, Issue, Severity,
    StorageQuota, SyncStatus,
};
pub use models::Todo;
pub use retry::{retry_transient, RetryPolicy};
pub use safe::{BulkResult, SafeOperations};
pub use storage::{StorageError, ViewDefinition};
pub use store::{DocumentStore, LocalStore, QueryParams, StorageEstimate, ViewRow};
pub use sync::{
    ReplicationEngine, ReplicationError, ReplicationEvent, SessionInvalidator, SyncOptions,
    SyncStatusBridge,
};
