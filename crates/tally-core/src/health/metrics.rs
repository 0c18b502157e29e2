//! Health metrics and the shared cell that holds them

use std::fmt;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DatabaseError;

/// State of the replication link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Replication is not running
    #[default]
    Disconnected,
    /// Attempting to connect
    Connecting,
    /// Changes are flowing
    Syncing,
    /// Connected and caught up
    Connected,
    /// Replication failed
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Disconnected => "disconnected",
            SyncStatus::Connecting => "connecting",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Connected => "connected",
            SyncStatus::Error => "error",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage usage with a precomputed percentage
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StorageQuota {
    pub used: u64,
    pub total: u64,
    /// 0.0 - 100.0
    pub percentage: f64,
}

impl StorageQuota {
    pub fn new(used: u64, total: u64) -> Self {
        let percentage = if total > 0 {
            used as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        Self {
            used,
            total,
            percentage,
        }
    }
}

/// Everything the monitor knows about the store and the replication link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthMetrics {
    pub is_connected: bool,
    pub last_successful_operation: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    /// Milliseconds taken by the most recent operation
    pub last_response_time: Option<u64>,
    pub sync_status: SyncStatus,
    pub storage_quota: Option<StorageQuota>,
}

impl Default for HealthMetrics {
    fn default() -> Self {
        Self {
            // Unknown until the first operation completes
            is_connected: false,
            last_successful_operation: None,
            consecutive_failures: 0,
            last_response_time: None,
            sync_status: SyncStatus::Disconnected,
            storage_quota: None,
        }
    }
}

impl HealthMetrics {
    /// Record a completed operation
    pub fn record_success(&mut self, elapsed: Duration) {
        self.is_connected = true;
        self.consecutive_failures = 0;
        self.last_successful_operation = Some(Utc::now());
        self.last_response_time = Some(millis(elapsed));
    }

    /// Record a failed operation.
    ///
    /// Failures that are answers from a responsive store (conflicts, missing
    /// documents) only update the response time.
    pub fn record_failure(&mut self, elapsed: Duration, error: &DatabaseError) {
        self.last_response_time = Some(millis(elapsed));

        if !error.kind.counts_against_health() {
            self.is_connected = true;
            return;
        }

        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if error.retryable {
            self.is_connected = false;
        }
    }

    /// Record a failed health probe. Any probe failure, whatever its kind,
    /// counts as lost connectivity.
    pub fn record_probe_failure(&mut self, elapsed: Duration) {
        self.last_response_time = Some(millis(elapsed));
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.is_connected = false;
    }
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// Shared, lock-protected metrics
///
/// Every update goes through [`MetricsCell::apply`], which holds the write
/// lock for the whole closure, so readers never see half of an update.
#[derive(Debug, Default)]
pub struct MetricsCell {
    inner: RwLock<HealthMetrics>,
}

impl MetricsCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current metrics
    pub fn snapshot(&self) -> HealthMetrics {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Mutate the metrics under a single write lock
    pub fn apply<R>(&self, update: impl FnOnce(&mut HealthMetrics) -> R) -> R {
        let mut metrics = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        update(&mut metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_initial_metrics() {
        let metrics = HealthMetrics::default();
        assert!(!metrics.is_connected);
        assert_eq!(metrics.consecutive_failures, 0);
        assert_eq!(metrics.sync_status, SyncStatus::Disconnected);
        assert!(metrics.last_successful_operation.is_none());
        assert!(metrics.storage_quota.is_none());
    }

    #[test]
    fn test_success_resets_failures() {
        let mut metrics = HealthMetrics::default();
        let network = DatabaseError::new(ErrorKind::NetworkError, "refused");

        metrics.record_failure(Duration::from_millis(5), &network);
        metrics.record_failure(Duration::from_millis(5), &network);
        assert_eq!(metrics.consecutive_failures, 2);
        assert!(!metrics.is_connected);

        metrics.record_success(Duration::from_millis(12));
        assert_eq!(metrics.consecutive_failures, 0);
        assert!(metrics.is_connected);
        assert_eq!(metrics.last_response_time, Some(12));
        assert!(metrics.last_successful_operation.is_some());
    }

    #[test]
    fn test_conflicts_do_not_count_as_failures() {
        let mut metrics = HealthMetrics::default();
        let conflict = DatabaseError::new(ErrorKind::SyncConflict, "conflict");

        metrics.record_failure(Duration::from_millis(3), &conflict);
        assert_eq!(metrics.consecutive_failures, 0);
        assert!(metrics.is_connected);
        assert_eq!(metrics.last_response_time, Some(3));
    }

    #[test]
    fn test_non_retryable_failure_keeps_connectivity() {
        let mut metrics = HealthMetrics::default();
        metrics.record_success(Duration::ZERO);

        let failed = DatabaseError::new(ErrorKind::OperationFailed, "boom");
        metrics.record_failure(Duration::ZERO, &failed);
        assert_eq!(metrics.consecutive_failures, 1);
        assert!(metrics.is_connected);
    }

    #[test]
    fn test_storage_quota_percentage() {
        assert_eq!(StorageQuota::new(50, 200).percentage, 25.0);
        assert_eq!(StorageQuota::new(10, 0).percentage, 0.0);
    }

    #[test]
    fn test_sync_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&SyncStatus::Connecting).unwrap(),
            "\"connecting\""
        );
        assert_eq!(SyncStatus::Error.to_string(), "error");
    }

    #[test]
    fn test_cell_apply_returns_value() {
        let cell = MetricsCell::new();
        let failures = cell.apply(|m| {
            m.consecutive_failures = 4;
            m.consecutive_failures
        });
        assert_eq!(failures, 4);
        assert_eq!(cell.snapshot().consecutive_failures, 4);
    }
}
