//! Health verdicts
//!
//! [`evaluate`] turns a metrics snapshot into a [`HealthCheck`]: a list of
//! issues, each with a severity, and an overall status taken from the worst
//! of them. It is a pure function; the monitor decides when to call it.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::metrics::{HealthMetrics, SyncStatus};
use crate::config::HealthConfig;

/// Overall health verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Connected, no failures, replication running
    Healthy,
    /// Usable, with non-blocking issues
    Degraded,
    /// Not usable
    Unhealthy,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    /// Healthy or degraded
    pub fn is_operational(&self) -> bool {
        !matches!(self, HealthStatus::Unhealthy)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// How bad an issue is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// One reason the store is not fully healthy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    pub message: String,
}

impl Issue {
    fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
        }
    }
}

/// An immutable health verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: HealthStatus,
    pub issues: Vec<Issue>,
    pub metrics: HealthMetrics,
    pub timestamp: DateTime<Utc>,
    /// Publication order; later checks have larger numbers
    pub sequence: u64,
}

impl HealthCheck {
    /// Worst issue severity, if there are any issues
    pub fn worst_severity(&self) -> Option<Severity> {
        self.issues.iter().map(|i| i.severity).max()
    }

    pub fn has_critical(&self) -> bool {
        self.worst_severity() == Some(Severity::Critical)
    }
}

/// Judge a metrics snapshot
pub fn evaluate(metrics: &HealthMetrics, config: &HealthConfig, now: DateTime<Utc>) -> HealthCheck {
    let mut issues = Vec::new();
    let threshold = config.unhealthy_failure_threshold.max(1);

    if !metrics.is_connected {
        issues.push(Issue::new(Severity::Critical, "Database is not connected"));
    }

    let failures = metrics.consecutive_failures;
    if failures >= threshold {
        issues.push(Issue::new(
            Severity::Critical,
            format!("{} consecutive operations failed", failures),
        ));
    } else if failures > 0 {
        issues.push(Issue::new(
            Severity::High,
            format!("{} recent operation(s) failed", failures),
        ));
    }

    match metrics.sync_status {
        SyncStatus::Error => issues.push(Issue::new(Severity::Critical, "Replication failed")),
        SyncStatus::Connecting => issues.push(Issue::new(
            Severity::Medium,
            "Replication is still connecting",
        )),
        SyncStatus::Disconnected => {
            issues.push(Issue::new(Severity::Low, "Replication is not running"))
        }
        SyncStatus::Syncing | SyncStatus::Connected => {}
    }

    if let Some(quota) = metrics.storage_quota {
        if quota.percentage > config.quota_warning_percent {
            issues.push(Issue::new(
                Severity::High,
                format!("Storage is {:.0}% full", quota.percentage),
            ));
        }
    }

    let status = match issues.iter().map(|i| i.severity).max() {
        Some(Severity::Critical) => HealthStatus::Unhealthy,
        Some(_) => HealthStatus::Degraded,
        None => HealthStatus::Healthy,
    };

    HealthCheck {
        status,
        issues,
        metrics: metrics.clone(),
        timestamp: now,
        sequence: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::metrics::StorageQuota;

    fn healthy_metrics() -> HealthMetrics {
        HealthMetrics {
            is_connected: true,
            last_successful_operation: Some(Utc::now()),
            consecutive_failures: 0,
            last_response_time: Some(20),
            sync_status: SyncStatus::Connected,
            storage_quota: Some(StorageQuota::new(10, 100)),
        }
    }

    fn check(metrics: &HealthMetrics) -> HealthCheck {
        evaluate(metrics, &HealthConfig::default(), Utc::now())
    }

    #[test]
    fn test_healthy_when_all_good() {
        let result = check(&healthy_metrics());
        assert_eq!(result.status, HealthStatus::Healthy);
        assert!(result.issues.is_empty());

        let syncing = HealthMetrics {
            sync_status: SyncStatus::Syncing,
            ..healthy_metrics()
        };
        assert_eq!(check(&syncing).status, HealthStatus::Healthy);
    }

    #[test]
    fn test_initial_metrics_are_unhealthy() {
        let result = check(&HealthMetrics::default());
        assert_eq!(result.status, HealthStatus::Unhealthy);
        assert!(result.has_critical());
    }

    #[test]
    fn test_failure_threshold() {
        let mut metrics = healthy_metrics();

        metrics.consecutive_failures = 2;
        let result = check(&metrics);
        assert_eq!(result.status, HealthStatus::Degraded);
        assert_eq!(result.worst_severity(), Some(Severity::High));

        metrics.consecutive_failures = 3;
        let result = check(&metrics);
        assert_eq!(result.status, HealthStatus::Unhealthy);
        assert!(result.has_critical());
    }

    #[test]
    fn test_sync_status_issues() {
        let cases = [
            (SyncStatus::Error, HealthStatus::Unhealthy, Severity::Critical),
            (SyncStatus::Connecting, HealthStatus::Degraded, Severity::Medium),
            (SyncStatus::Disconnected, HealthStatus::Degraded, Severity::Low),
        ];

        for (sync_status, status, severity) in cases {
            let metrics = HealthMetrics {
                sync_status,
                ..healthy_metrics()
            };
            let result = check(&metrics);
            assert_eq!(result.status, status, "{}", sync_status);
            assert_eq!(result.worst_severity(), Some(severity), "{}", sync_status);
        }
    }

    #[test]
    fn test_quota_warning() {
        let metrics = HealthMetrics {
            storage_quota: Some(StorageQuota::new(81, 100)),
            ..healthy_metrics()
        };
        let result = check(&metrics);
        assert_eq!(result.status, HealthStatus::Degraded);
        assert_eq!(result.worst_severity(), Some(Severity::High));

        let at_limit = HealthMetrics {
            storage_quota: Some(StorageQuota::new(80, 100)),
            ..healthy_metrics()
        };
        assert_eq!(check(&at_limit).status, HealthStatus::Healthy);
    }

    #[test]
    fn test_slow_response_alone_stays_healthy() {
        let metrics = HealthMetrics {
            last_response_time: Some(1500),
            ..healthy_metrics()
        };
        let result = check(&metrics);
        assert_eq!(result.status, HealthStatus::Healthy);
        assert!(result.issues.is_empty());
    }

    #[test]
    fn test_custom_thresholds() {
        let config = HealthConfig {
            unhealthy_failure_threshold: 5,
            ..Default::default()
        };
        let metrics = HealthMetrics {
            consecutive_failures: 4,
            ..healthy_metrics()
        };

        let result = evaluate(&metrics, &config, Utc::now());
        assert_eq!(result.status, HealthStatus::Degraded);
        assert_eq!(result.worst_severity(), Some(Severity::High));
        assert_eq!(result.issues.len(), 1);
    }

    #[test]
    fn test_check_serializes_lowercase() {
        let value = serde_json::to_value(check(&HealthMetrics::default())).unwrap();
        assert_eq!(value["status"], "unhealthy");
        assert_eq!(value["issues"][0]["severity"], "critical");
        assert_eq!(value["metrics"]["sync_status"], "disconnected");
    }
}
