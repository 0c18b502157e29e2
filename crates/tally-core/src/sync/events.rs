//! Replication lifecycle events and the collaborators that produce them

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Error reported by the replication engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationError {
    /// HTTP status from the remote, if there was one
    pub status: Option<u16>,
    pub message: String,
}

impl ReplicationError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// The remote rejected our credentials
    pub fn is_auth_failure(&self) -> bool {
        matches!(self.status, Some(401) | Some(403))
    }
}

impl fmt::Display for ReplicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} (HTTP {})", self.message, status),
            None => f.write_str(&self.message),
        }
    }
}

/// One step in a replication session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationEvent {
    /// A session began
    Started,
    /// Changes are being transferred
    Active,
    /// Caught up; waiting for more changes
    Paused,
    /// One-shot replication finished
    Complete,
    Error(ReplicationError),
}

/// Options passed to the replication engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// Keep replicating after catching up
    pub live: bool,
    /// Let the engine reconnect on its own
    pub retry: bool,
    pub batch_size: usize,
    pub heartbeat: Duration,
    pub timeout: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            live: true,
            retry: true,
            batch_size: 100,
            heartbeat: Duration::from_secs(10),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Something that replicates the local store with a remote endpoint
pub trait ReplicationEngine: Send + Sync {
    /// Begin replicating and return the session's event stream
    fn subscribe(&self, endpoint: &str, options: &SyncOptions) -> mpsc::Receiver<ReplicationEvent>;
}

/// Clears the user's session when the remote rejects it
pub trait SessionInvalidator: Send + Sync {
    fn invalidate_session(&self, reason: &str);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_failures() {
        assert!(ReplicationError::new(Some(401), "unauthorized").is_auth_failure());
        assert!(ReplicationError::new(Some(403), "forbidden").is_auth_failure());
        assert!(!ReplicationError::new(Some(500), "boom").is_auth_failure());
        assert!(!ReplicationError::new(None, "offline").is_auth_failure());
    }

    #[test]
    fn test_default_options() {
        let options = SyncOptions::default();
        assert!(options.live);
        assert!(options.retry);
        assert_eq!(options.batch_size, 100);
        assert_eq!(options.heartbeat, Duration::from_secs(10));
        assert_eq!(options.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_error_display() {
        let err = ReplicationError::new(Some(401), "unauthorized");
        assert_eq!(err.to_string(), "unauthorized (HTTP 401)");
    }
}
