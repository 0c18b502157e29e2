//! Database error classification
//!
//! The document store reports failures in whatever shape it likes: HTTP
//! statuses, conflict markers, network errors, I/O errors. Everything is
//! mapped here into a single [`DatabaseError`] value so that nothing above
//! the safe operations layer ever needs to look at a raw store failure.

use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Category of a classified database failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// The store could not be reached (no response, refused, timed out)
    NetworkError,
    /// Two writers diverged on the same document revision
    SyncConflict,
    /// Catch-all for failures that fit nothing else
    OperationFailed,
    /// The targeted document does not exist
    NotFound,
    /// Local storage is exhausted
    QuotaExceeded,
}

impl ErrorKind {
    /// Wire name of the kind, e.g. `SYNC_CONFLICT`
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NetworkError => "NETWORK_ERROR",
            ErrorKind::SyncConflict => "SYNC_CONFLICT",
            ErrorKind::OperationFailed => "OPERATION_FAILED",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::QuotaExceeded => "QUOTA_EXCEEDED",
        }
    }

    /// Only transient failures are worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::NetworkError)
    }

    /// Whether a failure of this kind says something about store health.
    ///
    /// Conflicts and missing documents are answers from a responsive store,
    /// so they do not count against connectivity.
    pub fn counts_against_health(&self) -> bool {
        matches!(
            self,
            ErrorKind::NetworkError | ErrorKind::OperationFailed | ErrorKind::QuotaExceeded
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure returned by every safe operation
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct DatabaseError {
    /// Failure category
    pub kind: ErrorKind,
    /// Human-readable diagnostic
    pub message: String,
    /// True only for transient failures
    pub retryable: bool,
}

impl DatabaseError {
    /// Create an error; retryability follows from the kind
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: kind.is_retryable(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.kind == ErrorKind::SyncConflict
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }
}

/// Low-level network failure reported by a store client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkFailure {
    /// Request went out, nothing came back
    NoResponse,
    /// Remote end refused the connection
    ConnectionRefused,
    /// Request exceeded its deadline
    Timeout,
}

impl fmt::Display for NetworkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkFailure::NoResponse => write!(f, "no response from server"),
            NetworkFailure::ConnectionRefused => write!(f, "connection refused"),
            NetworkFailure::Timeout => write!(f, "request timed out"),
        }
    }
}

/// Raw failure reported by a [`DocumentStore`](crate::store::DocumentStore)
#[derive(Error, Debug)]
pub enum StoreFailure {
    /// Error carrying an HTTP status
    #[error("HTTP {status}: {reason}")]
    Http { status: u16, reason: String },

    /// Revision conflict on write
    #[error("Document update conflict for '{id}'")]
    Conflict { id: String },

    /// Document is missing or was deleted
    #[error("Document '{id}' is missing")]
    Missing { id: String },

    /// Transport-level failure
    #[error("Network failure: {0}")]
    Network(NetworkFailure),

    /// Storage quota reached
    #[error("Storage quota exceeded: {used} of {total} bytes in use")]
    StorageFull { used: u64, total: u64 },

    /// I/O error from local persistence
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Anything else
    #[error("{0}")]
    Other(String),
}

/// Classify a raw store failure.
///
/// Rules are checked in priority order and the first match wins:
/// conflict, not found, network, quota, then everything else.
pub fn classify(failure: &StoreFailure) -> DatabaseError {
    let kind = if is_conflict(failure) {
        ErrorKind::SyncConflict
    } else if is_missing(failure) {
        ErrorKind::NotFound
    } else if is_network(failure) {
        ErrorKind::NetworkError
    } else if is_quota(failure) {
        ErrorKind::QuotaExceeded
    } else {
        ErrorKind::OperationFailed
    };

    DatabaseError::new(kind, failure.to_string())
}

fn is_conflict(failure: &StoreFailure) -> bool {
    matches!(
        failure,
        StoreFailure::Conflict { .. } | StoreFailure::Http { status: 409, .. }
    )
}

fn is_missing(failure: &StoreFailure) -> bool {
    match failure {
        StoreFailure::Missing { .. } | StoreFailure::Http { status: 404, .. } => true,
        StoreFailure::Io(error) => error.kind() == io::ErrorKind::NotFound,
        _ => false,
    }
}

fn is_network(failure: &StoreFailure) -> bool {
    match failure {
        StoreFailure::Network(_) => true,
        // status 0 is what browser-style clients report when no response arrived
        StoreFailure::Http { status, .. } => matches!(status, 0 | 502 | 503 | 504),
        StoreFailure::Io(error) => matches!(
            error.kind(),
            io::ErrorKind::ConnectionRefused
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::NotConnected
                | io::ErrorKind::TimedOut
                | io::ErrorKind::BrokenPipe
        ),
        _ => false,
    }
}

fn is_quota(failure: &StoreFailure) -> bool {
    match failure {
        StoreFailure::StorageFull { .. } => true,
        StoreFailure::Http { status, reason } => {
            matches!(status, 413 | 507) || mentions_quota(reason)
        }
        StoreFailure::Io(error) => mentions_quota(&error.to_string()),
        StoreFailure::Other(message) => mentions_quota(message),
        _ => false,
    }
}

/// Check a message for storage-full indicators
fn mentions_quota(message: &str) -> bool {
    let msg = message.to_lowercase();
    msg.contains("no space left")
        || msg.contains("disk full")
        || msg.contains("quota exceeded")
        || msg.contains("quotaexceedederror")
        || msg.contains("not enough space")
}
