//! Storage error handling
//!
//! Typed errors for replica persistence and the view index. These stay
//! inside the storage layer; the store converts them into
//! [`StoreFailure`](crate::error::StoreFailure) at its boundary.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::document::DocumentError;
use crate::error::StoreFailure;

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// Permission denied accessing path
    #[error("Permission denied: cannot access '{path}'. Check file permissions.")]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Disk is full or quota exceeded
    #[error(
        "Disk full or quota exceeded while writing to '{path}'. Free up disk space and try again."
    )]
    DiskFull {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to read file
    #[error("Failed to read '{path}': {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to write file
    #[error("Failed to write '{path}': {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Replica file could not be parsed
    #[error("Replica at '{path}' is corrupted: {details}")]
    CorruptReplica { path: PathBuf, details: String },

    /// Document-level error inside the replica
    #[error(transparent)]
    Document(#[from] DocumentError),

    /// SQLite index error
    #[error("Index error: {0}")]
    Index(#[from] rusqlite::Error),

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StorageError {
    /// Create an error from an I/O error with path context
    ///
    /// Classifies the error based on its kind (permission, disk full, etc.)
    pub fn from_io(error: io::Error, path: PathBuf) -> Self {
        match error.kind() {
            io::ErrorKind::PermissionDenied => StorageError::PermissionDenied {
                path,
                source: error,
            },
            _ if is_disk_full_error(&error) => StorageError::DiskFull {
                path,
                source: error,
            },
            _ => StorageError::WriteError {
                path,
                source: error,
            },
        }
    }
}

impl From<StorageError> for StoreFailure {
    fn from(error: StorageError) -> Self {
        match error {
            // Keep the io::Error so the classifier can still see its kind
            StorageError::DiskFull { source, .. } | StorageError::Io(source) => {
                StoreFailure::Io(source)
            }
            other => StoreFailure::Other(other.to_string()),
        }
    }
}

/// Check if an I/O error indicates disk full condition
fn is_disk_full_error(error: &io::Error) -> bool {
    let msg = error.to_string().to_lowercase();
    msg.contains("no space left")
        || msg.contains("disk full")
        || msg.contains("quota exceeded")
        || msg.contains("not enough space")
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{classify, ErrorKind};

    #[test]
    fn test_permission_denied_classification() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err = StorageError::from_io(io_err, PathBuf::from("/test/path"));

        assert!(matches!(err, StorageError::PermissionDenied { .. }));
        assert!(err.to_string().contains("/test/path"));
    }

    #[test]
    fn test_disk_full_detection() {
        let io_err = io::Error::new(io::ErrorKind::Other, "No space left on device");
        let err = StorageError::from_io(io_err, PathBuf::from("/full/disk"));

        assert!(matches!(err, StorageError::DiskFull { .. }));
    }

    #[test]
    fn test_disk_full_surfaces_as_quota() {
        let io_err = io::Error::new(io::ErrorKind::Other, "No space left on device");
        let err = StorageError::from_io(io_err, PathBuf::from("/full/disk"));

        let failure: StoreFailure = err.into();
        assert_eq!(classify(&failure).kind, ErrorKind::QuotaExceeded);
    }

    #[test]
    fn test_corrupt_replica_is_operation_failure() {
        let err = StorageError::CorruptReplica {
            path: PathBuf::from("/data/replica.automerge"),
            details: "invalid header".to_string(),
        };
        let failure: StoreFailure = err.into();
        let classified = classify(&failure);
        assert_eq!(classified.kind, ErrorKind::OperationFailed);
        assert!(classified.message.contains("corrupted"));
    }
}
