//! Replica persistence
//!
//! Saves and loads the Automerge replica to/from the filesystem.
//! Uses atomic writes (write to temp file, then rename) to prevent corruption.
//!
//! Storage location: `~/.local/share/tally/replica.automerge` (configurable
//! via `Config`)

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::error::{StorageError, StorageResult};
use super::replica::ReplicaDocument;

/// Persistence layer for the replica
pub struct ReplicaPersistence {
    path: PathBuf,
}

impl ReplicaPersistence {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if a replica exists on disk
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Write already-encoded replica bytes using an atomic write
    pub fn save_bytes(&self, bytes: &[u8]) -> StorageResult<()> {
        atomic_write(&self.path, bytes)?;
        debug!("Saved replica ({} bytes) to {:?}", bytes.len(), self.path);
        Ok(())
    }

    /// Load the replica from disk
    ///
    /// Returns `None` if the file doesn't exist.
    pub fn load(&self) -> StorageResult<Option<ReplicaDocument>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StorageError::ReadError {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };

        let replica =
            ReplicaDocument::load(&bytes).map_err(|e| StorageError::CorruptReplica {
                path: self.path.clone(),
                details: e.to_string(),
            })?;

        Ok(Some(replica))
    }

    /// Load an existing replica or create and save a new one
    pub fn load_or_create(&self) -> StorageResult<ReplicaDocument> {
        if let Some(replica) = self.load()? {
            return Ok(replica);
        }

        let mut replica = ReplicaDocument::new()?;
        self.save_bytes(&replica.save())?;
        Ok(replica)
    }
}

/// Write data to a file atomically
///
/// 1. Write to a temporary file in the same directory
/// 2. Sync the file to disk
/// 3. Rename the temp file to the target path
fn atomic_write(path: &Path, data: &[u8]) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StorageError::from_io(e, parent.to_path_buf()))?;
    }

    let temp_path = path.with_extension("tmp");

    let mut file =
        File::create(&temp_path).map_err(|e| StorageError::from_io(e, temp_path.clone()))?;

    file.write_all(data)
        .map_err(|e| StorageError::from_io(e, temp_path.clone()))?;

    // Sync to disk before rename
    file.sync_all()
        .map_err(|e| StorageError::from_io(e, temp_path.clone()))?;

    fs::rename(&temp_path, path).map_err(|e| StorageError::from_io(e, path.to_path_buf()))?;

    Ok(())
}
