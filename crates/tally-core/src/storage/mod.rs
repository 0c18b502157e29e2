//! Storage layer
//!
//! Handles replica persistence and the SQLite view index.
//!
//! ## Architecture
//!
//! - **Automerge**: Source of truth, stored as a binary file
//! - **SQLite**: Lazily built index serving named views
//!
//! Writes go to the replica and mark the index stale; the next query of a
//! view rebuilds it from the replica.

pub mod error;
pub mod index;
pub mod persistence;
pub mod replica;

pub use error::{StorageError, StorageResult};
pub use index::{ViewDefinition, ViewIndex};
pub use persistence::ReplicaPersistence;
pub use replica::{ReplicaDocument, StoredEntry};
