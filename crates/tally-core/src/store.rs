//! Document store interface and the local replica-backed store
//!
//! [`DocumentStore`] is the narrow interface the resilience layer consumes:
//! six document operations plus a storage estimate, each reporting raw
//! [`StoreFailure`]s. [`LocalStore`] implements it on top of an Automerge
//! replica (source of truth) and a lazily built SQLite view index.
//!
//! ## Usage
//!
//! ```ignore
//! let store = LocalStore::open(&config)?;
//!
//! let saved = store.put(Document::new("a").with_field("title", "x")).await?;
//! let rows = store.query("by_type", &QueryParams::with_key("todo")).await?;
//! ```

use std::future::Future;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::Config;
use crate::document::{Document, DocumentError, Revision};
use crate::error::StoreFailure;
use crate::storage::{
    ReplicaDocument, ReplicaPersistence, StorageResult, StoredEntry, ViewDefinition, ViewIndex,
};

/// Options for a view query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryParams {
    /// Exact key match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Value>,
    /// Inclusive range start (upper bound when descending)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_key: Option<Value>,
    /// Inclusive range end (lower bound when descending)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_key: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default)]
    pub skip: usize,
    #[serde(default)]
    pub descending: bool,
    /// Attach the full document to each row
    #[serde(default)]
    pub include_docs: bool,
}

impl QueryParams {
    /// Query a single key
    pub fn with_key(key: impl Into<Value>) -> Self {
        Self {
            key: Some(key.into()),
            ..Default::default()
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn include_docs(mut self) -> Self {
        self.include_docs = true;
        self
    }
}

/// One row of a view query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewRow {
    pub id: String,
    pub key: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<Document>,
}

/// Storage usage as reported by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageEstimate {
    pub used: u64,
    pub total: u64,
}

/// Per-document outcome of a bulk write
pub type BulkItem = Result<Document, StoreFailure>;

/// A replicated document store
///
/// Every operation may fail with an implementation-specific
/// [`StoreFailure`]; callers are expected to go through
/// [`SafeOperations`](crate::safe::SafeOperations) rather than use this
/// directly.
pub trait DocumentStore: Send + Sync + 'static {
    /// Fetch a live document; missing or deleted documents fail
    fn get(&self, id: &str) -> impl Future<Output = Result<Document, StoreFailure>> + Send;

    /// Write a document, checking its `_rev` against the stored one
    fn put(&self, doc: Document) -> impl Future<Output = Result<Document, StoreFailure>> + Send;

    /// Delete a document at the given revision
    fn remove(&self, doc: &Document) -> impl Future<Output = Result<(), StoreFailure>> + Send;

    /// Write many documents; each one succeeds or fails on its own
    fn bulk_docs(
        &self,
        docs: Vec<Document>,
    ) -> impl Future<Output = Result<Vec<BulkItem>, StoreFailure>> + Send;

    /// All live documents ordered by id
    fn all_docs(&self) -> impl Future<Output = Result<Vec<Document>, StoreFailure>> + Send;

    /// Query a named view
    fn query(
        &self,
        view: &str,
        params: &QueryParams,
    ) -> impl Future<Output = Result<Vec<ViewRow>, StoreFailure>> + Send;

    /// Current storage usage, if the store knows its limits
    fn storage_estimate(
        &self,
    ) -> impl Future<Output = Result<Option<StorageEstimate>, StoreFailure>> + Send;
}

impl From<DocumentError> for StoreFailure {
    fn from(error: DocumentError) -> Self {
        StoreFailure::Other(error.to_string())
    }
}

/// Local store backed by an Automerge replica
pub struct LocalStore {
    inner: Mutex<Inner>,
    quota_bytes: Option<u64>,
}

struct Inner {
    replica: ReplicaDocument,
    persistence: Option<ReplicaPersistence>,
    index: ViewIndex,
    /// Replica bytes as last saved; a failed write rolls back to these
    saved: Vec<u8>,
}

impl LocalStore {
    /// Open the on-disk store described by the configuration
    ///
    /// Loads the replica (or creates it on first run) and opens the view
    /// index. Views are built lazily on first query.
    pub fn open(config: &Config) -> Result<Self> {
        let persistence = ReplicaPersistence::new(config.replica_path());
        let mut replica = persistence
            .load_or_create()
            .context("Failed to load or create replica")?;
        let index = ViewIndex::open(&config.index_path(), config.views.clone())
            .context("Failed to open view index")?;

        let saved = replica.save();
        debug!(
            "Opened local store at {:?} ({} documents, {} bytes)",
            persistence.path(),
            replica.len(),
            saved.len()
        );

        Ok(Self {
            inner: Mutex::new(Inner {
                replica,
                persistence: Some(persistence),
                index,
                saved,
            }),
            quota_bytes: config.quota_bytes,
        })
    }

    /// Open a store that lives only in memory
    pub fn in_memory(views: Vec<ViewDefinition>) -> StorageResult<Self> {
        let mut replica = ReplicaDocument::new()?;
        let saved = replica.save();

        Ok(Self {
            inner: Mutex::new(Inner {
                replica,
                persistence: None,
                index: ViewIndex::open_in_memory(views)?,
                saved,
            }),
            quota_bytes: None,
        })
    }

    /// Limit the replica to `quota_bytes`
    pub fn with_quota(mut self, quota_bytes: u64) -> Self {
        self.quota_bytes = Some(quota_bytes);
        self
    }

    /// Whether a view's index is currently built
    pub async fn is_view_built(&self, view: &str) -> bool {
        self.inner.lock().await.index.is_built(view)
    }
}

impl DocumentStore for LocalStore {
    async fn get(&self, id: &str) -> Result<Document, StoreFailure> {
        self.inner.lock().await.get(id)
    }

    async fn put(&self, doc: Document) -> Result<Document, StoreFailure> {
        self.inner.lock().await.write(doc, self.quota_bytes)
    }

    async fn remove(&self, doc: &Document) -> Result<(), StoreFailure> {
        self.inner.lock().await.remove(doc)
    }

    async fn bulk_docs(&self, docs: Vec<Document>) -> Result<Vec<BulkItem>, StoreFailure> {
        self.inner.lock().await.write_all(docs, self.quota_bytes)
    }

    async fn all_docs(&self) -> Result<Vec<Document>, StoreFailure> {
        self.inner.lock().await.live_documents()
    }

    async fn query(&self, view: &str, params: &QueryParams) -> Result<Vec<ViewRow>, StoreFailure> {
        self.inner.lock().await.query(view, params)
    }

    async fn storage_estimate(&self) -> Result<Option<StorageEstimate>, StoreFailure> {
        let used = self.inner.lock().await.used_bytes();
        Ok(self
            .quota_bytes
            .map(|total| StorageEstimate { used, total }))
    }
}

impl Inner {
    fn get(&self, id: &str) -> Result<Document, StoreFailure> {
        match self.replica.get(id)? {
            Some(entry) if !entry.deleted => Ok(entry.to_document()?),
            _ => Err(StoreFailure::Missing { id: id.to_string() }),
        }
    }

    fn used_bytes(&self) -> u64 {
        self.saved.len() as u64
    }

    fn write(&mut self, doc: Document, quota: Option<u64>) -> Result<Document, StoreFailure> {
        let entry = self.prepare(&doc, quota, 0)?;
        self.stage(&entry)?;
        self.flush()?;

        Ok(Document {
            rev: Some(entry.rev),
            ..doc
        })
    }

    /// Stage every write, then save once
    ///
    /// Revision and quota failures are reported per document. A failed
    /// save undoes the whole batch and fails the call.
    fn write_all(
        &mut self,
        docs: Vec<Document>,
        quota: Option<u64>,
    ) -> Result<Vec<BulkItem>, StoreFailure> {
        let mut results = Vec::with_capacity(docs.len());
        let mut pending = 0;

        for doc in docs {
            match self.prepare(&doc, quota, pending) {
                Ok(entry) => {
                    self.stage(&entry)?;
                    pending += entry.size_hint();
                    results.push(Ok(Document {
                        rev: Some(entry.rev),
                        ..doc
                    }));
                }
                Err(failure) => results.push(Err(failure)),
            }
        }

        if results.iter().any(Result::is_ok) {
            self.flush()?;
        }
        Ok(results)
    }

    /// Check a write against the stored revision and the quota
    ///
    /// `pending` is the size of writes staged but not yet saved.
    fn prepare(
        &self,
        doc: &Document,
        quota: Option<u64>,
        pending: u64,
    ) -> Result<StoredEntry, StoreFailure> {
        if doc.id.is_empty() {
            return Err(StoreFailure::Http {
                status: 400,
                reason: "Document must have an _id".to_string(),
            });
        }

        let existing = self.replica.get(&doc.id)?;
        check_rev(doc, existing.as_ref())?;

        let entry = StoredEntry {
            id: doc.id.clone(),
            rev: Revision::after(existing.as_ref().map(|e| e.rev.as_str())).to_string(),
            deleted: doc.deleted,
            body: doc.body_json(),
        };

        if let Some(total) = quota {
            let used = self.used_bytes() + pending;
            if used + entry.size_hint() > total {
                return Err(StoreFailure::StorageFull { used, total });
            }
        }
        Ok(entry)
    }

    fn remove(&mut self, doc: &Document) -> Result<(), StoreFailure> {
        let existing = match self.replica.get(&doc.id)? {
            Some(entry) if !entry.deleted => entry,
            _ => {
                return Err(StoreFailure::Missing {
                    id: doc.id.clone(),
                })
            }
        };

        if doc.rev.as_deref() != Some(existing.rev.as_str()) {
            return Err(StoreFailure::Conflict {
                id: doc.id.clone(),
            });
        }

        let tombstone = StoredEntry {
            id: existing.id,
            rev: Revision::after(Some(&existing.rev)).to_string(),
            deleted: true,
            body: "{}".to_string(),
        };
        // Deletes free space, so they skip the quota check
        self.stage(&tombstone)?;
        self.flush()
    }

    fn live_documents(&self) -> Result<Vec<Document>, StoreFailure> {
        let mut docs = Vec::new();
        for entry in self.replica.entries()? {
            if !entry.deleted {
                docs.push(entry.to_document()?);
            }
        }
        docs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(docs)
    }

    fn query(&mut self, view: &str, params: &QueryParams) -> Result<Vec<ViewRow>, StoreFailure> {
        if !self.index.has_view(view) {
            return Err(StoreFailure::Missing {
                id: format!("_view/{}", view),
            });
        }

        if !self.index.is_built(view) {
            let docs = self.live_documents()?;
            let count = self.index.build(view, &docs)?;
            debug!("Built view index '{}' ({} rows)", view, count);
        }

        let mut rows = Vec::new();
        for row in self.index.query(view, params)? {
            let doc = if params.include_docs {
                Some(self.get(&row.id)?)
            } else {
                None
            };
            rows.push(ViewRow {
                id: row.id,
                key: row.key,
                doc,
            });
        }
        Ok(rows)
    }

    /// Apply one entry to the in-memory replica
    fn stage(&mut self, entry: &StoredEntry) -> Result<(), StoreFailure> {
        if let Err(e) = self.replica.write(entry) {
            self.rollback()?;
            return Err(e.into());
        }
        Ok(())
    }

    /// Persist staged writes and mark views stale
    ///
    /// If the save fails the replica goes back to its last saved state,
    /// so nothing the caller was told failed stays visible.
    fn flush(&mut self) -> Result<(), StoreFailure> {
        let bytes = self.replica.save();
        let persisted = match self.persistence {
            Some(ref persistence) => persistence.save_bytes(&bytes),
            None => Ok(()),
        };

        match persisted {
            Ok(()) => {
                self.saved = bytes;
                self.index.invalidate();
                Ok(())
            }
            Err(e) => {
                warn!("Failed to save replica, rolling back: {}", e);
                self.rollback()?;
                Err(e.into())
            }
        }
    }

    /// Drop unsaved writes by reloading the last saved replica
    fn rollback(&mut self) -> Result<(), StoreFailure> {
        self.index.invalidate();
        self.replica = ReplicaDocument::load(&self.saved)?;
        Ok(())
    }
}

/// Optimistic revision check for a write
fn check_rev(doc: &Document, existing: Option<&StoredEntry>) -> Result<(), StoreFailure> {
    let matches = match (existing, doc.rev.as_deref()) {
        (None, None) => true,
        // Recreating a deleted document needs no revision
        (Some(entry), None) => entry.deleted,
        (Some(entry), Some(rev)) => entry.rev == rev,
        (None, Some(_)) => false,
    };

    if matches {
        Ok(())
    } else {
        Err(StoreFailure::Conflict {
            id: doc.id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn test_config(temp_dir: &TempDir) -> Config {
        Config {
            data_dir: temp_dir.path().to_path_buf(),
            ..Default::default()
        }
    }

    fn memory_store() -> LocalStore {
        LocalStore::in_memory(vec![ViewDefinition::new("by_type", "type")]).unwrap()
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let store = memory_store();

        let saved = store
            .put(Document::new("a").with_field("title", "x"))
            .await
            .unwrap();
        assert!(saved.rev.as_deref().unwrap().starts_with("1-"));

        let fetched = store.get("a").await.unwrap();
        assert_eq!(fetched, saved);
    }

    #[tokio::test]
    async fn test_get_missing() {
        let store = memory_store();
        let err = store.get("nope").await.unwrap_err();
        assert!(matches!(err, StoreFailure::Missing { .. }));
    }

    #[tokio::test]
    async fn test_update_requires_current_rev() {
        let store = memory_store();
        let first = store.put(Document::new("a")).await.unwrap();

        let mut update = first.clone();
        update.set("title", "y");
        let second = store.put(update).await.unwrap();
        assert!(second.rev.as_deref().unwrap().starts_with("2-"));

        // Writing again from the first revision is a conflict
        let stale = first.with_field("title", "z");
        let err = store.put(stale).await.unwrap_err();
        assert!(matches!(err, StoreFailure::Conflict { .. }));

        // As is writing an existing doc with no rev at all
        let err = store.put(Document::new("a")).await.unwrap_err();
        assert!(matches!(err, StoreFailure::Conflict { .. }));

        assert_eq!(store.get("a").await.unwrap().get("title").unwrap(), "y");
    }

    #[tokio::test]
    async fn test_put_new_doc_with_rev_conflicts() {
        let store = memory_store();
        let err = store
            .put(Document::new("a").with_rev("3-abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreFailure::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_remove() {
        let store = memory_store();
        let saved = store.put(Document::new("a")).await.unwrap();

        let err = store.remove(&Document::new("a")).await.unwrap_err();
        assert!(matches!(err, StoreFailure::Conflict { .. }));

        store.remove(&saved).await.unwrap();
        assert!(matches!(
            store.get("a").await.unwrap_err(),
            StoreFailure::Missing { .. }
        ));

        // Removing again targets a missing document
        let err = store.remove(&saved).await.unwrap_err();
        assert!(matches!(err, StoreFailure::Missing { .. }));

        // A deleted id can be recreated, continuing the revision history
        let recreated = store.put(Document::new("a")).await.unwrap();
        assert!(recreated.rev.as_deref().unwrap().starts_with("3-"));
    }

    #[tokio::test]
    async fn test_all_docs_excludes_deleted() {
        let store = memory_store();
        store.put(Document::new("b")).await.unwrap();
        let a = store.put(Document::new("a")).await.unwrap();
        store.put(Document::new("c")).await.unwrap();
        store.remove(&a).await.unwrap();

        let ids: Vec<_> = store
            .all_docs()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_bulk_docs_partial_failure() {
        let store = memory_store();
        store.put(Document::new("b")).await.unwrap();

        let results = store
            .bulk_docs(vec![Document::new("a"), Document::new("b")])
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(StoreFailure::Conflict { .. })));
        assert!(store.get("a").await.is_ok());
    }

    #[tokio::test]
    async fn test_query_builds_lazily_and_refreshes() {
        let store = memory_store();
        store
            .put(Document::new("a").with_field("type", "todo"))
            .await
            .unwrap();
        assert!(!store.is_view_built("by_type").await);

        let rows = store
            .query("by_type", &QueryParams::with_key("todo"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].doc.is_none());
        assert!(store.is_view_built("by_type").await);

        // A write marks the index stale; the next query sees the new doc
        store
            .put(Document::new("b").with_field("type", "todo"))
            .await
            .unwrap();
        assert!(!store.is_view_built("by_type").await);

        let rows = store
            .query("by_type", &QueryParams::with_key("todo").include_docs())
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].doc.as_ref().unwrap().id, "b");
        assert_eq!(rows[1].key, json!("todo"));
    }

    #[tokio::test]
    async fn test_query_unknown_view() {
        let store = memory_store();
        let err = store
            .query("nope", &QueryParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreFailure::Missing { .. }));
    }

    #[tokio::test]
    async fn test_quota_rejects_without_mutation() {
        let store = memory_store();
        let used = store.inner.lock().await.used_bytes();
        let store = store.with_quota(used + 64);

        let big = Document::new("big").with_field("body", "x".repeat(1000));
        let err = store.put(big).await.unwrap_err();
        assert!(matches!(err, StoreFailure::StorageFull { .. }));
        assert!(store.get("big").await.is_err());

        let estimate = store.storage_estimate().await.unwrap().unwrap();
        assert_eq!(estimate.used, used);
        assert_eq!(estimate.total, used + 64);
    }

    #[tokio::test]
    async fn test_no_estimate_without_quota() {
        let store = memory_store();
        assert!(store.storage_estimate().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bulk_docs_checks_quota_across_batch() {
        let store = memory_store();
        let used = store.inner.lock().await.used_bytes();
        let store = store.with_quota(used + 400);

        let doc = |id: &str| Document::new(id).with_field("body", "x".repeat(150));
        let results = store
            .bulk_docs(vec![doc("a"), doc("b"), doc("c")])
            .await
            .unwrap();

        // Each fits alone, but the third would overflow what the batch staged
        assert!(results[0].is_ok());
        assert!(results[1].is_ok());
        assert!(matches!(results[2], Err(StoreFailure::StorageFull { .. })));
        assert!(store.get("b").await.is_ok());
        assert!(store.get("c").await.is_err());
    }

    #[tokio::test]
    async fn test_failed_save_leaves_no_trace() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(&temp_dir);
        let store = LocalStore::open(&config).unwrap();

        store
            .put(Document::new("a").with_field("type", "todo"))
            .await
            .unwrap();
        let rows = store
            .query("by_type", &QueryParams::with_key("todo"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);

        // A directory where the temp file goes makes every save fail
        let blocker = config.replica_path().with_extension("tmp");
        std::fs::create_dir(&blocker).unwrap();

        let b = Document::new("b").with_field("type", "todo");
        assert!(store.put(b.clone()).await.is_err());
        assert!(matches!(
            store.get("b").await.unwrap_err(),
            StoreFailure::Missing { .. }
        ));

        let results = store.bulk_docs(vec![b.clone()]).await;
        assert!(results.is_err());
        assert_eq!(store.all_docs().await.unwrap().len(), 1);

        std::fs::remove_dir(&blocker).unwrap();

        // The failed writes did not advance any revision
        let saved = store.put(b).await.unwrap();
        assert!(saved.rev.as_deref().unwrap().starts_with("1-"));

        let rows = store
            .query("by_type", &QueryParams::with_key("todo"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_data_persists_across_reopens() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(&temp_dir);

        {
            let store = LocalStore::open(&config).unwrap();
            store
                .put(Document::new("a").with_field("type", "todo"))
                .await
                .unwrap();
        }

        let store = LocalStore::open(&config).unwrap();
        assert!(config.replica_path().exists());
        assert!(config.index_path().exists());

        let doc = store.get("a").await.unwrap();
        assert_eq!(doc.get("type").unwrap(), "todo");

        let rows = store
            .query("by_type", &QueryParams::with_key("todo"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }
}
