//! Safe operations facade
//!
//! Every read and write the application makes goes through
//! [`SafeOperations`]. Each call is timed, its raw store failure (if any) is
//! classified into a [`DatabaseError`], and the outcome is recorded into the
//! shared health metrics. Nothing here retries; callers that want retries
//! use [`retry_transient`](crate::retry::retry_transient) on top.
//!
//! ## Usage
//!
//! ```ignore
//! let ops = SafeOperations::new(Arc::new(store));
//!
//! match ops.safe_get("todo:1").await? {
//!     Some(doc) => println!("{}", doc.id),
//!     None => println!("not found"),
//! }
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::document::Document;
use crate::error::{classify, DatabaseError, StoreFailure};
use crate::health::MetricsCell;
use crate::store::{DocumentStore, QueryParams, ViewRow};

/// Per-document outcome of a bulk write
pub type BulkResult = Result<Document, DatabaseError>;

/// Error-classifying, health-recording wrapper around a store
pub struct SafeOperations<S> {
    store: Arc<S>,
    metrics: Arc<MetricsCell>,
}

impl<S: DocumentStore> SafeOperations<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_metrics(store, Arc::new(MetricsCell::new()))
    }

    /// Record into an existing metrics cell
    pub fn with_metrics(store: Arc<S>, metrics: Arc<MetricsCell>) -> Self {
        Self { store, metrics }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Metrics this facade records into
    pub fn metrics(&self) -> &Arc<MetricsCell> {
        &self.metrics
    }

    /// Fetch a document; a missing document is `Ok(None)`
    pub async fn safe_get(&self, id: &str) -> Result<Option<Document>, DatabaseError> {
        debug!("safe_get {}", id);
        let (elapsed, result) = self.fetch(id).await;
        self.record(elapsed, &result);
        result
    }

    /// Write a document. Conflicts surface as `SYNC_CONFLICT`.
    pub async fn safe_put(&self, doc: Document) -> Result<Document, DatabaseError> {
        debug!("safe_put {}", doc.id);
        let (elapsed, result) = timed(self.store.put(doc)).await;
        let result = result.map_err(|e| classify(&e));
        self.record(elapsed, &result);
        result
    }

    /// Delete a document at its current revision
    pub async fn safe_remove(&self, doc: &Document) -> Result<(), DatabaseError> {
        debug!("safe_remove {}", doc.id);
        let (elapsed, result) = timed(self.store.remove(doc)).await;
        let result = result.map_err(|e| classify(&e));
        self.record(elapsed, &result);
        result
    }

    /// Write many documents.
    ///
    /// The outer error means the whole call failed. Otherwise there is one
    /// entry per input document, in input order.
    pub async fn safe_bulk_docs(
        &self,
        docs: Vec<Document>,
    ) -> Result<Vec<BulkResult>, DatabaseError> {
        debug!("safe_bulk_docs ({} documents)", docs.len());
        let (elapsed, result) = timed(self.store.bulk_docs(docs)).await;

        let items = match result {
            Ok(items) => items,
            Err(failure) => {
                let error = classify(&failure);
                self.metrics.apply(|m| m.record_failure(elapsed, &error));
                return Err(error);
            }
        };

        let results: Vec<BulkResult> = items
            .into_iter()
            .map(|item| item.map_err(|e| classify(&e)))
            .collect();

        // Per-item conflicts still mean the store answered
        let health_failure = results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .find(|e| e.kind.counts_against_health());
        match health_failure {
            Some(error) => self.metrics.apply(|m| m.record_failure(elapsed, error)),
            None => self.metrics.apply(|m| m.record_success(elapsed)),
        }

        debug!(
            "safe_bulk_docs finished in {:?} ({} failed)",
            elapsed,
            results.iter().filter(|r| r.is_err()).count()
        );
        Ok(results)
    }

    /// All live documents
    pub async fn safe_all_docs(&self) -> Result<Vec<Document>, DatabaseError> {
        debug!("safe_all_docs");
        let (elapsed, result) = timed(self.store.all_docs()).await;
        let result = result.map_err(|e| classify(&e));
        self.record(elapsed, &result);
        result
    }

    /// Query a named view
    pub async fn safe_query(
        &self,
        view: &str,
        params: &QueryParams,
    ) -> Result<Vec<ViewRow>, DatabaseError> {
        debug!("safe_query {}", view);
        let (elapsed, result) = timed(self.store.query(view, params)).await;
        let result = result.map_err(|e| classify(&e));
        self.record(elapsed, &result);
        result
    }

    /// Timed, classified get that leaves the metrics alone.
    ///
    /// The health monitor uses this so it can record the probe together
    /// with the rest of its update.
    pub(crate) async fn fetch(
        &self,
        id: &str,
    ) -> (Duration, Result<Option<Document>, DatabaseError>) {
        let (elapsed, result) = timed(self.store.get(id)).await;
        let result = match result {
            Ok(doc) => Ok(Some(doc)),
            Err(failure) => {
                let error = classify(&failure);
                if error.is_not_found() {
                    Ok(None)
                } else {
                    Err(error)
                }
            }
        };
        (elapsed, result)
    }

    fn record<T>(&self, elapsed: Duration, result: &Result<T, DatabaseError>) {
        match result {
            Ok(_) => {
                debug!("Operation succeeded in {:?}", elapsed);
                self.metrics.apply(|m| m.record_success(elapsed));
            }
            Err(error) => {
                debug!("Operation failed in {:?}: {}", elapsed, error);
                self.metrics.apply(|m| m.record_failure(elapsed, error));
            }
        }
    }
}

async fn timed<T>(
    operation: impl Future<Output = Result<T, StoreFailure>>,
) -> (Duration, Result<T, StoreFailure>) {
    let started = Instant::now();
    let result = operation.await;
    (started.elapsed(), result)
}
