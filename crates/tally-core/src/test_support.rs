//! Test double for the document store
//!
//! [`ScriptedStore`] wraps an in-memory [`LocalStore`] and lets a test
//! inject failures: one-off failures queued per call, or a standing outage
//! that fails every call until lifted.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::config::Config;
use crate::document::Document;
use crate::error::{NetworkFailure, StoreFailure};
use crate::store::{BulkItem, DocumentStore, LocalStore, QueryParams, StorageEstimate, ViewRow};

#[derive(Default)]
struct Script {
    queued: VecDeque<StoreFailure>,
    outage: Option<NetworkFailure>,
    calls: HashMap<&'static str, usize>,
}

pub(crate) struct ScriptedStore {
    inner: LocalStore,
    script: Mutex<Script>,
}

impl ScriptedStore {
    /// In-memory store with the default views
    pub fn new() -> Self {
        Self::from_store(LocalStore::in_memory(Config::default().views).unwrap())
    }

    pub fn with_quota(quota_bytes: u64) -> Self {
        Self::from_store(
            LocalStore::in_memory(Config::default().views)
                .unwrap()
                .with_quota(quota_bytes),
        )
    }

    fn from_store(inner: LocalStore) -> Self {
        Self {
            inner,
            script: Mutex::new(Script::default()),
        }
    }

    pub fn local(&self) -> &LocalStore {
        &self.inner
    }

    /// Fail the next call, whichever operation it is
    pub fn fail_next(&self, failure: StoreFailure) {
        self.script.lock().unwrap().queued.push_back(failure);
    }

    /// Fail every call until [`go_online`](Self::go_online)
    pub fn go_offline(&self, failure: NetworkFailure) {
        self.script.lock().unwrap().outage = Some(failure);
    }

    pub fn go_online(&self) {
        self.script.lock().unwrap().outage = None;
    }

    /// Number of calls made to one operation
    pub fn calls(&self, op: &str) -> usize {
        self.script
            .lock()
            .unwrap()
            .calls
            .get(op)
            .copied()
            .unwrap_or(0)
    }

    fn count(&self, op: &'static str) {
        *self.script.lock().unwrap().calls.entry(op).or_default() += 1;
    }

    fn before(&self, op: &'static str) -> Result<(), StoreFailure> {
        let mut script = self.script.lock().unwrap();
        *script.calls.entry(op).or_default() += 1;

        if let Some(failure) = script.queued.pop_front() {
            return Err(failure);
        }
        match script.outage {
            Some(failure) => Err(StoreFailure::Network(failure)),
            None => Ok(()),
        }
    }
}

impl DocumentStore for ScriptedStore {
    async fn get(&self, id: &str) -> Result<Document, StoreFailure> {
        self.before("get")?;
        self.inner.get(id).await
    }

    async fn put(&self, doc: Document) -> Result<Document, StoreFailure> {
        self.before("put")?;
        self.inner.put(doc).await
    }

    async fn remove(&self, doc: &Document) -> Result<(), StoreFailure> {
        self.before("remove")?;
        self.inner.remove(doc).await
    }

    async fn bulk_docs(&self, docs: Vec<Document>) -> Result<Vec<BulkItem>, StoreFailure> {
        self.before("bulk_docs")?;
        self.inner.bulk_docs(docs).await
    }

    async fn all_docs(&self) -> Result<Vec<Document>, StoreFailure> {
        self.before("all_docs")?;
        self.inner.all_docs().await
    }

    async fn query(&self, view: &str, params: &QueryParams) -> Result<Vec<ViewRow>, StoreFailure> {
        self.before("query")?;
        self.inner.query(view, params).await
    }

    async fn storage_estimate(&self) -> Result<Option<StorageEstimate>, StoreFailure> {
        // Estimates are local bookkeeping; scripted failures never apply
        self.count("storage_estimate");
        self.inner.storage_estimate().await
    }
}
