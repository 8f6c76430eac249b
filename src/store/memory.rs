//! In-memory store with a call log and fault injection

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

use super::changes::ChangeSet;
use super::graph::{ResourceGraph, StoredResource};
use super::model::{
    CreateGraph, LinkQuery, Mappings, Property, QueryRow, ResourceHandle, ResourceKind, Value,
};
use super::ResourceStore;
use crate::error::SyncError;

#[derive(Debug, Default)]
struct CallLog {
    creates: usize,
    batches: Vec<ChangeSet>,
    queries: Vec<LinkQuery>,
}

/// Store keeping its graph in memory.
///
/// Every call through [`ResourceStore`] is recorded so tests can assert how
/// many writes happened and in which order queries ran.
#[derive(Debug, Default)]
pub struct MemoryStore {
    graph: RwLock<ResourceGraph>,
    log: RwLock<CallLog>,
    fail_creates: AtomicBool,
    fail_writes: AtomicBool,
    fail_queries: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert resources directly, bypassing the call log
    pub async fn seed(&self, graph: CreateGraph) -> Result<Mappings, SyncError> {
        let (mappings, _) = self.graph.write().await.insert_created(graph)?;
        Ok(mappings)
    }

    /// Apply changes directly, bypassing the call log
    pub async fn seed_changes(&self, changes: ChangeSet) {
        self.graph.write().await.apply(changes);
    }

    pub async fn resource(&self, handle: &ResourceHandle) -> Option<StoredResource> {
        self.graph.read().await.get(handle).cloned()
    }

    /// All values of a property, empty when the resource is missing
    pub async fn values(&self, handle: &ResourceHandle, property: Property) -> Vec<Value> {
        self.graph
            .read()
            .await
            .get(handle)
            .map(|resource| resource.values(property).cloned().collect())
            .unwrap_or_default()
    }

    pub async fn handles_of_kind(&self, kind: ResourceKind) -> Vec<ResourceHandle> {
        self.graph.read().await.handles_of_kind(kind)
    }

    pub async fn create_count(&self) -> usize {
        self.log.read().await.creates
    }

    /// Number of bulk writes received
    pub async fn apply_count(&self) -> usize {
        self.log.read().await.batches.len()
    }

    pub async fn applied_batches(&self) -> Vec<ChangeSet> {
        self.log.read().await.batches.clone()
    }

    /// Queries received, in call order
    pub async fn queries(&self) -> Vec<LinkQuery> {
        self.log.read().await.queries.clone()
    }

    pub async fn clear_log(&self) {
        *self.log.write().await = CallLog::default();
    }

    pub fn fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn create(&self, graph: CreateGraph) -> Result<Mappings, SyncError> {
        self.log.write().await.creates += 1;
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(SyncError::Store("injected create failure".to_string()));
        }
        let (mappings, touched) = self.graph.write().await.insert_created(graph)?;
        debug!(resources = touched.len(), "Memory store created resources");
        Ok(mappings)
    }

    async fn apply(&self, changes: ChangeSet) -> Result<(), SyncError> {
        self.log.write().await.batches.push(changes.clone());
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SyncError::Store("injected write failure".to_string()));
        }
        self.graph.write().await.apply(changes);
        Ok(())
    }

    async fn query(&self, query: LinkQuery) -> Result<Vec<QueryRow>, SyncError> {
        self.log.write().await.queries.push(query.clone());
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(SyncError::Query("injected query failure".to_string()));
        }
        Ok(self.graph.read().await.query(&query))
    }
}
