//! Sled Store - durable resource graph
//!
//! Every resource is stored as JSON under its handle in the `resources`
//! tree. The full graph is loaded into memory on open; each create or apply
//! rewrites the touched resources in one sled batch. If that batch fails the
//! in-memory change is rolled back, so memory never runs ahead of disk.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::changes::ChangeSet;
use super::graph::{ResourceGraph, Snapshot, StoredResource};
use super::model::{CreateGraph, LinkQuery, Mappings, QueryRow, ResourceHandle};
use super::ResourceStore;
use crate::error::SyncError;

/// Configuration for the sled store
#[derive(Debug, Clone)]
pub struct SledStoreConfig {
    /// Path to sled database
    pub db_path: PathBuf,
    /// Cache size in bytes
    pub cache_size: u64,
}

impl SledStoreConfig {
    pub fn at_path(path: impl AsRef<Path>) -> Self {
        Self {
            db_path: path.as_ref().to_path_buf(),
            cache_size: 16 * 1024 * 1024, // 16MB
        }
    }
}

/// Resource store backed by sled
pub struct SledStore {
    /// Sled database
    db: ::sled::Db,
    /// Resources tree, keyed by handle
    resources: ::sled::Tree,
    graph: RwLock<ResourceGraph>,
    fail_persist: AtomicBool,
}

impl SledStore {
    /// Create a new sled store, loading every persisted resource
    pub async fn new(config: SledStoreConfig) -> Result<Self, SyncError> {
        // Ensure parent directory exists
        if let Some(parent) = config.db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let db = ::sled::Config::new()
            .path(&config.db_path)
            .cache_capacity(config.cache_size)
            .open()?;
        let resources = db.open_tree("resources")?;

        let mut loaded = Vec::new();
        for item in resources.iter() {
            let (key, bytes) = item?;
            let handle = ResourceHandle::new(String::from_utf8_lossy(&key).into_owned());
            match serde_json::from_slice::<StoredResource>(&bytes) {
                Ok(resource) => loaded.push((handle, resource)),
                Err(e) => {
                    warn!(handle = %handle, error = %e, "Skipping unreadable resource");
                }
            }
        }
        let graph = ResourceGraph::from_resources(loaded);

        info!(
            path = %config.db_path.display(),
            resources = graph.len(),
            "SledStore initialized"
        );

        Ok(Self {
            db,
            resources,
            graph: RwLock::new(graph),
            fail_persist: AtomicBool::new(false),
        })
    }

    /// Create a sled store at a specific path
    pub async fn at_path(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        Self::new(SledStoreConfig::at_path(path)).await
    }

    /// Number of resources held
    pub async fn len(&self) -> usize {
        self.graph.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.graph.read().await.is_empty()
    }

    pub async fn resource(&self, handle: &ResourceHandle) -> Option<StoredResource> {
        self.graph.read().await.get(handle).cloned()
    }

    /// Flush changes to disk
    pub async fn flush(&self) -> Result<(), SyncError> {
        self.db.flush_async().await?;
        Ok(())
    }

    #[cfg(test)]
    fn fail_persist(&self, fail: bool) {
        self.fail_persist.store(fail, Ordering::SeqCst);
    }

    /// Persist touched resources, or roll the graph back to `before`
    fn commit(
        &self,
        graph: &mut ResourceGraph,
        before: Snapshot,
        touched: &[ResourceHandle],
    ) -> Result<(), SyncError> {
        let result = self.persist(graph, touched);
        if let Err(e) = &result {
            warn!(resources = touched.len(), error = %e, "Persist failed, rolling back");
            graph.restore(before, touched);
        }
        result
    }

    /// Write the current state of touched resources in one batch
    fn persist(&self, graph: &ResourceGraph, touched: &[ResourceHandle]) -> Result<(), SyncError> {
        if self.fail_persist.load(Ordering::SeqCst) {
            return Err(SyncError::Store("persist disabled".to_string()));
        }
        let mut batch = ::sled::Batch::default();
        for handle in touched {
            if let Some(resource) = graph.get(handle) {
                batch.insert(handle.as_str().as_bytes(), serde_json::to_vec(resource)?);
            }
        }
        self.resources.apply_batch(batch)?;
        debug!(resources = touched.len(), "Resources persisted");
        Ok(())
    }
}

#[async_trait]
impl ResourceStore for SledStore {
    async fn create(&self, graph: CreateGraph) -> Result<Mappings, SyncError> {
        let mut state = self.graph.write().await;
        // Minted handles are fresh, so only link subjects can pre-exist
        let before = state.snapshot(graph.links.iter().map(|link| &link.subject));
        let (mappings, touched) = state.insert_created(graph)?;
        self.commit(&mut state, before, &touched)?;
        Ok(mappings)
    }

    async fn apply(&self, changes: ChangeSet) -> Result<(), SyncError> {
        let mut state = self.graph.write().await;
        let before = state.snapshot(changes.iter().map(|(handle, _)| handle));
        let touched = state.apply(changes);
        self.commit(&mut state, before, &touched)
    }

    async fn query(&self, query: LinkQuery) -> Result<Vec<QueryRow>, SyncError> {
        Ok(self.graph.read().await.query(&query))
    }
}
