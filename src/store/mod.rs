//! Resource store - the graph store the roster is mirrored into
//!
//! ## Design
//!
//! The cache talks to the store through [`ResourceStore`] only. Three
//! operations are enough:
//!
//! ```text
//! create(graph)   -> mappings    one atomic insert, handles minted by the store
//! apply(changes)  -> ()          one bulk write of a merged change set
//! query(query)    -> rows        link query with selected bindings
//! ```
//!
//! Two implementations share the [`ResourceGraph`] engine: [`MemoryStore`]
//! for tests (records calls, injects faults) and [`SledStore`] which keeps
//! every resource durable in sled.

mod changes;
mod graph;
mod memory;
mod model;
mod sled_store;

use async_trait::async_trait;

use crate::error::SyncError;

pub use changes::{ChangeSet, ResourceDelta};
pub use graph::{ResourceGraph, StoredResource};
pub use memory::MemoryStore;
pub use model::{
    CreateGraph, Link, LinkQuery, Mappings, NewLink, NewResource, Property, QueryRow,
    ResourceHandle, ResourceKind, Selection, Term, Value,
};
pub use sled_store::{SledStore, SledStoreConfig};

/// Capability set the cache needs from the graph store
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Atomically create a graph of resources
    async fn create(&self, graph: CreateGraph) -> Result<Mappings, SyncError>;

    /// Apply one merged change set as a single bulk write
    async fn apply(&self, changes: ChangeSet) -> Result<(), SyncError>;

    /// Run a link query
    async fn query(&self, query: LinkQuery) -> Result<Vec<QueryRow>, SyncError>;
}
