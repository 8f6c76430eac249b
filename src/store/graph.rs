//! In-memory resource graph
//!
//! Shared engine behind [`MemoryStore`](super::MemoryStore) and
//! [`SledStore`](super::SledStore): applies creation graphs and change sets,
//! and answers link queries. Persistence is layered on top by the caller.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::changes::ChangeSet;
use super::model::{
    CreateGraph, Link, LinkQuery, Mappings, Property, QueryRow, ResourceHandle, ResourceKind,
    Selection, Term, Value,
};
use crate::error::SyncError;

/// A resource as held by the store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredResource {
    /// None for resources that only ever appeared as a link subject
    pub kind: Option<ResourceKind>,
    pub properties: BTreeMap<Property, BTreeSet<Value>>,
}

impl StoredResource {
    pub fn values(&self, property: Property) -> impl Iterator<Item = &Value> {
        self.properties.get(&property).into_iter().flatten()
    }

    pub fn contains(&self, property: Property, value: &Value) -> bool {
        self.properties
            .get(&property)
            .map(|values| values.contains(value))
            .unwrap_or(false)
    }

    /// First text value of a property
    pub fn text(&self, property: Property) -> Option<&str> {
        self.values(property).find_map(Value::as_text)
    }

    fn insert(&mut self, property: Property, value: Value) {
        self.properties.entry(property).or_default().insert(value);
    }
}

/// Prior state of a set of resources; `None` marks one that did not exist
pub type Snapshot = HashMap<ResourceHandle, Option<StoredResource>>;

#[derive(Debug, Default)]
pub struct ResourceGraph {
    resources: HashMap<ResourceHandle, StoredResource>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_resources(
        resources: impl IntoIterator<Item = (ResourceHandle, StoredResource)>,
    ) -> Self {
        Self {
            resources: resources.into_iter().collect(),
        }
    }

    pub fn get(&self, handle: &ResourceHandle) -> Option<&StoredResource> {
        self.resources.get(handle)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Capture the current state of `handles`
    pub fn snapshot<'a>(&self, handles: impl IntoIterator<Item = &'a ResourceHandle>) -> Snapshot {
        handles
            .into_iter()
            .map(|handle| (handle.clone(), self.resources.get(handle).cloned()))
            .collect()
    }

    /// Undo a write to `touched`, restoring what `snapshot` captured.
    ///
    /// Touched handles missing from the snapshot were created by the write
    /// and are removed.
    pub fn restore(&mut self, mut snapshot: Snapshot, touched: &[ResourceHandle]) {
        for handle in touched {
            match snapshot.remove(handle).flatten() {
                Some(resource) => {
                    self.resources.insert(handle.clone(), resource);
                }
                None => {
                    self.resources.remove(handle);
                }
            }
        }
    }

    /// Handles of every resource of a kind, sorted
    pub fn handles_of_kind(&self, kind: ResourceKind) -> Vec<ResourceHandle> {
        let mut handles: Vec<_> = self
            .resources
            .iter()
            .filter(|(_, resource)| resource.kind == Some(kind))
            .map(|(handle, _)| handle.clone())
            .collect();
        handles.sort();
        handles
    }

    /// Insert a creation graph, minting a handle per new resource.
    ///
    /// Validation happens before anything is inserted, so a rejected graph
    /// leaves the store untouched. Returns the mappings and the handles of
    /// every resource written.
    pub fn insert_created(
        &mut self,
        graph: CreateGraph,
    ) -> Result<(Mappings, Vec<ResourceHandle>), SyncError> {
        let mut mappings = Mappings::new();
        for resource in &graph.resources {
            if mappings
                .insert(resource.key.clone(), ResourceHandle::mint())
                .is_some()
            {
                return Err(SyncError::Creation(format!(
                    "duplicate resource key '{}'",
                    resource.key
                )));
            }
        }

        let resolve = |key: &str| {
            mappings
                .get(key)
                .cloned()
                .ok_or_else(|| SyncError::Creation(format!("unknown resource key '{key}'")))
        };

        let mut created = Vec::with_capacity(graph.resources.len());
        for resource in graph.resources {
            let handle = resolve(&resource.key)?;
            let mut stored = StoredResource {
                kind: Some(resource.kind),
                properties: BTreeMap::new(),
            };
            for (property, term) in resource.properties {
                let value = match term {
                    Term::Value(value) => value,
                    Term::New(key) => Value::Resource(resolve(&key)?),
                };
                stored.insert(property, value);
            }
            created.push((handle, stored));
        }

        let mut links = Vec::with_capacity(graph.links.len());
        for link in graph.links {
            links.push((link.subject, link.property, resolve(&link.target)?));
        }

        let mut touched: Vec<_> = created.iter().map(|(handle, _)| handle.clone()).collect();
        self.resources.extend(created);
        for (subject, property, target) in links {
            self.resources
                .entry(subject.clone())
                .or_default()
                .insert(property, Value::Resource(target));
            touched.push(subject);
        }

        Ok((mappings, touched))
    }

    /// Apply a change set; unknown handles are created without a kind.
    ///
    /// Returns the handles of every resource written.
    pub fn apply(&mut self, changes: ChangeSet) -> Vec<ResourceHandle> {
        let mut touched = Vec::with_capacity(changes.len());
        for (handle, delta) in changes {
            let resource = self.resources.entry(handle.clone()).or_default();
            for (property, values) in delta.overwrites() {
                if values.is_empty() {
                    resource.properties.remove(property);
                } else {
                    resource.properties.insert(*property, values.clone());
                }
            }
            for (property, values) in delta.additions() {
                resource
                    .properties
                    .entry(*property)
                    .or_default()
                    .extend(values.iter().cloned());
            }
            for (property, values) in delta.removals() {
                if let Some(existing) = resource.properties.get_mut(property) {
                    for value in values {
                        existing.remove(value);
                    }
                    if existing.is_empty() {
                        resource.properties.remove(property);
                    }
                }
            }
            touched.push(handle);
        }
        touched
    }

    /// Answer a link query; rows come back sorted by handle
    pub fn query(&self, query: &LinkQuery) -> Vec<QueryRow> {
        let mut candidates: Vec<&ResourceHandle> = match &query.link {
            Link::Any => self.resources.keys().collect(),
            Link::From { subjects, via } => {
                let reachable: BTreeSet<&ResourceHandle> = subjects
                    .iter()
                    .filter_map(|subject| self.resources.get(subject))
                    .flat_map(|subject| subject.values(*via))
                    .filter_map(Value::as_resource)
                    .collect();
                reachable.into_iter().collect()
            }
            Link::To { via, objects } => {
                let objects: Vec<Value> =
                    objects.iter().cloned().map(Value::Resource).collect();
                self.resources
                    .iter()
                    .filter(|(_, resource)| {
                        objects.iter().any(|object| resource.contains(*via, object))
                    })
                    .map(|(handle, _)| handle)
                    .collect()
            }
        };
        candidates.sort();

        let incoming = self.incoming_index(&query.select);

        candidates
            .into_iter()
            .filter_map(|handle| {
                let resource = self.resources.get(handle)?;
                if query.kind.is_some() && resource.kind != query.kind {
                    return None;
                }
                let bindings = query
                    .select
                    .iter()
                    .map(|selection| {
                        let values: Vec<Value> = match selection {
                            Selection::Out(property) => {
                                resource.values(*property).cloned().collect()
                            }
                            Selection::In(property) => incoming
                                .get(&(*property, handle))
                                .map(|subjects| {
                                    subjects.iter().map(|s| Value::Resource((*s).clone())).collect()
                                })
                                .unwrap_or_default(),
                        };
                        (*selection, values)
                    })
                    .collect();
                Some(QueryRow {
                    resource: handle.clone(),
                    bindings,
                })
            })
            .collect()
    }

    /// Reverse edges for the incoming selections of a query
    fn incoming_index<'a>(
        &'a self,
        select: &[Selection],
    ) -> HashMap<(Property, &'a ResourceHandle), BTreeSet<&'a ResourceHandle>> {
        let properties: BTreeSet<Property> = select
            .iter()
            .filter_map(|selection| match selection {
                Selection::In(property) => Some(*property),
                Selection::Out(_) => None,
            })
            .collect();

        let mut index: HashMap<_, BTreeSet<_>> = HashMap::new();
        if properties.is_empty() {
            return index;
        }
        for (subject, resource) in &self.resources {
            for property in &properties {
                for target in resource.values(*property).filter_map(Value::as_resource) {
                    index.entry((*property, target)).or_default().insert(subject);
                }
            }
        }
        index
    }
}
