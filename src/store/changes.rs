//! Pending write graph - per-resource deltas merged before a bulk write
//!
//! ## Merge rules
//!
//! - `set` replaces every value of a property; an empty value list clears it.
//!   A later `set` on the same property wins.
//! - `add`/`remove` edit single values. The last edit of a value wins: adding
//!   it drops a pending removal of it and vice versa.
//! - Edits applied after a `set` are folded into the set values, so a set
//!   followed by an add still writes both.

use serde::{Deserialize, Serialize};
use std::collections::{btree_map, BTreeMap, BTreeSet};

use super::model::{Property, ResourceHandle, Value};

/// Changes to one resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDelta {
    set: BTreeMap<Property, BTreeSet<Value>>,
    add: BTreeMap<Property, BTreeSet<Value>>,
    remove: BTreeMap<Property, BTreeSet<Value>>,
}

impl ResourceDelta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a property with a single value
    pub fn set(&mut self, property: Property, value: impl Into<Value>) -> &mut Self {
        self.set_all(property, [value.into()])
    }

    /// Replace a property with the given values
    pub fn set_all(
        &mut self,
        property: Property,
        values: impl IntoIterator<Item = Value>,
    ) -> &mut Self {
        self.add.remove(&property);
        self.remove.remove(&property);
        self.set.insert(property, values.into_iter().collect());
        self
    }

    /// Remove every value of a property
    pub fn clear(&mut self, property: Property) -> &mut Self {
        self.set_all(property, [])
    }

    pub fn add(&mut self, property: Property, value: impl Into<Value>) -> &mut Self {
        let value = value.into();
        if let Some(values) = self.set.get_mut(&property) {
            values.insert(value);
            return self;
        }
        take_value(&mut self.remove, property, &value);
        self.add.entry(property).or_default().insert(value);
        self
    }

    pub fn remove(&mut self, property: Property, value: impl Into<Value>) -> &mut Self {
        let value = value.into();
        if let Some(values) = self.set.get_mut(&property) {
            values.remove(&value);
            return self;
        }
        take_value(&mut self.add, property, &value);
        self.remove.entry(property).or_default().insert(value);
        self
    }

    /// Fold a later delta into this one
    pub fn merge(&mut self, later: ResourceDelta) {
        for (property, values) in later.set {
            self.set_all(property, values);
        }
        for (property, values) in later.add {
            for value in values {
                self.add(property, value);
            }
        }
        for (property, values) in later.remove {
            for value in values {
                self.remove(property, value);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.add.is_empty() && self.remove.is_empty()
    }

    /// Properties overwritten by this delta
    pub fn overwrites(&self) -> &BTreeMap<Property, BTreeSet<Value>> {
        &self.set
    }

    pub fn additions(&self) -> &BTreeMap<Property, BTreeSet<Value>> {
        &self.add
    }

    pub fn removals(&self) -> &BTreeMap<Property, BTreeSet<Value>> {
        &self.remove
    }

    /// Values a property is overwritten with, if it is
    pub fn overwritten(&self, property: Property) -> Option<&BTreeSet<Value>> {
        self.set.get(&property)
    }
}

fn take_value(map: &mut BTreeMap<Property, BTreeSet<Value>>, property: Property, value: &Value) {
    if let Some(values) = map.get_mut(&property) {
        values.remove(value);
        if values.is_empty() {
            map.remove(&property);
        }
    }
}

/// Deltas for any number of resources, written as one batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    resources: BTreeMap<ResourceHandle, ResourceDelta>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delta for a resource, created empty on first use
    pub fn entry(&mut self, handle: ResourceHandle) -> &mut ResourceDelta {
        self.resources.entry(handle).or_default()
    }

    pub fn merge_delta(&mut self, handle: ResourceHandle, delta: ResourceDelta) {
        if delta.is_empty() {
            return;
        }
        match self.resources.entry(handle) {
            btree_map::Entry::Vacant(slot) => {
                slot.insert(delta);
            }
            btree_map::Entry::Occupied(mut slot) => slot.get_mut().merge(delta),
        }
    }

    /// Fold a later change set into this one
    pub fn merge(&mut self, later: ChangeSet) {
        for (handle, delta) in later.resources {
            self.merge_delta(handle, delta);
        }
    }

    pub fn get(&self, handle: &ResourceHandle) -> Option<&ResourceDelta> {
        self.resources.get(handle)
    }

    /// Number of resources touched
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.values().all(ResourceDelta::is_empty)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ResourceHandle, &ResourceDelta)> {
        self.resources.iter()
    }
}

impl IntoIterator for ChangeSet {
    type Item = (ResourceHandle, ResourceDelta);
    type IntoIter = btree_map::IntoIter<ResourceHandle, ResourceDelta>;

    fn into_iter(self) -> Self::IntoIter {
        self.resources.into_iter()
    }
}
