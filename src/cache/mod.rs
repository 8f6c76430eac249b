//! Sync cache - identity index of accounts and contacts over the store
//!
//! ## Design
//!
//! The cache maps every external account and contact to the store handles
//! minted for it, so an event can be turned into a delta without a store
//! read. It is owned by a single consumer task and mutated through
//! `&mut self`; no locking is involved.
//!
//! Writes take one of two paths:
//!
//! - Creation (accounts, contacts, contact groups) goes straight to the
//!   store, because the minted handles are needed before anything else can
//!   reference the new resource.
//! - Property updates are queued on the [`WriteBackBatcher`] and reach the
//!   store as one merged bulk write per quiescence window.
//!
//! Removal is soft: the record stays indexed with its presence reset to
//! unknown, so an entity that comes back reuses its resources.

mod accounts;
mod contacts;

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::batcher::WriteBackBatcher;
use crate::error::SyncError;
use crate::identity::{
    AccountKey, AccountRecord, ContactKey, ContactRecord, OwnerIdentity, PresenceType,
    SimplePresence,
};
use crate::store::{Property, ResourceDelta, ResourceHandle, ResourceStore};

/// Status text written when an entity is soft-removed
pub const UNKNOWN_STATUS: &str = "unknown";

/// Outcome of reconciling the index against a full listing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub created: usize,
    pub removed: usize,
    /// Creations the store rejected
    pub failed: usize,
}

pub struct SyncCache {
    store: Arc<dyn ResourceStore>,
    batcher: WriteBackBatcher,
    owner: OwnerIdentity,
    accounts: HashMap<AccountKey, AccountRecord>,
    contacts: HashMap<ContactKey, ContactRecord>,
    groups: HashMap<String, ResourceHandle>,
}

impl SyncCache {
    /// Create a cache over already loaded indexes
    pub fn new(
        store: Arc<dyn ResourceStore>,
        batcher: WriteBackBatcher,
        owner: OwnerIdentity,
    ) -> Self {
        Self {
            store,
            batcher,
            owner,
            accounts: HashMap::new(),
            contacts: HashMap::new(),
            groups: HashMap::new(),
        }
    }

    pub(crate) fn with_indexes(
        mut self,
        accounts: HashMap<AccountKey, AccountRecord>,
        contacts: HashMap<ContactKey, ContactRecord>,
        groups: HashMap<String, ResourceHandle>,
    ) -> Self {
        self.accounts = accounts;
        self.contacts = contacts;
        self.groups = groups;
        self
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    pub fn find_account(&self, key: &AccountKey) -> Option<&AccountRecord> {
        let found = self.accounts.get(key);
        if found.is_none() {
            debug!(account = %key, "Account not indexed");
        }
        found
    }

    pub fn find_contact(&self, key: &ContactKey) -> Option<&ContactRecord> {
        let found = self.contacts.get(key);
        if found.is_none() {
            debug!(contact = %key, "Contact not indexed");
        }
        found
    }

    /// Handle of a known contact group
    pub fn group(&self, name: &str) -> Option<&ResourceHandle> {
        self.groups.get(name)
    }

    pub fn owner(&self) -> &OwnerIdentity {
        &self.owner
    }

    pub fn batcher(&self) -> &WriteBackBatcher {
        &self.batcher
    }

    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    pub fn contact_count(&self) -> usize {
        self.contacts.len()
    }

    /// Indexed account keys, sorted
    pub fn account_keys(&self) -> Vec<AccountKey> {
        let mut keys: Vec<_> = self.accounts.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Indexed contact keys of one account, sorted
    pub fn contact_keys(&self, account: &AccountKey) -> Vec<ContactKey> {
        let mut keys: Vec<_> = self
            .contacts
            .keys()
            .filter(|key| key.account() == account)
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Flush pending writes and wait for them to land
    pub async fn shutdown(&self) -> Result<(), SyncError> {
        let result = self.batcher.flush_now().await;
        self.batcher.wait_idle().await;
        result
    }
}

/// Delta writing a known presence
fn presence_delta(presence: &SimplePresence) -> ResourceDelta {
    let mut delta = ResourceDelta::new();
    delta
        .set(Property::ImStatus, presence.status.as_str())
        .set(Property::StatusType, presence.kind.code());
    if presence.message.is_empty() {
        delta.clear(Property::ImStatusMessage);
    } else {
        delta.set(Property::ImStatusMessage, presence.message.as_str());
    }
    delta
}

/// Delta marking an entity as gone
fn unknown_presence_delta() -> ResourceDelta {
    let mut delta = ResourceDelta::new();
    delta
        .set(Property::ImStatus, UNKNOWN_STATUS)
        .set(Property::StatusType, PresenceType::Unknown.code())
        .clear(Property::ImStatusMessage);
    delta
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Value;

    #[test]
    fn test_presence_delta_clears_empty_message() {
        let presence = SimplePresence::new(PresenceType::Available, "available", "");
        let delta = presence_delta(&presence);

        assert!(delta.overwritten(Property::ImStatusMessage).unwrap().is_empty());
        assert!(delta
            .overwritten(Property::StatusType)
            .unwrap()
            .contains(&Value::Integer(2)));
    }

    #[test]
    fn test_unknown_presence_delta() {
        let delta = unknown_presence_delta();
        assert!(delta
            .overwritten(Property::ImStatus)
            .unwrap()
            .contains(&Value::from(UNKNOWN_STATUS)));
        assert!(delta
            .overwritten(Property::StatusType)
            .unwrap()
            .contains(&Value::Integer(7)));
    }
}
