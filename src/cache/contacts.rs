//! Contact lifecycle, contact properties and contact groups

use std::collections::BTreeSet;
use tracing::{debug, error, info, warn};

use super::{presence_delta, unknown_presence_delta, ReconcileSummary, SyncCache, UNKNOWN_STATUS};
use crate::error::SyncError;
use crate::identity::{
    AccountKey, AvatarSlot, Capability, ContactKey, ContactRecord, Presence, PresenceState,
    PresenceType, SimplePresence,
};
use crate::store::{
    ChangeSet, CreateGraph, Property, ResourceDelta, ResourceHandle, ResourceKind, Value,
};

impl SyncCache {
    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Create and index a contact of an indexed account.
    ///
    /// One atomic creation makes the contact's account resource, the person
    /// contact holding it, and the person it grounds. A no-op if the contact
    /// is already indexed.
    pub async fn create_contact(
        &mut self,
        account: &AccountKey,
        contact_id: &str,
    ) -> Result<(), SyncError> {
        let key = ContactKey::new(account.clone(), contact_id);
        if self.contacts.contains_key(&key) {
            debug!(contact = %key, "Contact already indexed");
            return Ok(());
        }

        let Some(owner) = self.accounts.get(account) else {
            error!(contact = %key, "Contact created for an unindexed account");
            return Err(SyncError::AccountNotIndexed(account.clone()));
        };

        let mut graph = CreateGraph::new();
        graph
            .resource("im-account", ResourceKind::ImAccount)
            .with(Property::ImId, contact_id)
            .with(Property::ImAccountType, owner.protocol.as_str())
            .with(Property::ImStatus, UNKNOWN_STATUS)
            .with(Property::StatusType, PresenceType::Unknown.code())
            .with(Property::IsAccessedBy, &owner.handle);
        graph
            .resource("person-contact", ResourceKind::PersonContact)
            .with_new(Property::HasImAccount, "im-account");
        graph
            .resource("person", ResourceKind::Person)
            .with_new(Property::GroundingOccurrence, "person-contact");

        let mappings = self.store.create(graph).await.map_err(|e| {
            error!(contact = %key, error = %e, "Failed to create contact");
            SyncError::Creation(e.to_string())
        })?;
        let (Some(person), Some(im_account)) = (
            mappings.get("person-contact").cloned(),
            mappings.get("im-account").cloned(),
        ) else {
            return Err(SyncError::Creation(format!(
                "no handles minted for contact {key}"
            )));
        };

        info!(contact = %key, person = %person, "Contact indexed");
        self.contacts.insert(key, ContactRecord::new(person, im_account));
        Ok(())
    }

    /// Soft-remove a contact.
    ///
    /// Presence becomes unknown and both relationship directions are
    /// cleared on the contact and on the local account.
    pub async fn remove_contact(&mut self, key: &ContactKey) {
        let local = self.accounts.get(key.account()).map(|a| a.handle.clone());
        let Some(record) = self.contacts.get_mut(key) else {
            debug!(contact = %key, "Removal of unindexed contact ignored");
            return;
        };
        record.presence = Presence::Unknown;
        record.publish = None;
        record.subscription = None;
        let remote = record.account.clone();

        let mut changes = ChangeSet::new();
        changes.merge_delta(remote.clone(), unknown_presence_delta());
        if let Some(local) = local {
            changes
                .entry(remote.clone())
                .remove(Property::PublishesPresenceTo, &local)
                .remove(Property::RequestedPresenceSubscriptionTo, &local);
            changes
                .entry(local)
                .remove(Property::PublishesPresenceTo, &remote)
                .remove(Property::RequestedPresenceSubscriptionTo, &remote);
        }

        info!(contact = %key, "Contact soft-removed");
        self.batcher.queue(changes).await;
    }

    /// Bring one account's contacts in line with a full listing.
    ///
    /// Listed ids that are not indexed are created; indexed ids that are not
    /// listed are soft-removed. Contacts of other accounts are untouched.
    pub async fn reconcile_contact_set(
        &mut self,
        account: &AccountKey,
        ids: impl IntoIterator<Item = String>,
    ) -> Result<ReconcileSummary, SyncError> {
        if !self.accounts.contains_key(account) {
            error!(account = %account, "Contact listing for an unindexed account");
            return Err(SyncError::AccountNotIndexed(account.clone()));
        }

        let listed: BTreeSet<String> = ids.into_iter().collect();
        let mut summary = ReconcileSummary::default();

        for id in &listed {
            let key = ContactKey::new(account.clone(), id.as_str());
            if self.contacts.contains_key(&key) {
                continue;
            }
            match self.create_contact(account, id).await {
                Ok(()) => summary.created += 1,
                Err(e) => {
                    warn!(contact = %key, error = %e, "Listed contact not created");
                    summary.failed += 1;
                }
            }
        }

        let stale: Vec<ContactKey> = self
            .contact_keys(account)
            .into_iter()
            .filter(|key| !listed.contains(key.contact_id()))
            .collect();
        for key in &stale {
            self.remove_contact(key).await;
        }
        summary.removed = stale.len();

        info!(
            account = %account,
            listed = listed.len(),
            created = summary.created,
            removed = summary.removed,
            failed = summary.failed,
            "Contacts reconciled"
        );
        Ok(summary)
    }

    // =========================================================================
    // Properties
    // =========================================================================

    pub async fn set_contact_alias(&mut self, key: &ContactKey, alias: &str) {
        let Some(record) = self.contacts.get(key) else {
            debug!(contact = %key, "Alias update for unindexed contact ignored");
            return;
        };
        let mut delta = ResourceDelta::new();
        delta.set(Property::ImNickname, alias);
        self.batcher.queue_delta(record.account.clone(), delta).await;
    }

    pub async fn set_contact_presence(&mut self, key: &ContactKey, presence: SimplePresence) {
        let Some(record) = self.contacts.get_mut(key) else {
            debug!(contact = %key, "Presence update for unindexed contact ignored");
            return;
        };
        let delta = presence_delta(&presence);
        record.presence = Presence::Known(presence);
        let handle = record.account.clone();

        self.batcher.queue_delta(handle, delta).await;
    }

    pub async fn set_contact_blocked(&mut self, key: &ContactKey, blocked: bool) {
        let Some(record) = self.contacts.get(key) else {
            debug!(contact = %key, "Block update for unindexed contact ignored");
            return;
        };
        let mut delta = ResourceDelta::new();
        delta.set(Property::IsBlocked, blocked);
        self.batcher.queue_delta(record.account.clone(), delta).await;
    }

    /// Whether the contact publishes its presence to the local account
    pub async fn set_contact_publish_state(&mut self, key: &ContactKey, state: PresenceState) {
        let Some((local, remote)) = self.relationship_ends(key) else {
            debug!(contact = %key, "Publish update for unindexed contact ignored");
            return;
        };
        if let Some(record) = self.contacts.get_mut(key) {
            record.publish = Some(state);
        }
        self.batcher
            .queue(presence_edges(state, &remote, &local))
            .await;
    }

    /// Whether the local account publishes its presence to the contact
    pub async fn set_contact_subscription_state(
        &mut self,
        key: &ContactKey,
        state: PresenceState,
    ) {
        let Some((local, remote)) = self.relationship_ends(key) else {
            debug!(contact = %key, "Subscription update for unindexed contact ignored");
            return;
        };
        if let Some(record) = self.contacts.get_mut(key) {
            record.subscription = Some(state);
        }
        self.batcher
            .queue(presence_edges(state, &local, &remote))
            .await;
    }

    /// Replace the capability set
    pub async fn set_contact_capabilities(
        &mut self,
        key: &ContactKey,
        capabilities: impl IntoIterator<Item = Capability>,
    ) {
        let Some(record) = self.contacts.get(key) else {
            debug!(contact = %key, "Capability update for unindexed contact ignored");
            return;
        };
        let mut delta = ResourceDelta::new();
        delta.set_all(
            Property::ImCapability,
            capabilities
                .into_iter()
                .map(|capability| Value::Resource(capability.handle())),
        );
        self.batcher.queue_delta(record.account.clone(), delta).await;
    }

    /// Set or, with an empty path, clear the contact's avatar.
    ///
    /// A new avatar is added to the photo collection unless the photo is
    /// already there. Replacing or clearing an avatar removes its photo only
    /// if the avatar path added it.
    pub async fn set_contact_avatar(&mut self, key: &ContactKey, avatar: &str) {
        let Some(record) = self.contacts.get_mut(key) else {
            debug!(contact = %key, "Avatar update for unindexed contact ignored");
            return;
        };
        if record.avatar.as_ref().map(|slot| slot.url.as_str()) == Some(avatar) {
            debug!(contact = %key, "Avatar unchanged");
            return;
        }

        let person = record.person.clone();
        let remote = record.account.clone();
        let mut changes = ChangeSet::new();

        if let Some(previous) = record.avatar.take() {
            if previous.owned {
                changes
                    .entry(person.clone())
                    .remove(Property::Photo, ResourceHandle::new(previous.url.as_str()));
                record.photos.remove(&previous.url);
            }
        }

        if avatar.is_empty() {
            changes.entry(remote).clear(Property::Avatar);
        } else {
            let photo = ResourceHandle::new(avatar);
            let owned = !record.photos.contains(avatar);
            if owned {
                changes.entry(person).add(Property::Photo, &photo);
                record.photos.insert(avatar.to_string());
            }
            changes.entry(remote).set(Property::Avatar, photo);
            record.avatar = Some(AvatarSlot {
                url: avatar.to_string(),
                owned,
            });
        }

        self.batcher.queue(changes).await;
    }

    /// Replace group membership, creating unknown groups on the way
    pub async fn set_contact_groups(
        &mut self,
        key: &ContactKey,
        groups: impl IntoIterator<Item = String>,
    ) {
        let Some(current) = self.contacts.get(key).map(|record| record.groups.clone()) else {
            debug!(contact = %key, "Group update for unindexed contact ignored");
            return;
        };
        let requested: BTreeSet<String> = groups
            .into_iter()
            .filter(|name| !name.is_empty())
            .collect();

        let mut resolved = BTreeSet::new();
        let mut handles = Vec::with_capacity(requested.len());
        for name in &requested {
            match self.ensure_group(name).await {
                Ok(handle) => {
                    resolved.insert(name.clone());
                    handles.push(Value::Resource(handle));
                }
                Err(e) => warn!(contact = %key, group = %name, error = %e, "Group not resolved"),
            }
        }

        let Some(record) = self.contacts.get_mut(key) else {
            return;
        };
        debug!(
            contact = %key,
            added = resolved.difference(&current).count(),
            removed = current.difference(&resolved).count(),
            "Group membership changed"
        );
        record.groups = resolved;
        let person = record.person.clone();

        let mut delta = ResourceDelta::new();
        delta.set_all(Property::BelongsToGroup, handles);
        self.batcher.queue_delta(person, delta).await;
    }

    /// Handle of a named group, created with an immediate write if unknown
    pub async fn ensure_group(&mut self, name: &str) -> Result<ResourceHandle, SyncError> {
        if let Some(handle) = self.groups.get(name) {
            return Ok(handle.clone());
        }

        let mut graph = CreateGraph::new();
        graph
            .resource("group", ResourceKind::ContactGroup)
            .with(Property::ContactGroupName, name);
        let mappings = self.store.create(graph).await.map_err(|e| {
            error!(group = %name, error = %e, "Failed to create contact group");
            SyncError::Creation(e.to_string())
        })?;
        let handle = mappings
            .get("group")
            .cloned()
            .ok_or_else(|| SyncError::Creation(format!("no handle minted for group {name}")))?;

        info!(group = %name, handle = %handle, "Contact group created");
        self.groups.insert(name.to_string(), handle.clone());
        Ok(handle)
    }

    /// Local and remote account handles of a contact
    fn relationship_ends(&self, key: &ContactKey) -> Option<(ResourceHandle, ResourceHandle)> {
        let remote = self.contacts.get(key)?.account.clone();
        let local = self.accounts.get(key.account())?.handle.clone();
        Some((local, remote))
    }
}

/// Edges for one direction of a presence relationship.
///
/// `publisher` publishing to `subscriber` is the `Yes` state; `subscriber`
/// having requested a subscription from `publisher` is the `Ask` state.
/// Every transition writes both edges, so the result only depends on the
/// requested state.
fn presence_edges(
    state: PresenceState,
    publisher: &ResourceHandle,
    subscriber: &ResourceHandle,
) -> ChangeSet {
    let mut changes = ChangeSet::new();
    match state {
        PresenceState::Yes => {
            changes
                .entry(publisher.clone())
                .add(Property::PublishesPresenceTo, subscriber);
            changes
                .entry(subscriber.clone())
                .remove(Property::RequestedPresenceSubscriptionTo, publisher);
        }
        PresenceState::Ask => {
            changes
                .entry(publisher.clone())
                .remove(Property::PublishesPresenceTo, subscriber);
            changes
                .entry(subscriber.clone())
                .add(Property::RequestedPresenceSubscriptionTo, publisher);
        }
        PresenceState::No => {
            changes
                .entry(publisher.clone())
                .remove(Property::PublishesPresenceTo, subscriber);
            changes
                .entry(subscriber.clone())
                .remove(Property::RequestedPresenceSubscriptionTo, publisher);
        }
    }
    changes
}
