//! Startup loader - rebuilds the identity index from the store
//!
//! Loading runs in strict phases, each depending on the one before:
//!
//! ```text
//! owner     resolve the person-contact grounded by the owner anchor,
//!           creating it if the store has none
//! accounts  account resources linked from the owner contact
//! groups    name index of every contact group
//! contacts  per account: contact accounts accessed by it, then the
//!           group and photo details of their person contacts
//! ```
//!
//! Completion (or failure) is published on a [`ReadinessSignal`]. Nothing may
//! mutate the cache before it reports ready.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::batcher::WriteBackBatcher;
use crate::cache::SyncCache;
use crate::config::Config;
use crate::error::SyncError;
use crate::identity::{
    AccountKey, AccountRecord, AvatarSlot, ContactKey, ContactRecord, OwnerIdentity, Presence,
    PresenceType, SimplePresence,
};
use crate::store::{
    CreateGraph, LinkQuery, Property, QueryRow, ResourceHandle, ResourceKind, ResourceStore,
    Selection,
};

// =============================================================================
// Readiness
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Loading,
    Ready,
    Failed,
}

/// Publishing side of the readiness state
#[derive(Debug)]
pub struct ReadinessSignal {
    tx: watch::Sender<Readiness>,
}

impl ReadinessSignal {
    pub fn new() -> (Self, ReadinessWatcher) {
        let (tx, rx) = watch::channel(Readiness::Loading);
        (Self { tx }, ReadinessWatcher { rx })
    }

    pub fn set(&self, readiness: Readiness) {
        // Watchers may all be gone
        let _ = self.tx.send(readiness);
    }

    pub fn watcher(&self) -> ReadinessWatcher {
        ReadinessWatcher {
            rx: self.tx.subscribe(),
        }
    }
}

/// Observing side of the readiness state
#[derive(Debug, Clone)]
pub struct ReadinessWatcher {
    rx: watch::Receiver<Readiness>,
}

impl ReadinessWatcher {
    pub fn current(&self) -> Readiness {
        *self.rx.borrow()
    }

    /// Wait for loading to finish; true if the cache became ready
    pub async fn wait(&mut self) -> bool {
        loop {
            match *self.rx.borrow_and_update() {
                Readiness::Ready => return true,
                Readiness::Failed => return false,
                Readiness::Loading => {}
            }
            if self.rx.changed().await.is_err() {
                return false;
            }
        }
    }
}

// =============================================================================
// Loading
// =============================================================================

/// Load the cache and publish the outcome on `signal`
pub async fn initialise(
    store: Arc<dyn ResourceStore>,
    config: &Config,
    signal: &ReadinessSignal,
) -> Result<SyncCache, SyncError> {
    match load(store, config).await {
        Ok(cache) => {
            signal.set(Readiness::Ready);
            Ok(cache)
        }
        Err(e) => {
            error!(error = %e, "Cache load failed");
            signal.set(Readiness::Failed);
            Err(e)
        }
    }
}

/// Rebuild the identity index from the store
pub async fn load(store: Arc<dyn ResourceStore>, config: &Config) -> Result<SyncCache, SyncError> {
    let anchor = ResourceHandle::new(config.owner_uri.as_str());
    let owner = resolve_owner(store.as_ref(), anchor).await?;
    let accounts = load_accounts(store.as_ref(), &owner).await?;
    let groups = load_groups(store.as_ref()).await?;
    let contacts = load_contacts(store.as_ref(), &accounts, &groups).await?;

    info!(
        owner = %owner.contact,
        accounts = accounts.len(),
        contacts = contacts.len(),
        groups = groups.len(),
        "Cache loaded"
    );

    let batcher = WriteBackBatcher::new(Arc::clone(&store), config.quiescence());
    Ok(SyncCache::new(store, batcher, owner).with_indexes(accounts, contacts, groups))
}

async fn resolve_owner(
    store: &dyn ResourceStore,
    anchor: ResourceHandle,
) -> Result<OwnerIdentity, SyncError> {
    let rows = store
        .query(
            LinkQuery::of_kind(ResourceKind::PersonContact)
                .linked_from(vec![anchor.clone()], Property::GroundingOccurrence),
        )
        .await?;

    if let Some(first) = rows.first() {
        if rows.len() > 1 {
            warn!(anchor = %anchor, count = rows.len(), "Multiple owner contacts, using the first");
        }
        debug!(anchor = %anchor, contact = %first.resource, "Owner contact resolved");
        return Ok(OwnerIdentity {
            contact: first.resource.clone(),
            anchor,
        });
    }

    let mut graph = CreateGraph::new();
    graph.resource("owner", ResourceKind::PersonContact);
    graph.link(anchor.clone(), Property::GroundingOccurrence, "owner");
    let mappings = store.create(graph).await?;
    let contact = mappings
        .get("owner")
        .cloned()
        .ok_or_else(|| SyncError::Creation("no handle minted for owner contact".to_string()))?;

    info!(anchor = %anchor, contact = %contact, "Owner contact created");
    Ok(OwnerIdentity { anchor, contact })
}

async fn load_accounts(
    store: &dyn ResourceStore,
    owner: &OwnerIdentity,
) -> Result<HashMap<AccountKey, AccountRecord>, SyncError> {
    let query = presence_columns(
        LinkQuery::of_kind(ResourceKind::ImAccount)
            .linked_from(vec![owner.contact.clone()], Property::HasImAccount)
            .select_out(Property::AccountIdentifier)
            .select_out(Property::ImAccountType)
            .select_out(Property::ImNickname),
    );

    let mut accounts = HashMap::new();
    for row in store.query(query).await? {
        let Some(identifier) = row
            .text(Property::AccountIdentifier)
            .filter(|identifier| !identifier.is_empty())
        else {
            debug!(handle = %row.resource, "Skipping account without identifier");
            continue;
        };

        let key = AccountKey::new(identifier);
        let mut record = AccountRecord::new(
            row.resource.clone(),
            row.text(Property::ImAccountType).unwrap_or_default(),
        );
        record.presence = presence_of(&row);
        record.nickname = row.text(Property::ImNickname).map(str::to_string);
        accounts.insert(key, record);
    }

    debug!(count = accounts.len(), "Accounts loaded");
    Ok(accounts)
}

async fn load_groups(
    store: &dyn ResourceStore,
) -> Result<HashMap<String, ResourceHandle>, SyncError> {
    let query =
        LinkQuery::of_kind(ResourceKind::ContactGroup).select_out(Property::ContactGroupName);
    let rows = store.query(query).await?;

    let mut groups = HashMap::new();
    for row in rows {
        if let Some(name) = row.text(Property::ContactGroupName) {
            groups.entry(name.to_string()).or_insert(row.resource);
        }
    }

    debug!(count = groups.len(), "Contact groups loaded");
    Ok(groups)
}

async fn load_contacts(
    store: &dyn ResourceStore,
    accounts: &HashMap<AccountKey, AccountRecord>,
    groups: &HashMap<String, ResourceHandle>,
) -> Result<HashMap<ContactKey, ContactRecord>, SyncError> {
    let group_names: HashMap<&ResourceHandle, &str> =
        groups.iter().map(|(name, handle)| (handle, name.as_str())).collect();

    let mut keys: Vec<&AccountKey> = accounts.keys().collect();
    keys.sort();

    let mut contacts = HashMap::new();
    for key in keys {
        let account = &accounts[key];
        let query = presence_columns(
            LinkQuery::of_kind(ResourceKind::ImAccount)
                .linked_to(Property::IsAccessedBy, vec![account.handle.clone()])
                .select_out(Property::ImId)
                .select_out(Property::Avatar)
                .select_in(Property::HasImAccount),
        );

        let mut found = Vec::new();
        for row in store.query(query).await? {
            let Some(id) = row.text(Property::ImId) else {
                debug!(handle = %row.resource, "Skipping contact account without id");
                continue;
            };
            let Some(person) = row.resources(Selection::In(Property::HasImAccount)).next() else {
                debug!(handle = %row.resource, "Skipping contact account without person");
                continue;
            };

            let mut record = ContactRecord::new(person.clone(), row.resource.clone());
            record.presence = presence_of(&row);
            record.avatar = row
                .resources(Selection::Out(Property::Avatar))
                .next()
                .map(|avatar| AvatarSlot {
                    url: avatar.as_str().to_string(),
                    owned: true,
                });
            found.push((ContactKey::new(key.clone(), id), record));
        }

        if !found.is_empty() {
            load_person_details(store, &mut found, &group_names).await?;
        }
        debug!(account = %key, count = found.len(), "Contacts loaded");
        contacts.extend(found);
    }

    Ok(contacts)
}

/// Fill in group membership and photos from the contacts' person resources
async fn load_person_details(
    store: &dyn ResourceStore,
    contacts: &mut [(ContactKey, ContactRecord)],
    group_names: &HashMap<&ResourceHandle, &str>,
) -> Result<(), SyncError> {
    let im_accounts: Vec<ResourceHandle> = contacts
        .iter()
        .map(|(_, record)| record.account.clone())
        .collect();

    let rows: HashMap<ResourceHandle, QueryRow> = store
        .query(
            LinkQuery::of_kind(ResourceKind::PersonContact)
                .linked_to(Property::HasImAccount, im_accounts)
                .select_out(Property::BelongsToGroup)
                .select_out(Property::Photo),
        )
        .await?
        .into_iter()
        .map(|row| (row.resource.clone(), row))
        .collect();

    for (_, record) in contacts.iter_mut() {
        let Some(row) = rows.get(&record.person) else {
            continue;
        };
        record.groups = row
            .resources(Selection::Out(Property::BelongsToGroup))
            .filter_map(|group| group_names.get(group).map(|name| name.to_string()))
            .collect();
        record.photos = row
            .resources(Selection::Out(Property::Photo))
            .map(|photo| photo.as_str().to_string())
            .collect();
    }
    Ok(())
}

fn presence_columns(query: LinkQuery) -> LinkQuery {
    query
        .select_out(Property::StatusType)
        .select_out(Property::ImStatus)
        .select_out(Property::ImStatusMessage)
}

/// Presence recorded on a row; unknown unless a status type other than
/// unknown was stored
fn presence_of(row: &QueryRow) -> Presence {
    match row.integer(Property::StatusType).map(PresenceType::from_code) {
        None | Some(PresenceType::Unknown) => Presence::Unknown,
        Some(kind) => Presence::Known(SimplePresence::new(
            kind,
            row.text(Property::ImStatus).unwrap_or_default(),
            row.text(Property::ImStatusMessage).unwrap_or_default(),
        )),
    }
}
