//! Integration tests for the write-back sync cache
//!
//! These run the cache against an in-memory store with paused time, so the
//! quiescence window elapses instantly once the test waits for idleness.

use roster_sync::cache::UNKNOWN_STATUS;
use roster_sync::loader;
use roster_sync::store::{Property, ResourceKind, Value};
use roster_sync::{
    AccountKey, Capability, Config, ContactKey, MemoryStore, PresenceState, PresenceType,
    SimplePresence, SyncCache, SyncError,
};
use std::collections::BTreeSet;
use std::sync::Arc;

const ACCOUNT: &str = "/org/roster/account/jabber/me";

/// Helper to load a cache over a fresh store with an empty call log
async fn setup() -> (Arc<MemoryStore>, SyncCache) {
    let store = Arc::new(MemoryStore::new());
    let cache = loader::load(store.clone(), &Config::default()).await.unwrap();
    store.clear_log().await;
    (store, cache)
}

/// Helper to index the test account and one contact of it
async fn with_contact(cache: &mut SyncCache, id: &str) -> ContactKey {
    let account = AccountKey::new(ACCOUNT);
    cache
        .create_account(account.clone(), "me@example.org", "jabber")
        .await
        .unwrap();
    cache.create_contact(&account, id).await.unwrap();
    ContactKey::new(account, id)
}

fn available() -> SimplePresence {
    SimplePresence::new(PresenceType::Available, "available", "Hello")
}

// =============================================================================
// Creation
// =============================================================================

#[tokio::test]
async fn test_create_account_is_idempotent() {
    let (store, mut cache) = setup().await;
    let key = AccountKey::new(ACCOUNT);

    cache.create_account(key.clone(), "me@example.org", "jabber").await.unwrap();
    let handle = cache.find_account(&key).unwrap().handle().clone();
    cache.create_account(key.clone(), "me@example.org", "jabber").await.unwrap();

    assert_eq!(store.create_count().await, 1);
    assert_eq!(cache.account_count(), 1);
    assert_eq!(cache.find_account(&key).unwrap().handle(), &handle);

    // Linked from the owner contact
    let owner = cache.owner().contact.clone();
    assert!(store
        .values(&owner, Property::HasImAccount)
        .await
        .contains(&Value::from(&handle)));
}

#[tokio::test]
async fn test_create_contact_builds_resource_graph() {
    let (store, mut cache) = setup().await;
    let key = with_contact(&mut cache, "bob@example.org").await;

    let local = cache.find_account(key.account()).unwrap().handle().clone();
    let record = cache.find_contact(&key).unwrap().clone();

    let im_account = store.resource(record.account()).await.unwrap();
    assert_eq!(im_account.kind, Some(ResourceKind::ImAccount));
    assert_eq!(im_account.text(Property::ImId), Some("bob@example.org"));
    assert!(im_account.contains(Property::IsAccessedBy, &Value::from(&local)));

    let person_contact = store.resource(record.person()).await.unwrap();
    assert!(person_contact.contains(Property::HasImAccount, &Value::from(record.account())));

    let persons = store.handles_of_kind(ResourceKind::Person).await;
    assert_eq!(persons.len(), 1);
    let person = store.resource(&persons[0]).await.unwrap();
    assert!(person.contains(Property::GroundingOccurrence, &Value::from(record.person())));
}

#[tokio::test]
async fn test_create_contact_is_idempotent() {
    let (store, mut cache) = setup().await;
    let key = with_contact(&mut cache, "bob").await;

    cache.create_contact(key.account(), "bob").await.unwrap();

    // One account creation, one contact creation
    assert_eq!(store.create_count().await, 2);
    assert_eq!(cache.contact_count(), 1);
}

#[tokio::test]
async fn test_create_contact_requires_indexed_account() {
    let (store, mut cache) = setup().await;
    let account = AccountKey::new("/not/indexed");

    let result = cache.create_contact(&account, "bob").await;

    assert!(matches!(result, Err(SyncError::AccountNotIndexed(key)) if key == account));
    assert_eq!(store.create_count().await, 0);
    assert!(cache.find_contact(&ContactKey::new(account, "bob")).is_none());
}

#[tokio::test]
async fn test_failed_creation_is_not_indexed() {
    let (store, mut cache) = setup().await;
    store.fail_creates(true);
    let key = AccountKey::new(ACCOUNT);

    let result = cache.create_account(key.clone(), "me", "jabber").await;

    assert!(matches!(result, Err(SyncError::Creation(_))));
    assert!(cache.find_account(&key).is_none());

    // A later attempt succeeds
    store.fail_creates(false);
    cache.create_account(key.clone(), "me", "jabber").await.unwrap();
    assert!(cache.find_account(&key).is_some());
}

// =============================================================================
// Write-back
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_alias_updates_coalesce_into_one_write() {
    let (store, mut cache) = setup().await;
    let key = with_contact(&mut cache, "bob").await;
    let remote = cache.find_contact(&key).unwrap().account().clone();

    cache.set_contact_alias(&key, "X").await;
    cache.set_contact_alias(&key, "Y").await;
    assert_eq!(store.apply_count().await, 0);

    cache.batcher().wait_idle().await;

    assert_eq!(store.apply_count().await, 1);
    assert_eq!(
        store.values(&remote, Property::ImNickname).await,
        vec![Value::from("Y")]
    );
}

#[tokio::test(start_paused = true)]
async fn test_many_updates_one_write() {
    let (store, mut cache) = setup().await;
    let key = with_contact(&mut cache, "bob").await;

    cache.set_contact_presence(&key, available()).await;
    cache.set_contact_blocked(&key, true).await;
    cache
        .set_contact_capabilities(&key, [Capability::Text, Capability::Video])
        .await;
    cache
        .set_account_nickname(key.account(), "Me")
        .await;
    cache.batcher().wait_idle().await;

    assert_eq!(store.apply_count().await, 1);
    let batch = &store.applied_batches().await[0];
    assert_eq!(batch.len(), 2);

    let remote = cache.find_contact(&key).unwrap().account().clone();
    let capabilities: BTreeSet<Value> = store
        .values(&remote, Property::ImCapability)
        .await
        .into_iter()
        .collect();
    assert_eq!(capabilities.len(), 2);
    assert!(capabilities.contains(&Value::from(Capability::Video.handle())));
    assert_eq!(
        store.values(&remote, Property::IsBlocked).await,
        vec![Value::Boolean(true)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_update_of_unknown_contact_is_noop() {
    let (store, mut cache) = setup().await;
    let missing = ContactKey::new(ACCOUNT, "nobody");

    cache.set_contact_alias(&missing, "ghost").await;
    cache.set_contact_presence(&missing, available()).await;
    cache.set_contact_avatar(&missing, "file:///ghost.png").await;

    assert!(cache.batcher().pending().await.is_empty());
    cache.batcher().flush_now().await.unwrap();
    assert_eq!(store.apply_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_batch_is_dropped() {
    let (store, mut cache) = setup().await;
    let key = with_contact(&mut cache, "bob").await;
    let remote = cache.find_contact(&key).unwrap().account().clone();

    store.fail_writes(true);
    cache.set_contact_alias(&key, "lost").await;
    cache.batcher().wait_idle().await;

    assert_eq!(cache.batcher().stats().await.failed, 1);
    assert!(store.values(&remote, Property::ImNickname).await.is_empty());
    // The record stays indexed
    assert!(cache.find_contact(&key).is_some());
}

// =============================================================================
// Soft removal
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_remove_account_is_soft() {
    let (store, mut cache) = setup().await;
    let key = AccountKey::new(ACCOUNT);
    cache.create_account(key.clone(), "me", "jabber").await.unwrap();
    let handle = cache.find_account(&key).unwrap().handle().clone();

    cache.set_account_presence(&key, available()).await;
    cache.batcher().wait_idle().await;
    cache.remove_account(&key).await;
    cache.batcher().wait_idle().await;

    let record = cache.find_account(&key).unwrap();
    assert_eq!(record.handle(), &handle);
    assert!(record.presence().is_unknown());

    let resource = store.resource(&handle).await.unwrap();
    assert_eq!(resource.text(Property::ImStatus), Some(UNKNOWN_STATUS));
    assert!(resource.contains(Property::StatusType, &Value::Integer(PresenceType::Unknown.code())));
    assert_eq!(resource.text(Property::ImStatusMessage), None);
}

#[tokio::test(start_paused = true)]
async fn test_remove_contact_clears_relationship() {
    let (store, mut cache) = setup().await;
    let key = with_contact(&mut cache, "bob").await;
    let local = cache.find_account(key.account()).unwrap().handle().clone();
    let remote = cache.find_contact(&key).unwrap().account().clone();

    cache.set_contact_publish_state(&key, PresenceState::Yes).await;
    cache.set_contact_subscription_state(&key, PresenceState::Ask).await;
    cache.batcher().wait_idle().await;
    assert!(!store.values(&remote, Property::PublishesPresenceTo).await.is_empty());
    assert!(!store
        .values(&remote, Property::RequestedPresenceSubscriptionTo)
        .await
        .is_empty());

    cache.remove_contact(&key).await;
    cache.batcher().wait_idle().await;

    for handle in [&local, &remote] {
        assert!(store.values(handle, Property::PublishesPresenceTo).await.is_empty());
        assert!(store
            .values(handle, Property::RequestedPresenceSubscriptionTo)
            .await
            .is_empty());
    }
    assert_eq!(
        store.values(&remote, Property::ImStatus).await,
        vec![Value::from(UNKNOWN_STATUS)]
    );
    assert!(cache.find_contact(&key).unwrap().presence().is_unknown());
}

#[tokio::test(start_paused = true)]
async fn test_removed_contact_returns_with_same_handles() {
    let (store, mut cache) = setup().await;
    let key = with_contact(&mut cache, "bob").await;
    let before = cache.find_contact(&key).unwrap().clone();

    cache.remove_contact(&key).await;
    cache.create_contact(key.account(), "bob").await.unwrap();
    cache.set_contact_presence(&key, available()).await;
    cache.batcher().wait_idle().await;

    let after = cache.find_contact(&key).unwrap();
    assert_eq!(after.person(), before.person());
    assert_eq!(
        store.values(after.account(), Property::ImStatus).await,
        vec![Value::from("available")]
    );
}

// =============================================================================
// Relationship state machine
// =============================================================================

const STATES: [PresenceState; 3] = [PresenceState::Yes, PresenceState::Ask, PresenceState::No];

#[tokio::test(start_paused = true)]
async fn test_publish_state_transitions() {
    let (store, mut cache) = setup().await;

    for (i, previous) in STATES.iter().enumerate() {
        for (j, requested) in STATES.iter().enumerate() {
            let key = with_contact(&mut cache, &format!("pub-{i}-{j}")).await;
            let local = cache.find_account(key.account()).unwrap().handle().clone();
            let remote = cache.find_contact(&key).unwrap().account().clone();

            cache.set_contact_publish_state(&key, *previous).await;
            cache.batcher().wait_idle().await;
            cache.set_contact_publish_state(&key, *requested).await;
            cache.batcher().wait_idle().await;

            let publishes = store
                .values(&remote, Property::PublishesPresenceTo)
                .await
                .contains(&Value::from(&local));
            let requested_edge = store
                .values(&local, Property::RequestedPresenceSubscriptionTo)
                .await
                .contains(&Value::from(&remote));

            let transition = format!("{previous:?} -> {requested:?}");
            assert_eq!(publishes, *requested == PresenceState::Yes, "{transition}");
            assert_eq!(requested_edge, *requested == PresenceState::Ask, "{transition}");
            assert_eq!(cache.find_contact(&key).unwrap().publish_state(), Some(*requested));
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_subscription_state_transitions() {
    let (store, mut cache) = setup().await;

    for (i, previous) in STATES.iter().enumerate() {
        for (j, requested) in STATES.iter().enumerate() {
            let key = with_contact(&mut cache, &format!("sub-{i}-{j}")).await;
            let local = cache.find_account(key.account()).unwrap().handle().clone();
            let remote = cache.find_contact(&key).unwrap().account().clone();

            cache.set_contact_subscription_state(&key, *previous).await;
            cache.batcher().wait_idle().await;
            cache.set_contact_subscription_state(&key, *requested).await;
            cache.batcher().wait_idle().await;

            let publishes = store
                .values(&local, Property::PublishesPresenceTo)
                .await
                .contains(&Value::from(&remote));
            let requested_edge = store
                .values(&remote, Property::RequestedPresenceSubscriptionTo)
                .await
                .contains(&Value::from(&local));

            let transition = format!("{previous:?} -> {requested:?}");
            assert_eq!(publishes, *requested == PresenceState::Yes, "{transition}");
            assert_eq!(requested_edge, *requested == PresenceState::Ask, "{transition}");
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_relationship_changes_within_one_window() {
    let (store, mut cache) = setup().await;
    let key = with_contact(&mut cache, "bob").await;
    let local = cache.find_account(key.account()).unwrap().handle().clone();
    let remote = cache.find_contact(&key).unwrap().account().clone();

    cache.set_contact_publish_state(&key, PresenceState::Yes).await;
    cache.batcher().wait_idle().await;

    // Ask then No inside one window: the last request wins
    cache.set_contact_publish_state(&key, PresenceState::Ask).await;
    cache.set_contact_publish_state(&key, PresenceState::No).await;
    cache.batcher().wait_idle().await;

    assert!(store.values(&remote, Property::PublishesPresenceTo).await.is_empty());
    assert!(store
        .values(&local, Property::RequestedPresenceSubscriptionTo)
        .await
        .is_empty());
}

// =============================================================================
// Groups
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_group_membership_converges() {
    let (store, mut cache) = setup().await;
    let key = with_contact(&mut cache, "bob").await;
    let person = cache.find_contact(&key).unwrap().person().clone();

    cache
        .set_contact_groups(&key, ["A".to_string(), "B".to_string()])
        .await;
    cache.batcher().wait_idle().await;
    cache
        .set_contact_groups(&key, ["B".to_string(), "C".to_string()])
        .await;
    cache.batcher().wait_idle().await;

    let expected: BTreeSet<Value> = ["B", "C"]
        .iter()
        .map(|name| Value::from(cache.group(name).unwrap()))
        .collect();
    let stored: BTreeSet<Value> = store
        .values(&person, Property::BelongsToGroup)
        .await
        .into_iter()
        .collect();
    assert_eq!(stored, expected);

    let names: BTreeSet<&str> = ["B", "C"].into_iter().collect();
    let record_groups: BTreeSet<&str> = cache
        .find_contact(&key)
        .unwrap()
        .groups()
        .iter()
        .map(String::as_str)
        .collect();
    assert_eq!(record_groups, names);

    // Three groups exist, each created once
    assert_eq!(store.handles_of_kind(ResourceKind::ContactGroup).await.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_group_shared_between_contacts() {
    let (store, mut cache) = setup().await;
    let bob = with_contact(&mut cache, "bob").await;
    let eve = with_contact(&mut cache, "eve").await;

    cache.set_contact_groups(&bob, ["Friends".to_string()]).await;
    cache.set_contact_groups(&eve, ["Friends".to_string()]).await;
    cache.batcher().wait_idle().await;

    assert_eq!(store.handles_of_kind(ResourceKind::ContactGroup).await.len(), 1);
    let group = Value::from(cache.group("Friends").unwrap());
    for key in [&bob, &eve] {
        let person = cache.find_contact(key).unwrap().person().clone();
        assert_eq!(store.values(&person, Property::BelongsToGroup).await, vec![group.clone()]);
    }
}

#[tokio::test(start_paused = true)]
async fn test_empty_groups_clear_membership() {
    let (store, mut cache) = setup().await;
    let key = with_contact(&mut cache, "bob").await;
    let person = cache.find_contact(&key).unwrap().person().clone();

    cache.set_contact_groups(&key, ["A".to_string()]).await;
    cache.batcher().wait_idle().await;
    cache.set_contact_groups(&key, Vec::<String>::new()).await;
    cache.batcher().wait_idle().await;

    assert!(store.values(&person, Property::BelongsToGroup).await.is_empty());
    assert!(cache.find_contact(&key).unwrap().groups().is_empty());
}

// =============================================================================
// Avatar
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_avatar_owns_added_photo() {
    let (store, mut cache) = setup().await;
    let key = with_contact(&mut cache, "bob").await;
    let record = cache.find_contact(&key).unwrap().clone();

    cache.set_contact_avatar(&key, "file:///a.png").await;
    cache.batcher().wait_idle().await;
    let photos = store.values(record.person(), Property::Photo).await;
    assert_eq!(photos.len(), 1);
    assert!(cache.find_contact(&key).unwrap().avatar().unwrap().owned);

    // Replacing the avatar drops the photo it added
    cache.set_contact_avatar(&key, "file:///b.png").await;
    cache.batcher().wait_idle().await;
    let photos: Vec<String> = store
        .values(record.person(), Property::Photo)
        .await
        .iter()
        .filter_map(|value| value.as_resource().map(|h| h.as_str().to_string()))
        .collect();
    assert_eq!(photos, vec!["file:///b.png".to_string()]);

    let avatar = store.values(record.account(), Property::Avatar).await;
    assert_eq!(avatar.len(), 1);
    assert_eq!(avatar[0].as_resource().unwrap().as_str(), "file:///b.png");

    // Clearing removes both
    cache.set_contact_avatar(&key, "").await;
    cache.batcher().wait_idle().await;
    assert!(store.values(record.person(), Property::Photo).await.is_empty());
    assert!(store.values(record.account(), Property::Avatar).await.is_empty());
    assert!(cache.find_contact(&key).unwrap().avatar().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_avatar_keeps_preexisting_photo() {
    let store = Arc::new(MemoryStore::new());
    let config = Config::default();
    let key = {
        let mut cache = loader::load(store.clone(), &config).await.unwrap();
        let key = with_contact(&mut cache, "bob").await;
        let person = cache.find_contact(&key).unwrap().person().clone();

        // The contact already has this photo from elsewhere
        let mut changes = roster_sync::store::ChangeSet::new();
        changes.entry(person).add(
            Property::Photo,
            roster_sync::store::ResourceHandle::new("file:///shared.png"),
        );
        store.seed_changes(changes).await;
        key
    };

    let mut cache = loader::load(store.clone(), &config).await.unwrap();
    let person = cache.find_contact(&key).unwrap().person().clone();
    assert!(cache.find_contact(&key).unwrap().photos().contains("file:///shared.png"));

    cache.set_contact_avatar(&key, "file:///shared.png").await;
    cache.batcher().wait_idle().await;
    assert!(!cache.find_contact(&key).unwrap().avatar().unwrap().owned);

    cache.set_contact_avatar(&key, "").await;
    cache.batcher().wait_idle().await;

    let photos = store.values(&person, Property::Photo).await;
    assert_eq!(photos.len(), 1);
}

// =============================================================================
// Reconciliation
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_reconcile_contact_set() {
    let (store, mut cache) = setup().await;
    let c1 = with_contact(&mut cache, "c1").await;
    let c2 = with_contact(&mut cache, "c2").await;
    cache.set_contact_presence(&c2, available()).await;
    cache.batcher().wait_idle().await;
    let c1_account = cache.find_contact(&c1).unwrap().account().clone();
    let c2_before = cache.find_contact(&c2).unwrap().clone();

    let summary = cache
        .reconcile_contact_set(c1.account(), ["c2".to_string(), "c3".to_string()])
        .await
        .unwrap();
    cache.batcher().wait_idle().await;

    assert_eq!(summary.created, 1);
    assert_eq!(summary.removed, 1);
    assert!(cache.find_contact(&ContactKey::new(ACCOUNT, "c3")).is_some());
    assert!(cache.find_contact(&c1).unwrap().presence().is_unknown());
    assert_eq!(cache.find_contact(&c2).unwrap(), &c2_before);
    assert_eq!(
        store.values(&c1_account, Property::ImStatus).await,
        vec![Value::from(UNKNOWN_STATUS)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_reconcile_contact_set_scoped_to_account() {
    let (_store, mut cache) = setup().await;
    let bob = with_contact(&mut cache, "bob").await;

    let other = AccountKey::new("/org/roster/account/irc/me");
    cache.create_account(other.clone(), "me", "irc").await.unwrap();
    cache.create_contact(&other, "eve").await.unwrap();
    let eve = ContactKey::new(other.clone(), "eve");
    cache.set_contact_presence(&eve, available()).await;

    let summary = cache
        .reconcile_contact_set(bob.account(), Vec::new())
        .await
        .unwrap();

    assert_eq!(summary.removed, 1);
    assert!(cache.find_contact(&bob).unwrap().presence().is_unknown());
    assert!(!cache.find_contact(&eve).unwrap().presence().is_unknown());
}

#[tokio::test(start_paused = true)]
async fn test_reconcile_account_set() {
    let (_store, mut cache) = setup().await;
    let keep = AccountKey::new("/acct/keep");
    let gone = AccountKey::new("/acct/gone");
    for key in [&keep, &gone] {
        cache.create_account(key.clone(), "me", "jabber").await.unwrap();
        cache.set_account_presence(key, available()).await;
    }

    let summary = cache.reconcile_account_set([keep.clone()]).await;

    assert_eq!(summary.removed, 1);
    assert!(!cache.find_account(&keep).unwrap().presence().is_unknown());
    assert!(cache.find_account(&gone).unwrap().presence().is_unknown());
    assert_eq!(cache.account_count(), 2);
}

#[tokio::test]
async fn test_reconcile_unindexed_account_fails() {
    let (_store, mut cache) = setup().await;

    let result = cache
        .reconcile_contact_set(&AccountKey::new("/nope"), ["bob".to_string()])
        .await;

    assert!(matches!(result, Err(SyncError::AccountNotIndexed(_))));
    assert_eq!(cache.contact_count(), 0);
}
