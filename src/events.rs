//! Roster events - change notifications from the account directory
//!
//! Every notification the directory service emits is one variant of
//! [`RosterEvent`]. [`dispatch`] routes each to the matching cache
//! operation; none of them fail the event loop.
//!
//! On the wire (one JSON object per line) events look like:
//!
//! ```text
//! {"type":"account_created","payload":{"account":"/acct/1","id":"me@example.org","protocol":"jabber"}}
//! {"type":"contact_alias_changed","payload":{"account":"/acct/1","id":"bob","alias":"Bobby"}}
//! ```

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::SyncCache;
use crate::identity::{AccountKey, Capability, ContactKey, PresenceState, SimplePresence};

/// Change notification for one account or contact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum RosterEvent {
    // Account events
    AccountCreated {
        account: AccountKey,
        id: String,
        protocol: String,
    },
    AccountRemoved {
        account: AccountKey,
    },
    AccountNicknameChanged {
        account: AccountKey,
        nickname: String,
    },
    AccountPresenceChanged {
        account: AccountKey,
        presence: SimplePresence,
    },
    /// Full listing of live accounts
    AccountsListed {
        accounts: Vec<AccountKey>,
    },

    // Contact events
    ContactCreated {
        account: AccountKey,
        id: String,
    },
    ContactRemoved {
        account: AccountKey,
        id: String,
    },
    ContactAliasChanged {
        account: AccountKey,
        id: String,
        alias: String,
    },
    ContactPresenceChanged {
        account: AccountKey,
        id: String,
        presence: SimplePresence,
    },
    ContactGroupsChanged {
        account: AccountKey,
        id: String,
        groups: Vec<String>,
    },
    ContactBlockChanged {
        account: AccountKey,
        id: String,
        blocked: bool,
    },
    ContactPublishStateChanged {
        account: AccountKey,
        id: String,
        state: PresenceState,
    },
    ContactSubscriptionStateChanged {
        account: AccountKey,
        id: String,
        state: PresenceState,
    },
    ContactCapabilitiesChanged {
        account: AccountKey,
        id: String,
        capabilities: Vec<Capability>,
    },
    /// An empty avatar clears it
    ContactAvatarChanged {
        account: AccountKey,
        id: String,
        avatar: String,
    },
    /// Full listing of one account's contacts
    ContactsListed {
        account: AccountKey,
        ids: Vec<String>,
    },
}

impl RosterEvent {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            RosterEvent::AccountCreated { .. } => "account_created",
            RosterEvent::AccountRemoved { .. } => "account_removed",
            RosterEvent::AccountNicknameChanged { .. } => "account_nickname_changed",
            RosterEvent::AccountPresenceChanged { .. } => "account_presence_changed",
            RosterEvent::AccountsListed { .. } => "accounts_listed",
            RosterEvent::ContactCreated { .. } => "contact_created",
            RosterEvent::ContactRemoved { .. } => "contact_removed",
            RosterEvent::ContactAliasChanged { .. } => "contact_alias_changed",
            RosterEvent::ContactPresenceChanged { .. } => "contact_presence_changed",
            RosterEvent::ContactGroupsChanged { .. } => "contact_groups_changed",
            RosterEvent::ContactBlockChanged { .. } => "contact_block_changed",
            RosterEvent::ContactPublishStateChanged { .. } => "contact_publish_state_changed",
            RosterEvent::ContactSubscriptionStateChanged { .. } => {
                "contact_subscription_state_changed"
            }
            RosterEvent::ContactCapabilitiesChanged { .. } => "contact_capabilities_changed",
            RosterEvent::ContactAvatarChanged { .. } => "contact_avatar_changed",
            RosterEvent::ContactsListed { .. } => "contacts_listed",
        }
    }
}

/// Apply one event to the cache
pub async fn dispatch(cache: &mut SyncCache, event: RosterEvent) {
    let name = event.name();
    debug!(event = name, "Dispatching roster event");

    match event {
        RosterEvent::AccountCreated {
            account,
            id,
            protocol,
        } => {
            if let Err(e) = cache.create_account(account, &id, &protocol).await {
                warn!(event = name, error = %e, "Roster event not applied");
            }
        }
        RosterEvent::AccountRemoved { account } => cache.remove_account(&account).await,
        RosterEvent::AccountNicknameChanged { account, nickname } => {
            cache.set_account_nickname(&account, &nickname).await
        }
        RosterEvent::AccountPresenceChanged { account, presence } => {
            cache.set_account_presence(&account, presence).await
        }
        RosterEvent::AccountsListed { accounts } => {
            cache.reconcile_account_set(accounts).await;
        }
        RosterEvent::ContactCreated { account, id } => {
            if let Err(e) = cache.create_contact(&account, &id).await {
                warn!(event = name, error = %e, "Roster event not applied");
            }
        }
        RosterEvent::ContactRemoved { account, id } => {
            cache.remove_contact(&ContactKey::new(account, id)).await
        }
        RosterEvent::ContactAliasChanged { account, id, alias } => {
            cache
                .set_contact_alias(&ContactKey::new(account, id), &alias)
                .await
        }
        RosterEvent::ContactPresenceChanged {
            account,
            id,
            presence,
        } => {
            cache
                .set_contact_presence(&ContactKey::new(account, id), presence)
                .await
        }
        RosterEvent::ContactGroupsChanged {
            account,
            id,
            groups,
        } => {
            cache
                .set_contact_groups(&ContactKey::new(account, id), groups)
                .await
        }
        RosterEvent::ContactBlockChanged {
            account,
            id,
            blocked,
        } => {
            cache
                .set_contact_blocked(&ContactKey::new(account, id), blocked)
                .await
        }
        RosterEvent::ContactPublishStateChanged { account, id, state } => {
            cache
                .set_contact_publish_state(&ContactKey::new(account, id), state)
                .await
        }
        RosterEvent::ContactSubscriptionStateChanged { account, id, state } => {
            cache
                .set_contact_subscription_state(&ContactKey::new(account, id), state)
                .await
        }
        RosterEvent::ContactCapabilitiesChanged {
            account,
            id,
            capabilities,
        } => {
            cache
                .set_contact_capabilities(&ContactKey::new(account, id), capabilities)
                .await
        }
        RosterEvent::ContactAvatarChanged {
            account,
            id,
            avatar,
        } => {
            cache
                .set_contact_avatar(&ContactKey::new(account, id), &avatar)
                .await
        }
        RosterEvent::ContactsListed { account, ids } => {
            if let Err(e) = cache.reconcile_contact_set(&account, ids).await {
                warn!(event = name, error = %e, "Roster event not applied");
            }
        }
    }
}
