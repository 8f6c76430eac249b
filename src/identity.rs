//! Identity types - keys and indexed records for accounts and contacts
//!
//! Keys are plain value types with structural equality and hashing. A
//! [`ContactKey`] compares its account path and remote id field by field, so
//! identifiers containing any separator character can never collide.
//!
//! Records hold the store handles minted for each entity together with the
//! small amount of state the cache needs to compute deltas without reading
//! the store back.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::store::ResourceHandle;

// =============================================================================
// Keys
// =============================================================================

/// External path identifying one account across restarts
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountKey(String);

impl AccountKey {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountKey {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<String> for AccountKey {
    fn from(path: String) -> Self {
        Self(path)
    }
}

/// Compound key of owning account and remote contact id
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContactKey {
    account: AccountKey,
    contact_id: String,
}

impl ContactKey {
    pub fn new(account: impl Into<AccountKey>, contact_id: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            contact_id: contact_id.into(),
        }
    }

    pub fn account(&self) -> &AccountKey {
        &self.account
    }

    pub fn contact_id(&self) -> &str {
        &self.contact_id
    }
}

impl fmt::Display for ContactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.account, self.contact_id)
    }
}

// =============================================================================
// Presence
// =============================================================================

/// Presence type as numbered by the directory service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceType {
    Unset,
    Offline,
    Available,
    Away,
    ExtendedAway,
    Hidden,
    Busy,
    Unknown,
    Error,
}

impl PresenceType {
    /// Numeric code stored in the status-type property
    pub fn code(self) -> i64 {
        match self {
            PresenceType::Unset => 0,
            PresenceType::Offline => 1,
            PresenceType::Available => 2,
            PresenceType::Away => 3,
            PresenceType::ExtendedAway => 4,
            PresenceType::Hidden => 5,
            PresenceType::Busy => 6,
            PresenceType::Unknown => 7,
            PresenceType::Error => 8,
        }
    }

    /// Out-of-range codes map to `Unknown`
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => PresenceType::Unset,
            1 => PresenceType::Offline,
            2 => PresenceType::Available,
            3 => PresenceType::Away,
            4 => PresenceType::ExtendedAway,
            5 => PresenceType::Hidden,
            6 => PresenceType::Busy,
            8 => PresenceType::Error,
            _ => PresenceType::Unknown,
        }
    }
}

/// Presence as reported by the event source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimplePresence {
    pub kind: PresenceType,
    pub status: String,
    #[serde(default)]
    pub message: String,
}

impl SimplePresence {
    pub fn new(kind: PresenceType, status: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: status.into(),
            message: message.into(),
        }
    }
}

/// Liveness of an indexed entity.
///
/// `Unknown` is both the initial state and the soft-delete marker: the
/// external entity is gone (or has not reported yet) but its record stays.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Presence {
    #[default]
    Unknown,
    Known(SimplePresence),
}

impl Presence {
    pub fn is_unknown(&self) -> bool {
        matches!(self, Presence::Unknown)
    }

    pub fn known(&self) -> Option<&SimplePresence> {
        match self {
            Presence::Known(presence) => Some(presence),
            Presence::Unknown => None,
        }
    }
}

/// Per-direction relationship state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceState {
    Yes,
    Ask,
    No,
}

/// Communication capability advertised by a contact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Text,
    Audio,
    Video,
}

impl Capability {
    /// Well-known store resource naming this capability
    pub fn handle(self) -> ResourceHandle {
        let name = match self {
            Capability::Text => "text",
            Capability::Audio => "audio",
            Capability::Video => "video",
        };
        ResourceHandle::new(format!("urn:roster:capability:{name}"))
    }
}

// =============================================================================
// Records
// =============================================================================

/// The local owner: the well-known anchor and the person-contact it grounds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerIdentity {
    pub anchor: ResourceHandle,
    pub contact: ResourceHandle,
}

/// Indexed account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRecord {
    pub(crate) handle: ResourceHandle,
    pub(crate) protocol: String,
    pub(crate) presence: Presence,
    pub(crate) nickname: Option<String>,
}

impl AccountRecord {
    pub fn new(handle: ResourceHandle, protocol: impl Into<String>) -> Self {
        Self {
            handle,
            protocol: protocol.into(),
            presence: Presence::Unknown,
            nickname: None,
        }
    }

    /// Store handle of the account resource
    pub fn handle(&self) -> &ResourceHandle {
        &self.handle
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn presence(&self) -> &Presence {
        &self.presence
    }

    pub fn nickname(&self) -> Option<&str> {
        self.nickname.as_deref()
    }
}

/// Designated avatar of a contact.
///
/// `owned` is true when the avatar path itself added the photo to the
/// contact's photo collection, and only then may it remove it again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvatarSlot {
    pub url: String,
    pub owned: bool,
}

/// Indexed contact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactRecord {
    pub(crate) person: ResourceHandle,
    pub(crate) account: ResourceHandle,
    pub(crate) presence: Presence,
    pub(crate) publish: Option<PresenceState>,
    pub(crate) subscription: Option<PresenceState>,
    pub(crate) groups: BTreeSet<String>,
    pub(crate) photos: BTreeSet<String>,
    pub(crate) avatar: Option<AvatarSlot>,
}

impl ContactRecord {
    pub fn new(person: ResourceHandle, account: ResourceHandle) -> Self {
        Self {
            person,
            account,
            presence: Presence::Unknown,
            publish: None,
            subscription: None,
            groups: BTreeSet::new(),
            photos: BTreeSet::new(),
            avatar: None,
        }
    }

    /// Store handle of the contact's person resource
    pub fn person(&self) -> &ResourceHandle {
        &self.person
    }

    /// Store handle of the contact's account resource
    pub fn account(&self) -> &ResourceHandle {
        &self.account
    }

    pub fn presence(&self) -> &Presence {
        &self.presence
    }

    pub fn publish_state(&self) -> Option<PresenceState> {
        self.publish
    }

    pub fn subscription_state(&self) -> Option<PresenceState> {
        self.subscription
    }

    /// Names of the groups the contact belongs to
    pub fn groups(&self) -> &BTreeSet<String> {
        &self.groups
    }

    /// Photo collection as last known to the cache
    pub fn photos(&self) -> &BTreeSet<String> {
        &self.photos
    }

    pub fn avatar(&self) -> Option<&AvatarSlot> {
        self.avatar.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_contact_key_is_structural() {
        // The same characters split differently must stay distinct
        let a = ContactKey::new("/acct#--__--#x", "y");
        let b = ContactKey::new("/acct", "#--__--#x#--__--#y");
        let c = ContactKey::new("/acct#--__--#x", "y");

        let mut keys = HashSet::new();
        keys.insert(a.clone());
        keys.insert(b.clone());
        keys.insert(c);

        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&a));
        assert!(keys.contains(&b));
    }

    #[test]
    fn test_contact_key_order_sensitive() {
        let forward = ContactKey::new("a", "b");
        let swapped = ContactKey::new("b", "a");
        assert_ne!(forward, swapped);
    }

    #[test]
    fn test_presence_codes() {
        assert_eq!(PresenceType::Unknown.code(), 7);
        assert_eq!(PresenceType::from_code(3), PresenceType::Away);
        assert_eq!(PresenceType::from_code(42), PresenceType::Unknown);
    }

    #[test]
    fn test_new_records_start_unknown() {
        let account = AccountRecord::new(ResourceHandle::new("urn:test:a"), "proto");
        assert!(account.presence().is_unknown());
        assert_eq!(account.protocol(), "proto");

        let contact = ContactRecord::new(
            ResourceHandle::new("urn:test:p"),
            ResourceHandle::new("urn:test:c"),
        );
        assert!(contact.presence().is_unknown());
        assert!(contact.groups().is_empty());
        assert!(contact.avatar().is_none());
    }

    #[test]
    fn test_presence_serialization() {
        let presence = SimplePresence::new(PresenceType::Away, "away", "Hello");
        let json = serde_json::to_string(&presence).unwrap();
        assert!(json.contains("\"kind\":\"away\""));
    }
}
