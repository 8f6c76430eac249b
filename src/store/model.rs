//! Resource model - handles, kinds, properties and values
//!
//! The graph store holds typed resources linked by named properties. Every
//! property is multi-valued; a value is either a literal or a link to another
//! resource.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

// =============================================================================
// Resources
// =============================================================================

/// Opaque identifier of a store resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceHandle(String);

impl ResourceHandle {
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    /// Mint a fresh handle for a newly created resource
    pub fn mint() -> Self {
        Self(format!("urn:roster:res:{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    PersonContact,
    ImAccount,
    ContactGroup,
    Person,
}

/// Named property linking a resource to its values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Property {
    // Identity
    AccountIdentifier,
    ImAccountType,
    ImId,
    ImNickname,
    ImCapability,

    // Presence
    ImStatus,
    ImStatusMessage,
    StatusType,

    // Structure
    IsAccessedBy,
    HasImAccount,
    GroundingOccurrence,

    // Groups and media
    BelongsToGroup,
    ContactGroupName,
    Photo,
    Avatar,

    // Relationship
    IsBlocked,
    PublishesPresenceTo,
    RequestedPresenceSubscriptionTo,
}

impl Property {
    /// Vocabulary name of the property
    pub fn as_str(&self) -> &'static str {
        match self {
            Property::AccountIdentifier => "nco:imAccountIdentifier",
            Property::ImAccountType => "nco:imAccountType",
            Property::ImId => "nco:imID",
            Property::ImNickname => "nco:imNickname",
            Property::ImCapability => "nco:imCapability",
            Property::ImStatus => "nco:imPresence",
            Property::ImStatusMessage => "nco:imStatusMessage",
            Property::StatusType => "nco:presenceType",
            Property::IsAccessedBy => "nco:isAccessedBy",
            Property::HasImAccount => "nco:hasIMAccount",
            Property::GroundingOccurrence => "pimo:groundingOccurrence",
            Property::BelongsToGroup => "nco:belongsToGroup",
            Property::ContactGroupName => "nco:contactGroupName",
            Property::Photo => "nco:photo",
            Property::Avatar => "nco:imAvatar",
            Property::IsBlocked => "nco:isBlocked",
            Property::PublishesPresenceTo => "nco:publishesPresenceTo",
            Property::RequestedPresenceSubscriptionTo => "nco:requestedPresenceSubscriptionTo",
        }
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Property value: literal or resource link
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Text(String),
    Integer(i64),
    Boolean(bool),
    Resource(ResourceHandle),
}

impl Value {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_resource(&self) -> Option<&ResourceHandle> {
        match self {
            Value::Resource(handle) => Some(handle),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::Text(text.to_string())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Value::Text(text)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<ResourceHandle> for Value {
    fn from(handle: ResourceHandle) -> Self {
        Value::Resource(handle)
    }
}

impl From<&ResourceHandle> for Value {
    fn from(handle: &ResourceHandle) -> Self {
        Value::Resource(handle.clone())
    }
}

// =============================================================================
// Creation
// =============================================================================

/// Value of a property on a resource being created
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    Value(Value),
    /// Link to another resource of the same creation graph, by local key
    New(String),
}

/// One resource to be created, addressed by a key local to its graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewResource {
    pub key: String,
    pub kind: ResourceKind,
    pub properties: Vec<(Property, Term)>,
}

impl NewResource {
    pub fn with(&mut self, property: Property, value: impl Into<Value>) -> &mut Self {
        self.properties.push((property, Term::Value(value.into())));
        self
    }

    pub fn with_new(&mut self, property: Property, key: impl Into<String>) -> &mut Self {
        self.properties.push((property, Term::New(key.into())));
        self
    }
}

/// Edge from an existing resource to a resource of the creation graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLink {
    pub subject: ResourceHandle,
    pub property: Property,
    pub target: String,
}

/// Atomic creation request; handles are minted by the store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateGraph {
    pub resources: Vec<NewResource>,
    pub links: Vec<NewLink>,
}

impl CreateGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource and return it for property chaining
    pub fn resource(&mut self, key: impl Into<String>, kind: ResourceKind) -> &mut NewResource {
        self.resources.push(NewResource {
            key: key.into(),
            kind,
            properties: Vec::new(),
        });
        let last = self.resources.len() - 1;
        &mut self.resources[last]
    }

    pub fn link(&mut self, subject: ResourceHandle, property: Property, target: impl Into<String>) {
        self.links.push(NewLink {
            subject,
            property,
            target: target.into(),
        });
    }
}

/// Local creation keys mapped to minted handles
pub type Mappings = HashMap<String, ResourceHandle>;

// =============================================================================
// Queries
// =============================================================================

/// Link constraint of a query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Link {
    Any,
    /// Resources reached over `via` from any of `subjects`
    From {
        subjects: Vec<ResourceHandle>,
        via: Property,
    },
    /// Resources linking over `via` to any of `objects`
    To {
        via: Property,
        objects: Vec<ResourceHandle>,
    },
}

/// Column bound for each matching resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Selection {
    /// Values of the resource's own property
    Out(Property),
    /// Resources pointing at the matched resource over the property
    In(Property),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkQuery {
    pub kind: Option<ResourceKind>,
    pub link: Link,
    pub select: Vec<Selection>,
}

impl LinkQuery {
    pub fn of_kind(kind: ResourceKind) -> Self {
        Self {
            kind: Some(kind),
            link: Link::Any,
            select: Vec::new(),
        }
    }

    pub fn linked_from(mut self, subjects: Vec<ResourceHandle>, via: Property) -> Self {
        self.link = Link::From { subjects, via };
        self
    }

    pub fn linked_to(mut self, via: Property, objects: Vec<ResourceHandle>) -> Self {
        self.link = Link::To { via, objects };
        self
    }

    pub fn select_out(mut self, property: Property) -> Self {
        self.select.push(Selection::Out(property));
        self
    }

    pub fn select_in(mut self, property: Property) -> Self {
        self.select.push(Selection::In(property));
        self
    }
}

/// One matching resource with its selected bindings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRow {
    pub resource: ResourceHandle,
    pub bindings: BTreeMap<Selection, Vec<Value>>,
}

impl QueryRow {
    pub fn values(&self, selection: Selection) -> &[Value] {
        self.bindings
            .get(&selection)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// First text value of an outgoing property
    pub fn text(&self, property: Property) -> Option<&str> {
        self.values(Selection::Out(property))
            .iter()
            .find_map(Value::as_text)
    }

    pub fn integer(&self, property: Property) -> Option<i64> {
        self.values(Selection::Out(property))
            .iter()
            .find_map(Value::as_integer)
    }

    /// Resources bound to a selection
    pub fn resources(&self, selection: Selection) -> impl Iterator<Item = &ResourceHandle> {
        self.values(selection).iter().filter_map(Value::as_resource)
    }
}
