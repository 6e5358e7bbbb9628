//! Structured cache keys
//!
//! Every cacheable unit is addressed by a [`ResourceKey`]: a namespace (the
//! [`ResourceKind`]), a [`Scope`], and an [`Identity`]. Keys are compared
//! and hashed structurally, never by formatting them into strings, so two
//! call sites that describe the same resource always find the same entry.
//!
//! [`QueryKeys`] is the registry: given a kind it produces the four
//! canonical shapes (`all`, `get_all`, `list(filters)`, `detail(id)`).
//! [`KeyPattern`] addresses sets of keys hierarchically for invalidation.

use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// ResourceKind
// ---------------------------------------------------------------------------

/// A named category of server-side entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKind(Cow<'static, str>);

impl ResourceKind {
    /// Tasks
    pub const TASKS: ResourceKind = ResourceKind(Cow::Borrowed("tasks"));
    /// Leave requests
    pub const LEAVES: ResourceKind = ResourceKind(Cow::Borrowed("leaves"));
    /// Documents
    pub const DOCUMENTS: ResourceKind = ResourceKind(Cow::Borrowed("documents"));
    /// Document folders
    pub const FOLDERS: ResourceKind = ResourceKind(Cow::Borrowed("folders"));
    /// Personnel (user accounts)
    pub const PERSONNEL: ResourceKind = ResourceKind(Cow::Borrowed("personnel"));
    /// Work boards
    pub const BOARDS: ResourceKind = ResourceKind(Cow::Borrowed("boards"));
    /// Tasks on a work board
    pub const BOARD_TASKS: ResourceKind = ResourceKind(Cow::Borrowed("board-tasks"));
    /// In-app notifications
    pub const NOTIFICATIONS: ResourceKind = ResourceKind(Cow::Borrowed("notifications"));

    /// Creates a kind from an arbitrary name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    /// The kind's name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// ItemId
// ---------------------------------------------------------------------------

/// Identity of a single item: numeric or textual.
///
/// `ItemId::Number(5)` and `ItemId::Text("5")` are different identities;
/// callers should use whatever form the service returns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ItemId {
    /// Numeric identifier
    Number(i64),
    /// String identifier (UUIDs, slugs)
    Text(String),
}

impl ItemId {
    /// Reads an identifier out of a JSON value.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(ItemId::Number),
            Value::String(s) => Some(ItemId::Text(s.clone())),
            _ => None,
        }
    }

    /// Parses command-line input: digits become a number, anything else text.
    pub fn parse(input: &str) -> Self {
        input
            .parse::<i64>()
            .map(ItemId::Number)
            .unwrap_or_else(|_| ItemId::Text(input.to_string()))
    }

    /// Returns `true` if `value` is this identifier.
    ///
    /// A numeric id also matches its decimal string form, since services
    /// are not always consistent about id types in nested payloads.
    pub fn matches_json(&self, value: &Value) -> bool {
        match (self, value) {
            (ItemId::Number(n), Value::Number(v)) => v.as_i64() == Some(*n),
            (ItemId::Number(n), Value::String(s)) => s.parse::<i64>().ok() == Some(*n),
            (ItemId::Text(t), Value::String(s)) => t == s,
            (ItemId::Text(t), Value::Number(v)) => v.to_string() == *t,
            _ => false,
        }
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemId::Number(n) => write!(f, "{}", n),
            ItemId::Text(t) => f.write_str(t),
        }
    }
}

impl From<i64> for ItemId {
    fn from(value: i64) -> Self {
        ItemId::Number(value)
    }
}

impl From<&str> for ItemId {
    fn from(value: &str) -> Self {
        ItemId::Text(value.to_string())
    }
}

impl From<String> for ItemId {
    fn from(value: String) -> Self {
        ItemId::Text(value)
    }
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// An opaque, order-irrelevant filter structure.
///
/// Equality is structural: property insertion order never matters, at any
/// nesting depth. The hash walks objects in sorted key order so it agrees
/// with equality.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use workdesk::cache::keys::Filters;
///
/// let a = Filters::try_from(json!({"status": "open", "page": 2})).unwrap();
/// let b = Filters::new().with("page", 2).with("status", "open");
/// assert_eq!(a, b);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filters(Map<String, Value>);

impl Filters {
    /// Creates an empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a property.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    /// Returns `true` when no property is set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Looks up a property.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Renders the filter as query-string parameters, sorted by name.
    ///
    /// Strings are passed through, `null` properties are omitted, arrays
    /// repeat the parameter once per element, and other values use their
    /// JSON text.
    pub fn to_query(&self) -> Vec<(String, String)> {
        let mut names: Vec<&String> = self.0.keys().collect();
        names.sort();

        let mut query = Vec::new();
        for name in names {
            match &self.0[name.as_str()] {
                Value::Null => {}
                Value::Array(items) => {
                    for item in items {
                        query.push((name.clone(), query_text(item)));
                    }
                }
                other => query.push((name.clone(), query_text(other))),
            }
        }
        query
    }
}

fn query_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl TryFrom<Value> for Filters {
    type Error = Value;

    /// Accepts a JSON object; any other value is handed back.
    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(other),
        }
    }
}

impl From<Map<String, Value>> for Filters {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl Hash for Filters {
    fn hash<H: Hasher>(&self, state: &mut H) {
        hash_object(&self.0, state);
    }
}

fn hash_object<H: Hasher>(map: &Map<String, Value>, state: &mut H) {
    let mut names: Vec<&String> = map.keys().collect();
    names.sort();
    state.write_usize(names.len());
    for name in names {
        name.hash(state);
        hash_value(&map[name.as_str()], state);
    }
}

fn hash_value<H: Hasher>(value: &Value, state: &mut H) {
    match value {
        Value::Null => state.write_u8(0),
        Value::Bool(b) => {
            state.write_u8(1);
            b.hash(state);
        }
        Value::Number(n) => {
            state.write_u8(2);
            n.to_string().hash(state);
        }
        Value::String(s) => {
            state.write_u8(3);
            s.hash(state);
        }
        Value::Array(items) => {
            state.write_u8(4);
            state.write_usize(items.len());
            for item in items {
                hash_value(item, state);
            }
        }
        Value::Object(map) => {
            state.write_u8(5);
            hash_object(map, state);
        }
    }
}

// ---------------------------------------------------------------------------
// ResourceKey
// ---------------------------------------------------------------------------

/// Whether a key addresses a collection view or a single item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// A list or collection view
    Collection,
    /// A single item
    Item,
}

/// What, within a namespace and scope, a key points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Identity {
    /// Every list view of the kind, unscoped
    All,
    /// The full unpaged collection
    Unpaged,
    /// A list view under a filter
    Filter(Filters),
    /// A single item
    Id(ItemId),
}

/// Structured identity of a cacheable unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    /// Resource kind
    pub namespace: ResourceKind,
    /// Collection or item
    pub scope: Scope,
    /// Position within the namespace
    pub identity: Identity,
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.identity {
            Identity::All => write!(f, "{}/all", self.namespace),
            Identity::Unpaged => write!(f, "{}/getAll", self.namespace),
            Identity::Filter(filters) => write!(
                f,
                "{}/list{}",
                self.namespace,
                serde_json::to_string(filters).unwrap_or_default()
            ),
            Identity::Id(id) => write!(f, "{}/detail/{}", self.namespace, id),
        }
    }
}

// ---------------------------------------------------------------------------
// QueryKeys
// ---------------------------------------------------------------------------

/// Key registry for one resource kind. Pure; holds no state but the kind.
///
/// # Examples
///
/// ```
/// use workdesk::cache::keys::{Filters, QueryKeys, ResourceKind};
///
/// let keys = QueryKeys::new(ResourceKind::TASKS);
/// assert_eq!(keys.detail(42), keys.detail(42));
/// assert_ne!(keys.all(), keys.get_all());
/// assert_ne!(
///     keys.list(Filters::new().with("status", "open")),
///     keys.list(Filters::new().with("status", "done")),
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryKeys {
    kind: ResourceKind,
}

impl QueryKeys {
    /// Creates the registry for `kind`.
    pub fn new(kind: ResourceKind) -> Self {
        Self { kind }
    }

    /// The kind this registry produces keys for.
    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    /// Every list view of this kind, unscoped.
    pub fn all(&self) -> ResourceKey {
        self.collection(Identity::All)
    }

    /// The full unpaged collection.
    pub fn get_all(&self) -> ResourceKey {
        self.collection(Identity::Unpaged)
    }

    /// A list view under `filters`.
    pub fn list(&self, filters: Filters) -> ResourceKey {
        self.collection(Identity::Filter(filters))
    }

    /// A single item.
    pub fn detail(&self, id: impl Into<ItemId>) -> ResourceKey {
        ResourceKey {
            namespace: self.kind.clone(),
            scope: Scope::Item,
            identity: Identity::Id(id.into()),
        }
    }

    /// Pattern matching every collection-scoped key of this kind.
    pub fn collections(&self) -> KeyPattern {
        KeyPattern::Collections(self.kind.clone())
    }

    /// Pattern matching every filtered list of this kind.
    pub fn lists(&self) -> KeyPattern {
        KeyPattern::Lists(self.kind.clone())
    }

    fn collection(&self, identity: Identity) -> ResourceKey {
        ResourceKey {
            namespace: self.kind.clone(),
            scope: Scope::Collection,
            identity,
        }
    }
}

// ---------------------------------------------------------------------------
// KeyPattern
// ---------------------------------------------------------------------------

/// A set of keys, addressed hierarchically.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyPattern {
    /// Exactly one key
    Exact(ResourceKey),
    /// Every `list(*)` key of a kind
    Lists(ResourceKind),
    /// Every collection-scoped key of a kind: `all`, `getAll`, `list(*)`
    Collections(ResourceKind),
    /// Every key of a kind
    Namespace(ResourceKind),
}

impl KeyPattern {
    /// The kind every key in this set belongs to.
    pub fn namespace(&self) -> &ResourceKind {
        match self {
            KeyPattern::Exact(key) => &key.namespace,
            KeyPattern::Lists(kind) | KeyPattern::Collections(kind) | KeyPattern::Namespace(kind) => {
                kind
            }
        }
    }

    /// Returns `true` if `key` belongs to this set.
    ///
    /// # Examples
    ///
    /// ```
    /// use workdesk::cache::keys::{Filters, KeyPattern, QueryKeys, ResourceKind};
    ///
    /// let tasks = QueryKeys::new(ResourceKind::TASKS);
    /// let pattern = tasks.collections();
    /// assert!(pattern.matches(&tasks.all()));
    /// assert!(pattern.matches(&tasks.list(Filters::new())));
    /// assert!(!pattern.matches(&tasks.detail(1)));
    /// assert!(!pattern.matches(&QueryKeys::new(ResourceKind::LEAVES).all()));
    /// ```
    pub fn matches(&self, key: &ResourceKey) -> bool {
        match self {
            KeyPattern::Exact(exact) => exact == key,
            KeyPattern::Lists(kind) => {
                &key.namespace == kind && matches!(key.identity, Identity::Filter(_))
            }
            KeyPattern::Collections(kind) => {
                &key.namespace == kind && key.scope == Scope::Collection
            }
            KeyPattern::Namespace(kind) => &key.namespace == kind,
        }
    }
}

impl From<ResourceKey> for KeyPattern {
    fn from(key: ResourceKey) -> Self {
        KeyPattern::Exact(key)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
