//! Mutation-driven cache invalidation
//!
//! After a successful mutation the [`InvalidationCoordinator`] decides which
//! cached entries are now wrong and either marks them stale or patches them
//! in place. The decision is a pure function of the [`Mutation`] and its
//! response body ([`InvalidationCoordinator::plan`]); applying a plan is
//! idempotent.
//!
//! | Mutation      | Marked stale                               | Patched            |
//! |---------------|--------------------------------------------|--------------------|
//! | create        | collections of the kind, parent detail     |                    |
//! | update        | `detail(id)` when the new shape is unknown | `detail(id)`       |
//! | delete        | collections of the kind, parent detail     |                    |
//! | status change | collections of the kind; `detail(id)` when the value is unknown | `detail(id)` |

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::cache::keys::{ItemId, KeyPattern, QueryKeys, ResourceKey, ResourceKind};
use crate::cache::store::ResponseCache;

/// The parent item a mutation hangs under, e.g. the folder of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRef {
    /// Parent kind
    pub kind: ResourceKind,
    /// Parent identifier
    pub id: ItemId,
}

impl ParentRef {
    /// Creates a parent reference.
    pub fn new(kind: ResourceKind, id: impl Into<ItemId>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

/// Description of a server-side write, attached to the call that performs it.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// A new item was created
    Create {
        /// Kind of the new item
        kind: ResourceKind,
        /// Containing item, if any
        parent: Option<ParentRef>,
    },
    /// An existing item was modified
    Update {
        /// Kind of the item
        kind: ResourceKind,
        /// Item identifier
        id: ItemId,
        /// Changed fields, when the caller knows them up front
        changes: Option<Map<String, Value>>,
    },
    /// An item was deleted or soft-deleted
    Delete {
        /// Kind of the item
        kind: ResourceKind,
        /// Item identifier
        id: ItemId,
        /// Containing item, if any
        parent: Option<ParentRef>,
    },
    /// A single status-like field (status, role, active) changed
    StatusChange {
        /// Kind of the item
        kind: ResourceKind,
        /// Item identifier
        id: ItemId,
        /// Name of the changed field
        field: String,
        /// New value, when known synchronously
        value: Option<Value>,
    },
}

impl Mutation {
    /// Kind of resource the mutation touches.
    pub fn kind(&self) -> &ResourceKind {
        match self {
            Mutation::Create { kind, .. }
            | Mutation::Update { kind, .. }
            | Mutation::Delete { kind, .. }
            | Mutation::StatusChange { kind, .. } => kind,
        }
    }
}

/// Direct write of changed fields into one cached entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    /// Entry to patch
    pub key: ResourceKey,
    /// Fields to merge into the entry
    pub fields: Map<String, Value>,
}

/// Everything a mutation does to the cache.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvalidationPlan {
    /// Sets of entries to flag stale
    pub stale: Vec<KeyPattern>,
    /// Entries to merge new field values into
    pub patches: Vec<Patch>,
}

/// Outcome of applying a plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvalidationReport {
    /// Entries that transitioned from fresh to stale
    pub marked_stale: usize,
    /// Entries whose value changed
    pub patched: usize,
}

/// What a remote notification says happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteAction {
    /// Item created
    Created,
    /// Item modified
    Updated,
    /// Item removed
    Deleted,
    /// Status-like field changed
    StatusChanged,
}

/// A change pushed by the server over the live notification channel.
///
/// ```
/// use workdesk::cache::invalidation::{RemoteAction, RemoteEvent};
///
/// let event: RemoteEvent =
///     serde_json::from_str(r#"{"kind":"leaves","id":7,"action":"status_changed","field":"status","value":"approved"}"#)
///         .unwrap();
/// assert_eq!(event.action, RemoteAction::StatusChanged);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEvent {
    /// Kind of the changed item
    pub kind: ResourceKind,
    /// Changed item, if the event names one
    #[serde(default)]
    pub id: Option<ItemId>,
    /// What happened
    pub action: RemoteAction,
    /// Field name for status changes
    #[serde(default)]
    pub field: Option<String>,
    /// New value for status changes
    #[serde(default)]
    pub value: Option<Value>,
    /// New field values for updates
    #[serde(default)]
    pub data: Option<Value>,
}

impl RemoteEvent {
    /// Translates the event into the equivalent local mutation.
    ///
    /// Returns `None` when the event lacks what the mutation needs (an id
    /// for updates and deletes, a field for status changes).
    pub fn to_mutation(&self) -> Option<Mutation> {
        let kind = self.kind.clone();
        match self.action {
            RemoteAction::Created => Some(Mutation::Create { kind, parent: None }),
            RemoteAction::Updated => Some(Mutation::Update {
                kind,
                id: self.id.clone()?,
                changes: match &self.data {
                    Some(Value::Object(map)) => Some(map.clone()),
                    _ => None,
                },
            }),
            RemoteAction::Deleted => Some(Mutation::Delete {
                kind,
                id: self.id.clone()?,
                parent: None,
            }),
            RemoteAction::StatusChanged => Some(Mutation::StatusChange {
                kind,
                id: self.id.clone()?,
                field: self.field.clone()?,
                value: self.value.clone(),
            }),
        }
    }
}

/// Applies the invalidation policy to a shared [`ResponseCache`].
#[derive(Debug, Clone)]
pub struct InvalidationCoordinator {
    cache: Arc<ResponseCache<Value>>,
}

impl InvalidationCoordinator {
    /// Creates a coordinator over `cache`.
    pub fn new(cache: Arc<ResponseCache<Value>>) -> Self {
        Self { cache }
    }

    /// The cache this coordinator maintains.
    pub fn cache(&self) -> &Arc<ResponseCache<Value>> {
        &self.cache
    }

    /// Computes the effect of `mutation`, given the body of its successful
    /// response.
    ///
    /// # Examples
    ///
    /// ```
    /// use serde_json::json;
    /// use workdesk::cache::invalidation::{InvalidationCoordinator, Mutation};
    /// use workdesk::cache::keys::{ItemId, ResourceKind};
    ///
    /// let plan = InvalidationCoordinator::plan(
    ///     &Mutation::Update { kind: ResourceKind::TASKS, id: ItemId::Number(3), changes: None },
    ///     &json!({"id": 3, "title": "renamed"}),
    /// );
    /// assert!(plan.stale.is_empty());
    /// assert_eq!(plan.patches.len(), 1);
    /// ```
    pub fn plan(mutation: &Mutation, response: &Value) -> InvalidationPlan {
        let keys = QueryKeys::new(mutation.kind().clone());
        let mut plan = InvalidationPlan::default();

        match mutation {
            Mutation::Create { parent, .. } => {
                plan.stale.push(keys.collections());
                if let Some(parent) = parent {
                    plan.stale.push(parent_detail(parent));
                }
            }
            Mutation::Update { id, changes, .. } => {
                let fields = response_item(response, id).or_else(|| changes.clone());
                match fields {
                    Some(fields) => plan.patches.push(Patch {
                        key: keys.detail(id.clone()),
                        fields,
                    }),
                    None => plan.stale.push(KeyPattern::Exact(keys.detail(id.clone()))),
                }
            }
            Mutation::Delete { id, parent, .. } => {
                plan.stale.push(keys.collections());
                plan.stale.push(KeyPattern::Exact(keys.detail(id.clone())));
                if let Some(parent) = parent {
                    plan.stale.push(parent_detail(parent));
                }
            }
            Mutation::StatusChange {
                id, field, value, ..
            } => {
                plan.stale.push(keys.collections());
                let known = value.clone().or_else(|| {
                    response_item(response, id).and_then(|item| item.get(field).cloned())
                });
                match known {
                    Some(value) => {
                        let mut fields = Map::new();
                        fields.insert(field.clone(), value);
                        plan.patches.push(Patch {
                            key: keys.detail(id.clone()),
                            fields,
                        });
                    }
                    None => plan.stale.push(KeyPattern::Exact(keys.detail(id.clone()))),
                }
            }
        }

        plan
    }

    /// Applies a plan to the cache.
    pub fn apply(&self, plan: &InvalidationPlan) -> InvalidationReport {
        let mut report = InvalidationReport::default();
        for pattern in &plan.stale {
            report.marked_stale += self.cache.mark_stale(pattern);
        }
        for patch in &plan.patches {
            if self
                .cache
                .update(&patch.key, |value| merge_fields(value, &patch.fields))
            {
                report.patched += 1;
            }
        }
        report
    }

    /// Plans and applies the effect of a successful mutation.
    pub fn on_mutation(&self, mutation: &Mutation, response: &Value) -> InvalidationReport {
        let report = self.apply(&Self::plan(mutation, response));
        tracing::debug!(
            kind = %mutation.kind(),
            marked_stale = report.marked_stale,
            patched = report.patched,
            "Applied mutation invalidation"
        );
        report
    }

    /// Applies a server-pushed change notification.
    ///
    /// Events that cannot be mapped onto a specific item mark the whole
    /// namespace stale.
    pub fn apply_remote_event(&self, event: &RemoteEvent) -> InvalidationReport {
        match event.to_mutation() {
            Some(mutation) => self.on_mutation(&mutation, &Value::Null),
            None => {
                tracing::debug!(kind = %event.kind, "Remote event without item, invalidating kind");
                InvalidationReport {
                    marked_stale: self
                        .cache
                        .mark_stale(&KeyPattern::Namespace(event.kind.clone())),
                    patched: 0,
                }
            }
        }
    }
}

fn parent_detail(parent: &ParentRef) -> KeyPattern {
    KeyPattern::Exact(QueryKeys::new(parent.kind.clone()).detail(parent.id.clone()))
}

/// Extracts the updated item from a response body, accepting either the
/// bare item or a `{"data": item}` envelope. The item must carry `id`.
fn response_item(response: &Value, id: &ItemId) -> Option<Map<String, Value>> {
    let item = match response {
        Value::Object(map) if map.contains_key("id") => map,
        Value::Object(map) => match map.get("data") {
            Some(Value::Object(inner)) => inner,
            _ => return None,
        },
        _ => return None,
    };
    match item.get("id") {
        Some(found) if id.matches_json(found) => Some(item.clone()),
        _ => None,
    }
}

/// Shallow-merges `fields` into a cached item. Returns whether anything
/// changed.
fn merge_fields(value: &mut Value, fields: &Map<String, Value>) -> bool {
    let Some(target) = patch_target(value) else {
        return false;
    };
    let mut changed = false;
    for (name, new_value) in fields {
        if target.get(name) != Some(new_value) {
            target.insert(name.clone(), new_value.clone());
            changed = true;
        }
    }
    changed
}

/// The object a patch lands in: the value itself, or its `data` envelope
/// when the detail was cached in wrapped form.
fn patch_target(value: &mut Value) -> Option<&mut Map<String, Value>> {
    let wrapped = matches!(
        value,
        Value::Object(map) if !map.contains_key("id") && matches!(map.get("data"), Some(Value::Object(_)))
    );
    if wrapped {
        value.get_mut("data").and_then(Value::as_object_mut)
    } else {
        value.as_object_mut()
    }
}
