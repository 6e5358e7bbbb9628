//! Resource kinds served by the console backend
//!
//! Each [`ResourceSpec`] names a kind, the endpoint its items live under,
//! and for nested kinds the parent kind and the body field that points at
//! the parent (a document's folder, a board task's board).

use crate::cache::invalidation::ParentRef;
use crate::cache::keys::{ItemId, ResourceKind};
use serde_json::Value;

/// Parent relation of a nested kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentSpec {
    /// Kind of the containing item
    pub kind: ResourceKind,
    /// Body field carrying the parent id
    pub field: &'static str,
}

/// Routing and nesting of one resource kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSpec {
    /// Kind served
    pub kind: ResourceKind,
    /// Collection endpoint, relative to the base URL
    pub path: &'static str,
    /// Containing kind, for nested resources
    pub parent: Option<ParentSpec>,
}

impl ResourceSpec {
    const fn flat(kind: ResourceKind, path: &'static str) -> Self {
        Self {
            kind,
            path,
            parent: None,
        }
    }

    const fn nested(
        kind: ResourceKind,
        path: &'static str,
        parent: ResourceKind,
        field: &'static str,
    ) -> Self {
        Self {
            kind,
            path,
            parent: Some(ParentSpec {
                kind: parent,
                field,
            }),
        }
    }

    /// Every kind the console knows.
    pub fn all() -> &'static [ResourceSpec] {
        &REGISTRY
    }

    /// Looks up a kind by name (`"tasks"`, `"board-tasks"`, ...).
    pub fn by_name(name: &str) -> Option<&'static ResourceSpec> {
        REGISTRY.iter().find(|spec| spec.kind.as_str() == name)
    }

    /// Looks up a kind.
    pub fn lookup(kind: &ResourceKind) -> Option<&'static ResourceSpec> {
        REGISTRY.iter().find(|spec| &spec.kind == kind)
    }

    /// `GET` endpoint of the full unpaged collection.
    pub fn unpaged_path(&self) -> String {
        format!("{}/all", self.path)
    }

    /// Endpoint of a single item.
    pub fn item_path(&self, id: &ItemId) -> String {
        format!("{}/{}", self.path, id)
    }

    /// Endpoint of a status-like field of a single item.
    pub fn field_path(&self, id: &ItemId, field: &str) -> String {
        format!("{}/{}/{}", self.path, id, field)
    }

    /// Reads the parent reference out of a request or response body.
    ///
    /// Returns `None` for flat kinds and when the field is absent.
    ///
    /// # Examples
    ///
    /// ```
    /// use serde_json::json;
    /// use workdesk::cache::keys::ResourceKind;
    /// use workdesk::resources::ResourceSpec;
    ///
    /// let documents = ResourceSpec::lookup(&ResourceKind::DOCUMENTS).unwrap();
    /// let parent = documents.parent_of(&json!({"name": "a.pdf", "folderId": 4})).unwrap();
    /// assert_eq!(parent.kind, ResourceKind::FOLDERS);
    /// ```
    pub fn parent_of(&self, body: &Value) -> Option<ParentRef> {
        let parent = self.parent.as_ref()?;
        let id = body.get(parent.field).and_then(ItemId::from_json)?;
        Some(ParentRef::new(parent.kind.clone(), id))
    }
}

static REGISTRY: [ResourceSpec; 8] = [
    ResourceSpec::flat(ResourceKind::TASKS, "/tasks"),
    ResourceSpec::flat(ResourceKind::LEAVES, "/leaves"),
    ResourceSpec::nested(
        ResourceKind::DOCUMENTS,
        "/documents",
        ResourceKind::FOLDERS,
        "folderId",
    ),
    ResourceSpec::flat(ResourceKind::FOLDERS, "/folders"),
    ResourceSpec::flat(ResourceKind::PERSONNEL, "/users"),
    ResourceSpec::flat(ResourceKind::BOARDS, "/boards"),
    ResourceSpec::nested(
        ResourceKind::BOARD_TASKS,
        "/board-tasks",
        ResourceKind::BOARDS,
        "boardId",
    ),
    ResourceSpec::flat(ResourceKind::NOTIFICATIONS, "/notifications"),
];
