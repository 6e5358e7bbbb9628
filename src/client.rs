//! Workdesk client facade
//!
//! [`WorkdeskClient`] wires the pipeline together: transport, credential
//! store, token lifecycle, dispatcher, response cache and invalidation
//! coordinator. Screens talk to it through [`WorkdeskClient::fetch`],
//! [`WorkdeskClient::mutate`], or the per-kind [`Resource`] helpers.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::cache::invalidation::{InvalidationCoordinator, Mutation, RemoteEvent};
use crate::cache::keys::{Filters, ItemId, QueryKeys, ResourceKey, ResourceKind};
use crate::cache::store::{FetchOutcome, ResponseCache};
use crate::config::Config;
use crate::dispatch::{ApiCall, RequestDispatcher};
use crate::error::{ApiResult, Result};
use crate::notifications;
use crate::resources::ResourceSpec;
use crate::session::credentials::CredentialStore;
use crate::session::lifecycle::{AuthEndpoints, SessionEvent, TokenLifecycle};
use crate::transport::http::HttpTransport;
use crate::transport::{ApiRequest, Transport};

/// Entry point to the console backend.
///
/// Cheap to clone; clones share session and cache.
#[derive(Debug, Clone)]
pub struct WorkdeskClient {
    dispatcher: RequestDispatcher,
    cache: Arc<ResponseCache<Value>>,
}

impl WorkdeskClient {
    /// Builds a client from configuration.
    ///
    /// Opens the configured credential backend, so a session stored by a
    /// previous process is picked up.
    ///
    /// # Errors
    ///
    /// Returns error if the base URL is invalid, the HTTP client cannot be
    /// built, or the credential backend cannot be read.
    pub fn from_config(config: &Config) -> Result<Self> {
        let transport = HttpTransport::new(config.base_url()?, config.timeout())?;
        let store = CredentialStore::open(config.credential_backend()?)?;
        Ok(Self::with_transport(
            Arc::new(transport),
            Arc::new(store),
            config.auth_endpoints(),
            config.cache_max_age(),
        ))
    }

    /// Builds a client over an existing transport and store.
    pub fn with_transport(
        transport: Arc<dyn Transport>,
        store: Arc<CredentialStore>,
        endpoints: AuthEndpoints,
        max_age: Option<chrono::Duration>,
    ) -> Self {
        let lifecycle = TokenLifecycle::new(Arc::clone(&transport), store, endpoints);
        let cache = Arc::new(ResponseCache::new(max_age));
        let coordinator = InvalidationCoordinator::new(Arc::clone(&cache));
        Self {
            dispatcher: RequestDispatcher::new(transport, lifecycle, coordinator),
            cache,
        }
    }

    /// Logs in and stores the credential pair.
    ///
    /// # Errors
    ///
    /// Returns the classified failure of the login call.
    pub async fn login(&self, email: &str, password: &str) -> ApiResult<()> {
        self.lifecycle().login(email, password).await.map(|_| ())
    }

    /// Ends the session and drops everything cached under it.
    pub fn logout(&self) {
        self.lifecycle().logout();
        self.cache.clear();
    }

    /// Returns `true` when a credential pair is stored.
    pub fn is_authenticated(&self) -> bool {
        self.lifecycle().is_authenticated()
    }

    /// Subscribes to session lifecycle events.
    pub fn subscribe_session(&self) -> broadcast::Receiver<SessionEvent> {
        self.lifecycle().subscribe()
    }

    /// The session manager.
    pub fn lifecycle(&self) -> &TokenLifecycle {
        self.dispatcher.lifecycle()
    }

    /// The shared response cache.
    pub fn cache(&self) -> &Arc<ResponseCache<Value>> {
        &self.cache
    }

    /// The dispatcher every call goes through.
    pub fn dispatcher(&self) -> &RequestDispatcher {
        &self.dispatcher
    }

    /// Read-through fetch.
    ///
    /// A fresh entry under `key` is returned without a network call;
    /// otherwise `call` is executed and its result cached under `key`.
    /// A result that raced a mutation of the same kind is cached stale, so
    /// the next read goes back to the server.
    ///
    /// # Errors
    ///
    /// Returns the dispatcher's error; nothing is cached on failure.
    pub async fn fetch(&self, key: ResourceKey, call: &ApiCall) -> ApiResult<Value> {
        if let Some(value) = self.cache.get_fresh(&key) {
            tracing::debug!(key = %key, "Cache hit");
            return Ok(value);
        }
        let epoch = self.cache.begin_fetch(&key);
        let value = self.dispatcher.execute(call).await?;
        let outcome = self.cache.complete_fetch(key.clone(), value.clone(), epoch);
        if outcome != FetchOutcome::Fresh {
            tracing::debug!(key = %key, ?outcome, "Fetch raced a cache write");
        }
        Ok(value)
    }

    /// Executes a write; the cache is updated before this returns.
    ///
    /// # Errors
    ///
    /// Returns the dispatcher's error; the cache is untouched on failure.
    pub async fn mutate(&self, request: ApiRequest, mutation: Mutation) -> ApiResult<Value> {
        self.dispatcher
            .execute(&ApiCall::new(request).with_mutation(mutation))
            .await
    }

    /// Helpers for one resource kind, `None` for kinds the console does
    /// not serve.
    pub fn resource(&self, kind: &ResourceKind) -> Option<Resource<'_>> {
        ResourceSpec::lookup(kind).map(|spec| Resource::new(self, spec))
    }

    /// Applies remote change notifications from `receiver` until it closes.
    pub fn listen(&self, receiver: mpsc::Receiver<RemoteEvent>) -> JoinHandle<usize> {
        notifications::spawn_listener(receiver, self.dispatcher.coordinator().clone())
    }
}

/// Cache-aware operations on one resource kind.
///
/// # Examples
///
/// ```no_run
/// use serde_json::json;
/// use workdesk::cache::keys::{Filters, ResourceKind};
/// use workdesk::client::WorkdeskClient;
///
/// # async fn example(client: WorkdeskClient) -> Result<(), workdesk::error::ApiError> {
/// let leaves = client.resource(&ResourceKind::LEAVES).unwrap();
/// let pending = leaves.list(Filters::new().with("status", "pending")).await?;
/// leaves.set_status(7, "status", json!("approved")).await?;
/// # let _ = pending;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Resource<'a> {
    client: &'a WorkdeskClient,
    spec: &'static ResourceSpec,
    keys: QueryKeys,
}

impl<'a> Resource<'a> {
    fn new(client: &'a WorkdeskClient, spec: &'static ResourceSpec) -> Self {
        Self {
            client,
            spec,
            keys: QueryKeys::new(spec.kind.clone()),
        }
    }

    /// Routing of this kind.
    pub fn spec(&self) -> &'static ResourceSpec {
        self.spec
    }

    /// Cache keys of this kind.
    pub fn keys(&self) -> &QueryKeys {
        &self.keys
    }

    /// `GET {path}?filters`, cached under `list(filters)`.
    pub async fn list(&self, filters: Filters) -> ApiResult<Value> {
        let request = ApiRequest::get(self.spec.path).with_query(filters.to_query());
        self.client
            .fetch(self.keys.list(filters), &request.into())
            .await
    }

    /// `GET {path}/all`, cached under `get_all()`.
    pub async fn get_all(&self) -> ApiResult<Value> {
        let request = ApiRequest::get(self.spec.unpaged_path());
        self.client.fetch(self.keys.get_all(), &request.into()).await
    }

    /// `GET {path}/{id}`, cached under `detail(id)`.
    pub async fn get(&self, id: impl Into<ItemId>) -> ApiResult<Value> {
        let id = id.into();
        let request = ApiRequest::get(self.spec.item_path(&id));
        self.client.fetch(self.keys.detail(id), &request.into()).await
    }

    /// `POST {path}`.
    pub async fn create(&self, body: Value) -> ApiResult<Value> {
        let mutation = Mutation::Create {
            kind: self.spec.kind.clone(),
            parent: self.spec.parent_of(&body),
        };
        self.client
            .mutate(ApiRequest::post(self.spec.path, body), mutation)
            .await
    }

    /// `PUT {path}/{id}`.
    pub async fn update(&self, id: impl Into<ItemId>, body: Value) -> ApiResult<Value> {
        let id = id.into();
        let request = ApiRequest::put(self.spec.item_path(&id), body);
        let mutation = Mutation::Update {
            kind: self.spec.kind.clone(),
            id,
            changes: None,
        };
        self.client.mutate(request, mutation).await
    }

    /// `DELETE {path}/{id}`.
    ///
    /// The parent is read from the cached detail, when there is one.
    pub async fn delete(&self, id: impl Into<ItemId>) -> ApiResult<Value> {
        let id = id.into();
        let parent = self
            .client
            .cache()
            .get(&self.keys.detail(id.clone()))
            .and_then(|entry| self.spec.parent_of(unwrap_item(&entry.value)));
        let request = ApiRequest::delete(self.spec.item_path(&id));
        let mutation = Mutation::Delete {
            kind: self.spec.kind.clone(),
            id,
            parent,
        };
        self.client.mutate(request, mutation).await
    }

    /// `PATCH {path}/{id}/{field}` with `{field: value}`.
    pub async fn set_status(
        &self,
        id: impl Into<ItemId>,
        field: &str,
        value: Value,
    ) -> ApiResult<Value> {
        let id = id.into();
        let request = ApiRequest::patch(
            self.spec.field_path(&id, field),
            json!({ field: value.clone() }),
        );
        let mutation = Mutation::StatusChange {
            kind: self.spec.kind.clone(),
            id,
            field: field.to_string(),
            value: Some(value),
        };
        self.client.mutate(request, mutation).await
    }
}

/// The item inside a `{"data": item}` envelope, or the value itself.
fn unwrap_item(value: &Value) -> &Value {
    match value.get("data") {
        Some(inner) if inner.is_object() && value.get("id").is_none() => inner,
        _ => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::credentials::CredentialPair;
    use crate::transport::fake::FakeTransport;
    use crate::transport::TransportResponse;

    fn client(transport: FakeTransport) -> WorkdeskClient {
        let store = Arc::new(CredentialStore::in_memory());
        store.replace(CredentialPair::new("t", "r")).unwrap();
        WorkdeskClient::with_transport(Arc::new(transport), store, AuthEndpoints::default(), None)
    }

    #[tokio::test]
    async fn test_fetch_reads_through_cache() {
        let transport = FakeTransport::new(|_| TransportResponse::ok(json!([{"id": 1}])));
        let client = client(transport.clone());
        let tasks = client.resource(&ResourceKind::TASKS).unwrap();

        let first = tasks.list(Filters::new().with("status", "open")).await.unwrap();
        let second = tasks.list(Filters::new().with("status", "open")).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(transport.count_for("/tasks"), 1);
        assert_eq!(transport.requests()[0].query, vec![("status".to_string(), "open".to_string())]);
    }

    #[tokio::test]
    async fn test_create_makes_lists_refetch() {
        let transport = FakeTransport::new(|request| match request.method {
            crate::transport::Method::Post => TransportResponse::ok(json!({"id": 2})),
            _ => TransportResponse::ok(json!([])),
        });
        let client = client(transport.clone());
        let tasks = client.resource(&ResourceKind::TASKS).unwrap();

        tasks.list(Filters::new()).await.unwrap();
        tasks.create(json!({"title": "new"})).await.unwrap();
        tasks.list(Filters::new()).await.unwrap();

        assert_eq!(transport.count_for("/tasks"), 3);
    }

    #[tokio::test]
    async fn test_read_in_flight_during_create_is_not_served_fresh() {
        let created = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let server = Arc::clone(&created);
        let transport = FakeTransport::new(move |request| {
            use std::sync::atomic::Ordering;
            match request.method {
                crate::transport::Method::Post => {
                    server.fetch_add(1, Ordering::SeqCst);
                    TransportResponse::ok(json!({"id": 2}))
                }
                _ => TransportResponse::ok(json!({"count": server.load(Ordering::SeqCst)})),
            }
        })
        .with_path_latency("/tasks/all", std::time::Duration::from_millis(100));
        let client = client(transport.clone());

        let reader = client.clone();
        let slow_read = tokio::spawn(async move {
            reader
                .resource(&ResourceKind::TASKS)
                .unwrap()
                .get_all()
                .await
        });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let tasks = client.resource(&ResourceKind::TASKS).unwrap();
        tasks.create(json!({"title": "new"})).await.unwrap();

        assert_eq!(slow_read.await.unwrap().unwrap(), json!({"count": 0}));
        assert!(client.cache().get(&tasks.keys().get_all()).unwrap().stale);

        let after = tasks.get_all().await.unwrap();
        assert_eq!(after, json!({"count": 1}));
        assert_eq!(transport.count_for("/tasks/all"), 2);
    }

    #[tokio::test]
    async fn test_update_patches_detail_without_refetch() {
        let transport = FakeTransport::new(|request| match request.method {
            crate::transport::Method::Put => {
                TransportResponse::ok(json!({"id": 4, "title": "renamed"}))
            }
            _ => TransportResponse::ok(json!({"id": 4, "title": "draft", "owner": 1})),
        });
        let client = client(transport.clone());
        let tasks = client.resource(&ResourceKind::TASKS).unwrap();

        tasks.get(4).await.unwrap();
        tasks.update(4, json!({"title": "renamed"})).await.unwrap();
        let detail = tasks.get(4).await.unwrap();

        assert_eq!(detail, json!({"id": 4, "title": "renamed", "owner": 1}));
        assert_eq!(transport.count_for("/tasks/4"), 2);
    }

    #[tokio::test]
    async fn test_delete_marks_cached_parent_stale() {
        let transport = FakeTransport::new(|request| match request.path.as_str() {
            "/documents/8" => TransportResponse::ok(json!({"data": {"id": 8, "folderId": 3}})),
            _ => TransportResponse::ok(json!({"id": 3})),
        });
        let client = client(transport);
        let folders = QueryKeys::new(ResourceKind::FOLDERS);
        let documents = client.resource(&ResourceKind::DOCUMENTS).unwrap();

        client.resource(&ResourceKind::FOLDERS).unwrap().get(3).await.unwrap();
        documents.get(8).await.unwrap();
        documents.delete(8).await.unwrap();

        assert!(client.cache().get(&folders.detail(3)).unwrap().stale);
    }

    #[tokio::test]
    async fn test_deleted_item_is_not_served_from_cache() {
        let transport = FakeTransport::new(|request| match request.method {
            crate::transport::Method::Delete => TransportResponse::ok(Value::Null),
            _ => TransportResponse::ok(json!({"id": 6, "title": "retro"})),
        });
        let client = client(transport.clone());
        let tasks = client.resource(&ResourceKind::TASKS).unwrap();

        tasks.get(6).await.unwrap();
        tasks.delete(6).await.unwrap();

        assert!(client.cache().get(&tasks.keys().detail(6)).unwrap().stale);
        tasks.get(6).await.unwrap();
        assert_eq!(transport.count_for("/tasks/6"), 3);
    }

    #[tokio::test]
    async fn test_set_status_sends_field_patch() {
        let transport = FakeTransport::new(|_| TransportResponse::ok(Value::Null));
        let client = client(transport.clone());
        let leaves = client.resource(&ResourceKind::LEAVES).unwrap();

        leaves.set_status(7, "status", json!("approved")).await.unwrap();

        let sent = transport.requests();
        assert_eq!(sent[0].path, "/leaves/7/status");
        assert_eq!(sent[0].payload, Some(json!({"status": "approved"})));
    }

    #[tokio::test]
    async fn test_logout_clears_session_and_cache() {
        let transport = FakeTransport::new(|_| TransportResponse::ok(json!([])));
        let client = client(transport);
        client.resource(&ResourceKind::BOARDS).unwrap().get_all().await.unwrap();
        assert!(!client.cache().is_empty());

        client.logout();

        assert!(!client.is_authenticated());
        assert!(client.cache().is_empty());
    }

    #[test]
    fn test_unknown_kind_has_no_resource() {
        let client = client(FakeTransport::new(|_| TransportResponse::ok(Value::Null)));
        assert!(client.resource(&ResourceKind::new("payroll")).is_none());
    }
}
