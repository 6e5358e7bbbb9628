//! Request dispatcher
//!
//! [`RequestDispatcher::execute`] is the only way an authenticated call
//! reaches the [`Transport`]. It attaches the bearer credential, classifies
//! the response, and on a credential rejection refreshes (or joins the live
//! refresh) and replays the call exactly once. Successful mutations are
//! reported to the [`InvalidationCoordinator`] before `execute` returns.
//!
//! The retry is an explicit state machine:
//!
//! ```text
//! Sent --401--> AwaitingRefresh --token--> Replayed --> Done
//!   |                 |                        |
//!   +--other--> Done  +--failure--> Done       +--401--> Done(AuthRejected)
//! ```

use std::sync::Arc;

use serde_json::Value;

use crate::cache::invalidation::{InvalidationCoordinator, Mutation};
use crate::error::ApiResult;
use crate::session::lifecycle::TokenLifecycle;
use crate::transport::{ApiRequest, StatusCategory, Transport, TransportResponse};

/// Header carrying the per-call correlation id. Replays reuse it.
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// A logical operation: the request to send and, for writes, what it changes.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiCall {
    /// Request sent verbatim on every attempt
    pub request: ApiRequest,
    /// Cache effect of a successful write
    pub mutation: Option<Mutation>,
}

impl ApiCall {
    /// A read-only call.
    pub fn new(request: ApiRequest) -> Self {
        Self {
            request,
            mutation: None,
        }
    }

    /// Marks the call as a write with the given cache effect.
    pub fn with_mutation(mut self, mutation: Mutation) -> Self {
        self.mutation = Some(mutation);
        self
    }
}

impl From<ApiRequest> for ApiCall {
    fn from(request: ApiRequest) -> Self {
        Self::new(request)
    }
}

/// Where a call is in its lifecycle.
#[derive(Debug)]
enum DispatchState {
    /// First attempt, carrying the token it was sent with.
    Sent { token: Option<String> },
    /// The first attempt was rejected with `rejected` attached.
    AwaitingRefresh { rejected: Option<String> },
    /// Second and final attempt with a refreshed token.
    Replayed { token: String },
    /// Terminal.
    Done(ApiResult<Value>),
}

/// Sends calls with credentials attached and survives one rejection.
///
/// Cheap to clone; clones share the transport, session and cache.
#[derive(Debug, Clone)]
pub struct RequestDispatcher {
    transport: Arc<dyn Transport>,
    lifecycle: TokenLifecycle,
    coordinator: InvalidationCoordinator,
}

impl RequestDispatcher {
    /// Creates a dispatcher.
    pub fn new(
        transport: Arc<dyn Transport>,
        lifecycle: TokenLifecycle,
        coordinator: InvalidationCoordinator,
    ) -> Self {
        Self {
            transport,
            lifecycle,
            coordinator,
        }
    }

    /// The session this dispatcher authenticates with.
    pub fn lifecycle(&self) -> &TokenLifecycle {
        &self.lifecycle
    }

    /// The coordinator notified of successful mutations.
    pub fn coordinator(&self) -> &InvalidationCoordinator {
        &self.coordinator
    }

    /// Executes `call`.
    ///
    /// # Errors
    ///
    /// - [`ApiError::SessionTerminated`](crate::error::ApiError::SessionTerminated)
    ///   when the credential was rejected and could not be refreshed; the
    ///   call is not resent.
    /// - [`ApiError::AuthRejected`](crate::error::ApiError::AuthRejected)
    ///   when the replay was rejected as well.
    /// - Any other classified failure of the first attempt, unretried.
    pub async fn execute(&self, call: &ApiCall) -> ApiResult<Value> {
        let request_id = call
            .request
            .headers
            .get(REQUEST_ID_HEADER)
            .cloned()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let request = call
            .request
            .clone()
            .with_header(REQUEST_ID_HEADER, request_id.as_str());

        let mut state = DispatchState::Sent {
            token: self.lifecycle.current_access_token(),
        };

        let result = loop {
            state = match state {
                DispatchState::Sent { token } => {
                    let response = self.send(&request, token.as_deref()).await;
                    if response.status == StatusCategory::AuthRejected {
                        tracing::debug!(request_id = %request_id, "Credential rejected, awaiting refresh");
                        DispatchState::AwaitingRefresh { rejected: token }
                    } else {
                        DispatchState::Done(response.into_result())
                    }
                }
                DispatchState::AwaitingRefresh { rejected } => {
                    match self.lifecycle.refresh_rejected(rejected.as_deref()).await {
                        Ok(token) => DispatchState::Replayed { token },
                        Err(e) => {
                            tracing::debug!(request_id = %request_id, "Refresh failed, not replaying: {}", e);
                            DispatchState::Done(Err(e))
                        }
                    }
                }
                DispatchState::Replayed { token } => {
                    tracing::debug!(request_id = %request_id, "Replaying with refreshed credential");
                    let response = self.send(&request, Some(&token)).await;
                    if response.status == StatusCategory::AuthRejected {
                        tracing::warn!(
                            "{} {} rejected after refresh",
                            request.method,
                            request.path
                        );
                    }
                    DispatchState::Done(response.into_result())
                }
                DispatchState::Done(result) => break result,
            };
        };

        let body = result?;
        if let Some(mutation) = &call.mutation {
            self.coordinator.on_mutation(mutation, &body);
        }
        Ok(body)
    }

    async fn send(&self, request: &ApiRequest, token: Option<&str>) -> TransportResponse {
        let mut request = request.clone();
        if let Some(token) = token {
            request.set_bearer(token);
        }
        tracing::debug!("{} {}", request.method, request.path);
        self.transport.send(&request).await
    }
}
