//! Token lifecycle management with single-flight refresh
//!
//! [`TokenLifecycle`] is the sole writer of the [`CredentialStore`]. It
//! answers two questions for the request pipeline:
//!
//! - [`TokenLifecycle::current_access_token`] -- "give me a usable access
//!   credential" (a non-blocking read).
//! - [`TokenLifecycle::refresh`] / [`TokenLifecycle::refresh_rejected`] --
//!   "the credential was rejected, get me a new one".
//!
//! # Single-flight
//!
//! At most one refresh round trip is in flight per session. The first caller
//! to observe a rejection installs a *refresh ticket*: a
//! [`futures::future::Shared`] future performing the exchange, driven by a
//! spawned task so it completes even if that caller is cancelled. Every later
//! caller clones the ticket and awaits the same outcome. The ticket removes
//! itself from the slot as soon as it resolves, success or failure, so a
//! later rejection can start a fresh refresh.
//!
//! # Termination
//!
//! A failed refresh (no refresh token, non-success status, malformed
//! response, network failure) clears the store and emits exactly one
//! [`SessionEvent::Terminated`]. A [`logout`](TokenLifecycle::logout) while a
//! ticket is live cancels it: every parked caller resolves with
//! [`ApiError::SessionTerminated`] instead of replaying its call.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::error::{ApiError, ApiResult};
use crate::session::credentials::{CredentialPair, CredentialStore, ReplaceOutcome};
use crate::transport::{ApiRequest, Transport};

/// Capacity of the session event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Reason attached to calls abandoned by a logout.
const SESSION_ENDED: &str = "session ended";

/// Session lifecycle notifications consumed by the UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A login stored a new credential pair.
    Started,
    /// A refresh replaced the credential pair.
    Refreshed,
    /// The refresh exchange failed; the user must re-authenticate.
    Terminated {
        /// Why the refresh failed
        reason: String,
    },
    /// The user logged out.
    LoggedOut,
}

/// Paths of the authentication endpoints, relative to the service base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEndpoints {
    /// `POST {email, password} -> {token, refreshToken}`
    pub login_path: String,
    /// `POST {refreshToken} -> {token, refreshToken}`
    pub refresh_path: String,
}

impl Default for AuthEndpoints {
    fn default() -> Self {
        Self {
            login_path: "/auth/login".to_string(),
            refresh_path: "/auth/refresh-token".to_string(),
        }
    }
}

/// Body of a login or refresh response.
///
/// `refreshToken` is optional on refresh: a server that does not rotate
/// refresh tokens keeps the previous one valid.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default, rename = "refreshToken")]
    refresh_token: Option<String>,
}

impl TokenResponse {
    fn parse(body: &Value) -> Option<Self> {
        let data = body.get("data").filter(|d| d.is_object()).unwrap_or(body);
        serde_json::from_value::<TokenResponse>(data.clone())
            .ok()
            .filter(|r| r.token.as_deref().is_some_and(|t| !t.is_empty()))
    }
}

type RefreshOutcome = ApiResult<String>;

/// The pending refresh: at most one per session.
struct RefreshTicket {
    id: u64,
    initiated_at: DateTime<Utc>,
    cancel: CancellationToken,
    outcome: Shared<BoxFuture<'static, RefreshOutcome>>,
}

struct LifecycleInner {
    transport: Arc<dyn Transport>,
    store: Arc<CredentialStore>,
    endpoints: AuthEndpoints,
    ticket: Mutex<Option<RefreshTicket>>,
    next_ticket_id: AtomicU64,
    refreshes_issued: AtomicU64,
    parked: AtomicUsize,
    events: broadcast::Sender<SessionEvent>,
}

/// Owner of the session's credential state.
///
/// Cheap to clone; clones share the same session.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use workdesk::session::credentials::CredentialStore;
/// use workdesk::session::lifecycle::{AuthEndpoints, TokenLifecycle};
/// use workdesk::transport::http::HttpTransport;
///
/// # async fn example() -> workdesk::error::Result<()> {
/// let transport = Arc::new(HttpTransport::new(
///     url::Url::parse("http://localhost:8080/api")?,
///     Duration::from_secs(30),
/// )?);
/// let lifecycle = TokenLifecycle::new(
///     transport,
///     Arc::new(CredentialStore::in_memory()),
///     AuthEndpoints::default(),
/// );
/// lifecycle.login("ada@example.com", "secret").await?;
/// let token = lifecycle.refresh().await?;
/// # let _ = token;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct TokenLifecycle {
    inner: Arc<LifecycleInner>,
}

impl std::fmt::Debug for TokenLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenLifecycle")
            .field("endpoints", &self.inner.endpoints)
            .field("refresh_in_flight", &self.refresh_in_flight())
            .field("refreshes_issued", &self.refreshes_issued())
            .finish_non_exhaustive()
    }
}

impl TokenLifecycle {
    /// Creates a manager over `store`, sending auth exchanges via `transport`.
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<CredentialStore>,
        endpoints: AuthEndpoints,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(LifecycleInner {
                transport,
                store,
                endpoints,
                ticket: Mutex::new(None),
                next_ticket_id: AtomicU64::new(0),
                refreshes_issued: AtomicU64::new(0),
                parked: AtomicUsize::new(0),
                events,
            }),
        }
    }

    /// Returns the current access token without blocking.
    pub fn current_access_token(&self) -> Option<String> {
        self.inner.store.read().map(|pair| pair.access_token)
    }

    /// Returns `true` when a credential pair is present.
    pub fn is_authenticated(&self) -> bool {
        self.inner.store.read().is_some()
    }

    /// Subscribes to session lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Number of refresh exchanges sent over the network so far.
    pub fn refreshes_issued(&self) -> u64 {
        self.inner.refreshes_issued.load(Ordering::SeqCst)
    }

    /// Number of callers currently parked on the live refresh ticket.
    pub fn parked_callers(&self) -> usize {
        self.inner.parked.load(Ordering::SeqCst)
    }

    /// Returns `true` while a refresh round trip is outstanding.
    pub fn refresh_in_flight(&self) -> bool {
        self.lock_ticket().is_some()
    }

    /// When the live refresh ticket was created, if one exists.
    pub fn refresh_started_at(&self) -> Option<DateTime<Utc>> {
        self.lock_ticket().as_ref().map(|t| t.initiated_at)
    }

    /// Logs in with email and password and stores the returned pair.
    ///
    /// # Errors
    ///
    /// Returns the classified [`ApiError`] when the server refuses the
    /// credentials, or [`ApiError::Decode`] when the response lacks a token
    /// pair. A failed login leaves existing state untouched.
    pub async fn login(&self, email: &str, password: &str) -> ApiResult<CredentialPair> {
        let request = ApiRequest::post(
            &self.inner.endpoints.login_path,
            json!({ "email": email, "password": password }),
        );
        let body = self.inner.transport.send(&request).await.into_result()?;

        let pair = TokenResponse::parse(&body)
            .and_then(|r| Some(CredentialPair::new(r.token?, r.refresh_token?)))
            .ok_or_else(|| {
                ApiError::Decode("login response is missing token or refreshToken".to_string())
            })?;

        if let Err(e) = self.inner.store.start_session(pair.clone()) {
            tracing::warn!("Failed to persist credential pair after login: {}", e);
        }
        tracing::info!("Logged in as {}", email);
        let _ = self.inner.events.send(SessionEvent::Started);
        Ok(pair)
    }

    /// Ends the session.
    ///
    /// Clears the credential pair, cancels any live refresh ticket so that
    /// parked callers resolve with "session ended", and emits
    /// [`SessionEvent::LoggedOut`].
    pub fn logout(&self) {
        let ticket = self.lock_ticket().take();
        if let Err(e) = self.inner.store.clear() {
            tracing::warn!("Failed to delete persisted credential pair: {}", e);
        }
        if let Some(ticket) = ticket {
            tracing::debug!("Cancelling refresh ticket {} on logout", ticket.id);
            ticket.cancel.cancel();
        }
        tracing::info!("Logged out");
        let _ = self.inner.events.send(SessionEvent::LoggedOut);
    }

    /// Obtains a new access token, joining the live refresh if there is one.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::SessionTerminated`] when the refresh exchange
    /// fails or the session is ended while waiting. Every caller joined to
    /// the same ticket receives the same error.
    pub async fn refresh(&self) -> ApiResult<String> {
        self.await_ticket(None).await
    }

    /// Obtains a new access token after `rejected` was refused by the server.
    ///
    /// If the credential has already been rotated since `rejected` was
    /// attached (another caller's refresh completed in between), the current
    /// token is returned without a new exchange.
    ///
    /// # Errors
    ///
    /// Same as [`refresh`](Self::refresh).
    pub async fn refresh_rejected(&self, rejected: Option<&str>) -> ApiResult<String> {
        self.await_ticket(Some(rejected)).await
    }

    async fn await_ticket(&self, rejected: Option<Option<&str>>) -> ApiResult<String> {
        let outcome = {
            let mut slot = self.lock_ticket();
            match slot.as_ref() {
                Some(ticket) => {
                    tracing::debug!("Joining refresh ticket {}", ticket.id);
                    ticket.outcome.clone()
                }
                None => {
                    if let Some(rejected) = rejected {
                        if let Some(current) = self.current_access_token() {
                            if Some(current.as_str()) != rejected {
                                tracing::debug!("Credential already rotated; skipping refresh");
                                return Ok(current);
                            }
                        }
                    }
                    let ticket = self.start_ticket();
                    let outcome = ticket.outcome.clone();
                    *slot = Some(ticket);
                    outcome
                }
            }
        };

        self.inner.parked.fetch_add(1, Ordering::SeqCst);
        let result = outcome.await;
        self.inner.parked.fetch_sub(1, Ordering::SeqCst);
        result
    }

    /// Builds a new ticket. Must be called with the ticket slot locked.
    fn start_ticket(&self) -> RefreshTicket {
        let id = self.inner.next_ticket_id.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        let inner = Arc::clone(&self.inner);
        let cancelled = cancel.clone();

        tracing::debug!("Starting refresh ticket {}", id);

        let outcome = async move {
            let result = tokio::select! {
                _ = cancelled.cancelled() => Err(ApiError::session_terminated(SESSION_ENDED)),
                result = inner.exchange() => result,
            };
            inner.finish(id, &result);
            result
        }
        .boxed()
        .shared();

        // Drive the exchange independently of any single caller.
        tokio::spawn(outcome.clone().map(|_| ()));

        RefreshTicket {
            id,
            initiated_at: Utc::now(),
            cancel,
            outcome,
        }
    }

    fn lock_ticket(&self) -> std::sync::MutexGuard<'_, Option<RefreshTicket>> {
        self.inner.lock_ticket()
    }
}

impl LifecycleInner {
    fn lock_ticket(&self) -> std::sync::MutexGuard<'_, Option<RefreshTicket>> {
        match self.ticket.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Performs one refresh round trip and installs the result.
    async fn exchange(&self) -> RefreshOutcome {
        let (pair, generation) = self.store.snapshot();
        let pair = match pair.filter(|p| !p.refresh_token.is_empty()) {
            Some(pair) => pair,
            None => return self.terminate("no refresh token available", generation),
        };

        self.refreshes_issued.fetch_add(1, Ordering::SeqCst);
        let request = ApiRequest::post(
            &self.endpoints.refresh_path,
            json!({ "refreshToken": pair.refresh_token }),
        );
        let new_pair = match self.transport.send(&request).await.into_result() {
            Ok(body) => match TokenResponse::parse(&body) {
                Some(response) => CredentialPair {
                    access_token: response.token.unwrap_or_default(),
                    refresh_token: response.refresh_token.unwrap_or(pair.refresh_token),
                },
                None => {
                    return self.terminate("refresh response is missing the access token", generation)
                }
            },
            Err(e) => return self.terminate(&format!("refresh failed: {}", e), generation),
        };

        match self.store.replace_if_current(new_pair.clone(), generation) {
            Ok(ReplaceOutcome::Replaced) => {}
            Ok(ReplaceOutcome::Superseded) => return self.superseded(),
            Err(e) => tracing::warn!("Failed to persist refreshed credential pair: {}", e),
        }

        tracing::info!("Access token refreshed");
        let _ = self.events.send(SessionEvent::Refreshed);
        Ok(new_pair.access_token)
    }

    /// Ends the session the refresh started from after a terminal failure.
    ///
    /// A session installed by a login while the exchange was in flight is
    /// left alone, and parked callers carry on with its token.
    fn terminate(&self, reason: &str, generation: u64) -> RefreshOutcome {
        match self.store.clear_if_current(generation) {
            Ok(false) => return self.superseded(),
            Ok(true) => {}
            Err(e) => tracing::warn!("Failed to delete persisted credential pair: {}", e),
        }
        tracing::warn!("Session terminated: {}", reason);
        let _ = self.events.send(SessionEvent::Terminated {
            reason: reason.to_string(),
        });
        Err(ApiError::session_terminated(reason))
    }

    /// Outcome of a refresh whose session changed hands mid-flight.
    fn superseded(&self) -> RefreshOutcome {
        match self.store.read() {
            Some(pair) => {
                tracing::debug!("Session replaced during refresh; using the new credential");
                Ok(pair.access_token)
            }
            None => Err(ApiError::session_terminated(SESSION_ENDED)),
        }
    }

    /// Removes ticket `id` from the slot if it is still the live one.
    fn finish(&self, id: u64, result: &RefreshOutcome) {
        let mut slot = self.lock_ticket();
        if slot.as_ref().is_some_and(|t| t.id == id) {
            *slot = None;
        }
        tracing::debug!("Refresh ticket {} resolved (ok: {})", id, result.is_ok());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
