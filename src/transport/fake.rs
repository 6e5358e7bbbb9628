//! In-process fake transport for unit tests
//!
//! [`FakeTransport`] answers every request by calling a scripted handler
//! closure when the request arrives, then holds the response for an optional
//! latency so that concurrent callers pile up behind a slow round trip.
//! Latency can be set per path to pin down interleavings. Every request is recorded so tests can
//! assert exactly what went over the wire and how many times.
//!
//! # Example
//!
//! ```ignore
//! let transport = FakeTransport::new(|request| match request.path.as_str() {
//!     "/tasks" => TransportResponse::ok(json!([])),
//!     _ => TransportResponse::from_status(404, Value::Null),
//! });
//! transport.send(&ApiRequest::get("/tasks")).await;
//! assert_eq!(transport.count_for("/tasks"), 1);
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::transport::{ApiRequest, Transport, TransportResponse};

type Handler = Arc<dyn Fn(&ApiRequest) -> TransportResponse + Send + Sync>;

/// Scripted in-process [`Transport`].
#[derive(Clone)]
pub struct FakeTransport {
    handler: Handler,
    latency: Option<Duration>,
    path_latency: HashMap<String, Duration>,
    sent: Arc<Mutex<Vec<ApiRequest>>>,
}

impl std::fmt::Debug for FakeTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeTransport")
            .field("latency", &self.latency)
            .field("path_latency", &self.path_latency)
            .field("sent", &self.sent_count())
            .finish_non_exhaustive()
    }
}

impl FakeTransport {
    /// Creates a fake answering every request with `handler`.
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&ApiRequest) -> TransportResponse + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            latency: None,
            path_latency: HashMap::new(),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Delays every response by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Delays responses to `path` by `latency`, overriding the default.
    pub fn with_path_latency(mut self, path: impl Into<String>, latency: Duration) -> Self {
        self.path_latency.insert(path.into(), latency);
        self
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    /// Number of requests received so far.
    pub fn sent_count(&self) -> usize {
        self.sent.lock().map(|sent| sent.len()).unwrap_or_default()
    }

    /// Number of requests received for `path`.
    pub fn count_for(&self, path: &str) -> usize {
        self.requests().iter().filter(|r| r.path == path).count()
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn send(&self, request: &ApiRequest) -> TransportResponse {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(request.clone());
        }
        let response = (self.handler)(request);
        let latency = self
            .path_latency
            .get(&request.path)
            .copied()
            .or(self.latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[tokio::test]
    async fn test_fake_records_requests_in_order() {
        let transport = FakeTransport::new(|_| TransportResponse::ok(Value::Null));
        transport.send(&ApiRequest::get("/tasks")).await;
        transport
            .send(&ApiRequest::post("/leaves", json!({"days": 2})))
            .await;

        let sent = transport.requests();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].path, "/tasks");
        assert_eq!(sent[1].payload, Some(json!({"days": 2})));
        assert_eq!(transport.count_for("/leaves"), 1);
    }

    #[tokio::test]
    async fn test_fake_uses_handler_response() {
        let transport = FakeTransport::new(|request| {
            if request.path == "/missing" {
                TransportResponse::from_status(404, json!({"message": "gone"}))
            } else {
                TransportResponse::ok(json!({"ok": true}))
            }
        });
        let response = transport.send(&ApiRequest::get("/missing")).await;
        assert!(response.into_result().is_err());
    }

    #[tokio::test]
    async fn test_fake_answers_at_arrival_and_delays_per_path() {
        let counter = Arc::new(Mutex::new(0));
        let seen = Arc::clone(&counter);
        let transport = FakeTransport::new(move |_| {
            let mut n = seen.lock().unwrap();
            *n += 1;
            TransportResponse::ok(json!(*n))
        })
        .with_path_latency("/slow", Duration::from_millis(100));

        let slow = transport.clone();
        let pending = tokio::spawn(async move { slow.send(&ApiRequest::get("/slow")).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let fast = transport.send(&ApiRequest::get("/fast")).await;

        assert_eq!(fast.body, json!(2));
        assert_eq!(pending.await.unwrap().body, json!(1));
    }
}
