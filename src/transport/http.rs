//! HTTP transport backed by `reqwest`
//!
//! [`HttpTransport`] resolves every [`ApiRequest`] path against a base URL,
//! sends it with a per-request timeout, and classifies the outcome into a
//! [`StatusCategory`]. Bodies are parsed as JSON when possible; non-JSON
//! text is preserved as a JSON string so error messages survive.
//!
//! Connection, DNS and timeout errors never surface as `Err`: they come back
//! as [`StatusCategory::NetworkFailure`] so the dispatcher can propagate them
//! without retrying.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::{Result, WorkdeskError};
use crate::transport::{ApiRequest, Method, Transport, TransportResponse};

/// reqwest-backed [`Transport`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use url::Url;
/// use workdesk::transport::http::HttpTransport;
///
/// let transport = HttpTransport::new(
///     Url::parse("http://localhost:8080/api").unwrap(),
///     Duration::from_secs(30),
/// )
/// .unwrap();
/// assert_eq!(transport.url_for("/tasks"), "http://localhost:8080/api/tasks");
/// ```
#[derive(Debug, Clone)]
pub struct HttpTransport {
    /// Underlying reqwest HTTP client.
    http_client: Arc<reqwest::Client>,
    /// Service base URL; request paths are appended to it.
    base_url: url::Url,
}

impl HttpTransport {
    /// Constructs a new [`HttpTransport`] targeting `base_url`.
    ///
    /// No network I/O is performed at construction time.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Service root, e.g. `https://desk.example.com/api`.
    /// * `timeout` - Per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`WorkdeskError::Config`] if the HTTP client cannot be built
    /// (TLS backend initialisation failure).
    pub fn new(base_url: url::Url, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WorkdeskError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client: Arc::new(http_client),
            base_url,
        })
    }

    /// Returns the absolute URL a request path resolves to.
    pub fn url_for(&self, path: &str) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        if path.starts_with('/') {
            format!("{}{}", base, path)
        } else {
            format!("{}/{}", base, path)
        }
    }
}

fn reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

/// Parses a response body: empty → `Null`, JSON → value, otherwise a string.
fn parse_body(text: String) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ApiRequest) -> TransportResponse {
        let url = self.url_for(&request.path);
        let mut builder = self
            .http_client
            .request(reqwest_method(request.method), &url)
            .header("Accept", "application/json");

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(payload) = &request.payload {
            builder = builder.json(payload);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!("{} {} failed before a response: {}", request.method, url, e);
                return TransportResponse::network_failure(format!(
                    "{} {} failed: {}",
                    request.method, request.path, e
                ));
            }
        };

        let code = response.status().as_u16();
        match response.text().await {
            Ok(text) => TransportResponse::from_status(code, parse_body(text)),
            Err(e) => TransportResponse::network_failure(format!(
                "failed to read response body from {}: {}",
                request.path, e
            )),
        }
    }
}
