//! Transport abstraction between the request pipeline and the remote service
//!
//! This module defines the [`Transport`] trait that every outbound call goes
//! through, together with the request/response value types it exchanges.
//! Concrete implementations live in submodules:
//!
//! - [`http::HttpTransport`] -- reqwest-backed HTTP transport.
//! - [`fake::FakeTransport`] -- scripted in-process fake used in tests
//!   (cfg(test) only).
//!
//! # Design
//!
//! The trait is intentionally minimal: a transport accepts an
//! [`ApiRequest`] (method, path, payload, headers) and always answers with a
//! [`TransportResponse`] whose [`StatusCategory`] tells the pipeline what
//! kind of outcome occurred. Network-level failures are a category, not an
//! `Err`, so the dispatcher can classify every outcome in one place.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ApiError, ApiResult};

/// HTTP verb of an outbound call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// Read
    Get,
    /// Create
    Post,
    /// Replace
    Put,
    /// Partial update
    Patch,
    /// Remove
    Delete,
}

impl Method {
    /// Returns the canonical upper-case verb.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single outbound call, exactly as it will be replayed after a refresh.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use workdesk::transport::{ApiRequest, Method};
///
/// let request = ApiRequest::post("/tasks", json!({"title": "Quarterly report"}))
///     .with_header("X-Client", "workdesk");
///
/// assert_eq!(request.method, Method::Post);
/// assert_eq!(request.headers.get("X-Client").map(String::as_str), Some("workdesk"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    /// HTTP verb
    pub method: Method,
    /// Path relative to the service base URL, starting with `/`
    pub path: String,
    /// Query string parameters, in order
    pub query: Vec<(String, String)>,
    /// JSON request body
    pub payload: Option<Value>,
    /// Extra request headers
    pub headers: BTreeMap<String, String>,
}

impl ApiRequest {
    /// Creates a request with no body, query or headers.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            payload: None,
            headers: BTreeMap::new(),
        }
    }

    /// `GET path`
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    /// `POST path` with a JSON body
    pub fn post(path: impl Into<String>, payload: Value) -> Self {
        Self::new(Method::Post, path).with_payload(payload)
    }

    /// `PUT path` with a JSON body
    pub fn put(path: impl Into<String>, payload: Value) -> Self {
        Self::new(Method::Put, path).with_payload(payload)
    }

    /// `PATCH path` with a JSON body
    pub fn patch(path: impl Into<String>, payload: Value) -> Self {
        Self::new(Method::Patch, path).with_payload(payload)
    }

    /// `DELETE path`
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    /// Sets the JSON body.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Appends query parameters.
    pub fn with_query(mut self, query: impl IntoIterator<Item = (String, String)>) -> Self {
        self.query.extend(query);
        self
    }

    /// Sets a header, replacing any previous value.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Inserts an `Authorization: Bearer <token>` header.
    pub fn set_bearer(&mut self, token: &str) {
        self.headers
            .insert("Authorization".to_string(), format!("Bearer {}", token));
    }
}

/// Sub-classification of 4xx responses other than 401.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientErrorKind {
    /// 400 / 422
    Validation,
    /// 404
    NotFound,
    /// 409
    Conflict,
    /// Any other 4xx
    Other,
}

/// Outcome category of a transport round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCategory {
    /// 2xx
    Success,
    /// 401: the access credential was rejected
    AuthRejected,
    /// Other 4xx
    ClientError {
        /// Finer classification
        kind: ClientErrorKind,
        /// HTTP status code
        code: u16,
    },
    /// 5xx (or an unexpected status outside 2xx/4xx)
    ServerError {
        /// HTTP status code
        code: u16,
    },
    /// No HTTP response was received
    NetworkFailure,
}

impl StatusCategory {
    /// Classifies an HTTP status code.
    ///
    /// # Examples
    ///
    /// ```
    /// use workdesk::transport::{ClientErrorKind, StatusCategory};
    ///
    /// assert_eq!(StatusCategory::from_status_code(204), StatusCategory::Success);
    /// assert_eq!(StatusCategory::from_status_code(401), StatusCategory::AuthRejected);
    /// assert_eq!(
    ///     StatusCategory::from_status_code(422),
    ///     StatusCategory::ClientError { kind: ClientErrorKind::Validation, code: 422 }
    /// );
    /// ```
    pub fn from_status_code(code: u16) -> Self {
        match code {
            200..=299 => StatusCategory::Success,
            401 => StatusCategory::AuthRejected,
            400 | 422 => StatusCategory::ClientError {
                kind: ClientErrorKind::Validation,
                code,
            },
            404 => StatusCategory::ClientError {
                kind: ClientErrorKind::NotFound,
                code,
            },
            409 => StatusCategory::ClientError {
                kind: ClientErrorKind::Conflict,
                code,
            },
            402..=499 => StatusCategory::ClientError {
                kind: ClientErrorKind::Other,
                code,
            },
            _ => StatusCategory::ServerError { code },
        }
    }
}

/// What a transport returns for every request.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    /// Outcome category
    pub status: StatusCategory,
    /// Parsed JSON body, `Value::String` for non-JSON text, `Null` when empty
    pub body: Value,
}

impl TransportResponse {
    /// Builds a response from a status code and body.
    pub fn from_status(code: u16, body: Value) -> Self {
        Self {
            status: StatusCategory::from_status_code(code),
            body,
        }
    }

    /// 200 with the given body.
    pub fn ok(body: Value) -> Self {
        Self::from_status(200, body)
    }

    /// A network-level failure carrying a description.
    pub fn network_failure(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCategory::NetworkFailure,
            body: Value::String(detail.into()),
        }
    }

    /// Converts the response into the pipeline's result type.
    ///
    /// The error message is taken from the body's `message` or `error`
    /// field, or from the body itself when it is a plain string.
    ///
    /// # Errors
    ///
    /// Returns the [`ApiError`] variant matching the status category.
    pub fn into_result(self) -> ApiResult<Value> {
        let message = error_message(&self.body);
        match self.status {
            StatusCategory::Success => Ok(self.body),
            StatusCategory::AuthRejected => Err(ApiError::AuthRejected { message }),
            StatusCategory::ClientError { kind, code } => Err(match kind {
                ClientErrorKind::Validation => ApiError::ValidationFailed { code, message },
                ClientErrorKind::NotFound => ApiError::NotFound { message },
                ClientErrorKind::Conflict => ApiError::Conflict { message },
                ClientErrorKind::Other => ApiError::ClientError { code, message },
            }),
            StatusCategory::ServerError { code } => Err(ApiError::ServerFault { code, message }),
            StatusCategory::NetworkFailure => Err(ApiError::NetworkFailure(message)),
        }
    }
}

/// Pulls a human-readable message out of an error body.
fn error_message(body: &Value) -> String {
    match body {
        Value::String(text) => text.clone(),
        Value::Object(map) => ["message", "error", "detail"]
            .iter()
            .find_map(|field| map.get(*field).and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| body.to_string()),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Abstraction over the remote service boundary.
///
/// Implementations must be cheap to share behind an `Arc<dyn Transport>`;
/// the dispatcher and the token lifecycle manager hold the same instance.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Performs one round trip.
    ///
    /// Never fails: every outcome, including a network-level failure, is
    /// reported through [`TransportResponse::status`].
    async fn send(&self, request: &ApiRequest) -> TransportResponse;
}

pub mod http;

#[cfg(test)]
pub mod fake;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_classification_covers_ranges() {
        assert_eq!(StatusCategory::from_status_code(200), StatusCategory::Success);
        assert_eq!(
            StatusCategory::from_status_code(400),
            StatusCategory::ClientError {
                kind: ClientErrorKind::Validation,
                code: 400
            }
        );
        assert_eq!(
            StatusCategory::from_status_code(403),
            StatusCategory::ClientError {
                kind: ClientErrorKind::Other,
                code: 403
            }
        );
        assert_eq!(
            StatusCategory::from_status_code(503),
            StatusCategory::ServerError { code: 503 }
        );
        assert_eq!(
            StatusCategory::from_status_code(302),
            StatusCategory::ServerError { code: 302 }
        );
    }

    #[test]
    fn test_into_result_uses_message_field() {
        let response = TransportResponse::from_status(
            422,
            json!({"message": "startDate must precede endDate", "code": "E_RANGE"}),
        );
        assert_eq!(
            response.into_result(),
            Err(ApiError::ValidationFailed {
                code: 422,
                message: "startDate must precede endDate".to_string()
            })
        );
    }

    #[test]
    fn test_into_result_falls_back_to_error_field() {
        let response = TransportResponse::from_status(404, json!({"error": "Leave not found"}));
        assert_eq!(
            response.into_result(),
            Err(ApiError::NotFound {
                message: "Leave not found".to_string()
            })
        );
    }

    #[test]
    fn test_into_result_network_failure() {
        let response = TransportResponse::network_failure("connection refused");
        assert_eq!(
            response.into_result(),
            Err(ApiError::NetworkFailure("connection refused".to_string()))
        );
    }

    #[test]
    fn test_into_result_success_passes_body_through() {
        let response = TransportResponse::ok(json!({"id": 7}));
        assert_eq!(response.into_result(), Ok(json!({"id": 7})));
    }

    #[test]
    fn test_set_bearer_overwrites_existing_header() {
        let mut request = ApiRequest::get("/tasks").with_header("Authorization", "Bearer old");
        request.set_bearer("new");
        assert_eq!(
            request.headers.get("Authorization").map(String::as_str),
            Some("Bearer new")
        );
    }

    #[test]
    fn test_method_serializes_upper_case() {
        assert_eq!(serde_json::to_string(&Method::Patch).unwrap(), "\"PATCH\"");
        assert_eq!(Method::Delete.to_string(), "DELETE");
    }
}
