//! Error types for Workdesk
//!
//! This module defines the error types used throughout the crate, using
//! `thiserror` for ergonomic error handling.
//!
//! Two layers exist:
//!
//! - [`ApiError`] is the taxonomy returned by the request pipeline for a
//!   single remote call. It is `Clone` so that one refresh outcome can be
//!   handed to every caller parked on the same refresh.
//! - [`WorkdeskError`] covers application-level failures (configuration,
//!   credential persistence, I/O) and wraps [`ApiError`] when a pipeline
//!   failure bubbles up to the CLI.

use thiserror::Error;

/// Failure of a single call through the request pipeline.
///
/// Only [`ApiError::AuthRejected`] ever triggers the refresh-and-replay path,
/// and only [`ApiError::SessionTerminated`] is accompanied by a change to the
/// shared session state (the credential pair is cleared). Every other variant
/// is propagated to the caller untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The server rejected the access credential (HTTP 401)
    #[error("Authentication rejected: {message}")]
    AuthRejected {
        /// Server-supplied explanation
        message: String,
    },

    /// The refresh exchange failed or the session ended while the call was
    /// waiting on a refresh
    #[error("Session terminated: {reason}")]
    SessionTerminated {
        /// Why the session ended
        reason: String,
    },

    /// The server refused the payload (HTTP 400 / 422)
    #[error("Validation failed ({code}): {message}")]
    ValidationFailed {
        /// HTTP status code
        code: u16,
        /// Server-supplied explanation
        message: String,
    },

    /// The addressed resource does not exist (HTTP 404)
    #[error("Not found: {message}")]
    NotFound {
        /// Server-supplied explanation
        message: String,
    },

    /// The mutation conflicts with current server state (HTTP 409)
    #[error("Conflict: {message}")]
    Conflict {
        /// Server-supplied explanation
        message: String,
    },

    /// Any other 4xx response
    #[error("Client error ({code}): {message}")]
    ClientError {
        /// HTTP status code
        code: u16,
        /// Server-supplied explanation
        message: String,
    },

    /// The server failed to handle the call (HTTP 5xx)
    #[error("Server fault ({code}): {message}")]
    ServerFault {
        /// HTTP status code
        code: u16,
        /// Server-supplied explanation
        message: String,
    },

    /// The call never produced an HTTP response (DNS, connect, timeout)
    #[error("Network failure: {0}")]
    NetworkFailure(String),

    /// A success response whose body could not be interpreted
    #[error("Malformed response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Returns the HTTP status code associated with this error, if any.
    ///
    /// # Examples
    ///
    /// ```
    /// use workdesk::error::ApiError;
    ///
    /// let err = ApiError::NotFound { message: "no such task".to_string() };
    /// assert_eq!(err.code(), Some(404));
    ///
    /// let err = ApiError::NetworkFailure("connection refused".to_string());
    /// assert_eq!(err.code(), None);
    /// ```
    pub fn code(&self) -> Option<u16> {
        match self {
            ApiError::AuthRejected { .. } => Some(401),
            ApiError::ValidationFailed { code, .. }
            | ApiError::ClientError { code, .. }
            | ApiError::ServerFault { code, .. } => Some(*code),
            ApiError::NotFound { .. } => Some(404),
            ApiError::Conflict { .. } => Some(409),
            ApiError::SessionTerminated { .. }
            | ApiError::NetworkFailure(_)
            | ApiError::Decode(_) => None,
        }
    }

    /// Returns `true` when the session is gone and the user must log in again.
    pub fn is_session_terminated(&self) -> bool {
        matches!(self, ApiError::SessionTerminated { .. })
    }

    /// Builds the terminal error used when a session is cleared.
    pub(crate) fn session_terminated(reason: impl Into<String>) -> Self {
        ApiError::SessionTerminated {
            reason: reason.into(),
        }
    }
}

/// Main error type for Workdesk operations
#[derive(Error, Debug)]
pub enum WorkdeskError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credential persistence errors (file or keyring backends)
    #[error("Credential store error: {0}")]
    CredentialStore(String),

    /// Request pipeline errors
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Invalid command-line input (bad filter syntax, unknown resource kind)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Keyring/credential storage errors
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),
}

/// Result type alias for Workdesk operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;

/// Result of a single call through the request pipeline.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
