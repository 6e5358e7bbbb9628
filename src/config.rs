//! Configuration management for Workdesk
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::error::{Result, WorkdeskError};
use crate::session::credentials::{
    CredentialBackend, FileBackend, KeyringBackend, MemoryBackend,
};
use crate::session::lifecycle::AuthEndpoints;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Main configuration structure for Workdesk
///
/// Holds the service location, how the session is persisted, and how long
/// cached responses are trusted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Backend service settings
    #[serde(default)]
    pub api: ApiConfig,
    /// Session persistence settings
    #[serde(default)]
    pub session: SessionConfig,
    /// Response cache settings
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Backend service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL every request path is joined onto
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Login endpoint path
    #[serde(default = "default_login_path")]
    pub login_path: String,

    /// Refresh-token exchange endpoint path
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
}

fn default_base_url() -> String {
    "http://localhost:8080/api".to_string()
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_login_path() -> String {
    "/auth/login".to_string()
}

fn default_refresh_path() -> String {
    "/auth/refresh-token".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_seconds: default_timeout_seconds(),
            login_path: default_login_path(),
            refresh_path: default_refresh_path(),
        }
    }
}

/// Session persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Where the credential pair is kept: keyring, file or memory
    #[serde(default = "default_session_backend")]
    pub backend: String,

    /// Credential file for the `file` backend
    ///
    /// Defaults to `session.json` in the user's data directory.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    /// Keyring account name for the `keyring` backend
    ///
    /// Defaults to the API host, so sessions against different servers do
    /// not overwrite each other.
    #[serde(default)]
    pub keyring_account: Option<String>,
}

fn default_session_backend() -> String {
    "keyring".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backend: default_session_backend(),
            file_path: None,
            keyring_account: None,
        }
    }
}

/// Response cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Entries older than this are refetched; 0 disables expiry
    #[serde(default = "default_max_age_seconds")]
    pub max_age_seconds: u64,
}

fn default_max_age_seconds() -> u64 {
    300
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_age_seconds: default_max_age_seconds(),
        }
    }
}

const VALID_BACKENDS: [&str; 3] = ["keyring", "file", "memory"];

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Returns
    ///
    /// Returns the loaded and merged configuration
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| WorkdeskError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| WorkdeskError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(base_url) = std::env::var("WORKDESK_API_BASE_URL") {
            self.api.base_url = base_url;
        }

        if let Ok(timeout) = std::env::var("WORKDESK_TIMEOUT_SECONDS") {
            if let Ok(value) = timeout.parse() {
                self.api.timeout_seconds = value;
            } else {
                tracing::warn!("Invalid WORKDESK_TIMEOUT_SECONDS: {}", timeout);
            }
        }

        if let Ok(backend) = std::env::var("WORKDESK_SESSION_BACKEND") {
            let backend = backend.to_lowercase();
            if VALID_BACKENDS.contains(&backend.as_str()) {
                self.session.backend = backend;
            } else {
                tracing::warn!("Invalid session backend: {}, using {}", backend, self.session.backend);
            }
        }

        if let Ok(file) = std::env::var("WORKDESK_SESSION_FILE") {
            self.session.file_path = Some(PathBuf::from(file));
        }

        if let Ok(max_age) = std::env::var("WORKDESK_CACHE_MAX_AGE") {
            if let Ok(value) = max_age.parse() {
                self.cache.max_age_seconds = value;
            } else {
                tracing::warn!("Invalid WORKDESK_CACHE_MAX_AGE: {}", max_age);
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(base_url) = &cli.base_url {
            tracing::debug!("Using base URL override: {}", base_url);
            self.api.base_url = base_url.clone();
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns error if the base URL does not parse as http(s), the timeout
    /// is zero, the session backend is unknown, or an endpoint path does
    /// not start with `/`.
    pub fn validate(&self) -> Result<()> {
        if self.api.base_url.trim().is_empty() {
            return Err(WorkdeskError::Config("api.base_url cannot be empty".to_string()).into());
        }

        let url = self.base_url()?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(WorkdeskError::Config(format!(
                "api.base_url must use http or https, got {}",
                url.scheme()
            ))
            .into());
        }

        if self.api.timeout_seconds == 0 {
            return Err(WorkdeskError::Config(
                "api.timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        for (name, path) in [
            ("api.login_path", &self.api.login_path),
            ("api.refresh_path", &self.api.refresh_path),
        ] {
            if !path.starts_with('/') {
                return Err(
                    WorkdeskError::Config(format!("{} must start with '/': {}", name, path)).into(),
                );
            }
        }

        if !VALID_BACKENDS.contains(&self.session.backend.as_str()) {
            return Err(WorkdeskError::Config(format!(
                "Invalid session backend: {}. Must be one of: {}",
                self.session.backend,
                VALID_BACKENDS.join(", ")
            ))
            .into());
        }

        Ok(())
    }

    /// Parsed API base URL
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the URL does not parse.
    pub fn base_url(&self) -> Result<Url> {
        Url::parse(&self.api.base_url).map_err(|e| {
            WorkdeskError::Config(format!("Invalid api.base_url {}: {}", self.api.base_url, e))
                .into()
        })
    }

    /// Per-request timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_seconds)
    }

    /// Login and refresh endpoint paths
    pub fn auth_endpoints(&self) -> AuthEndpoints {
        AuthEndpoints {
            login_path: self.api.login_path.clone(),
            refresh_path: self.api.refresh_path.clone(),
        }
    }

    /// Maximum age of trusted cache entries, `None` when expiry is off
    pub fn cache_max_age(&self) -> Option<chrono::Duration> {
        match self.cache.max_age_seconds {
            0 => None,
            secs => chrono::Duration::try_seconds(secs as i64),
        }
    }

    /// Credential file used by the `file` backend
    ///
    /// # Errors
    ///
    /// Returns error if no path is configured and the user data directory
    /// cannot be determined.
    pub fn session_file_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.session.file_path {
            return Ok(path.clone());
        }
        let proj_dirs = ProjectDirs::from("com", "workdesk", "workdesk").ok_or_else(|| {
            WorkdeskError::Config("Could not determine data directory".to_string())
        })?;
        Ok(proj_dirs.data_dir().join("session.json"))
    }

    /// Keyring account the session is stored under
    ///
    /// The configured `session.keyring_account`, otherwise the API host
    /// (with its port, when one is set).
    ///
    /// # Errors
    ///
    /// Returns error if the base URL is invalid or has no host.
    pub fn keyring_account(&self) -> Result<String> {
        if let Some(account) = self
            .session
            .keyring_account
            .as_ref()
            .filter(|a| !a.trim().is_empty())
        {
            return Ok(account.clone());
        }
        let url = self.base_url()?;
        let host = url.host_str().ok_or_else(|| {
            WorkdeskError::Config(format!("api.base_url has no host: {}", self.api.base_url))
        })?;
        Ok(match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        })
    }

    /// Builds the configured credential persistence backend
    ///
    /// # Errors
    ///
    /// Returns error if the backend name is unknown or its location cannot
    /// be resolved.
    pub fn credential_backend(&self) -> Result<Arc<dyn CredentialBackend>> {
        match self.session.backend.as_str() {
            "keyring" => Ok(Arc::new(KeyringBackend::new(self.keyring_account()?))),
            "file" => Ok(Arc::new(FileBackend::new(self.session_file_path()?))),
            "memory" => Ok(Arc::new(MemoryBackend::new())),
            other => Err(WorkdeskError::Config(format!("Invalid session backend: {}", other)).into()),
        }
    }
}
