use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::MockServer;

use workdesk::session::credentials::CredentialStore;
use workdesk::session::lifecycle::AuthEndpoints;
use workdesk::transport::http::HttpTransport;
use workdesk::WorkdeskClient;

/// Base path the mock service is mounted under.
#[allow(dead_code)]
pub const API: &str = "/api";

/// Builds an `HttpTransport` pointing at the mock server's `/api` root.
#[allow(dead_code)]
pub fn make_transport(server: &MockServer) -> HttpTransport {
    HttpTransport::new(
        url::Url::parse(&format!("{}{}", server.uri(), API)).expect("valid url"),
        Duration::from_secs(5),
    )
    .expect("http client")
}

/// Builds a client against the mock server over `store`.
#[allow(dead_code)]
pub fn make_client(server: &MockServer, store: Arc<CredentialStore>) -> WorkdeskClient {
    WorkdeskClient::with_transport(
        Arc::new(make_transport(server)),
        store,
        AuthEndpoints::default(),
        None,
    )
}

/// A login/refresh response body.
#[allow(dead_code)]
pub fn token_body(access: &str, refresh: &str) -> Value {
    json!({ "token": access, "refreshToken": refresh })
}

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}
