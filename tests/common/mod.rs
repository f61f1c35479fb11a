//! Shared fixtures for the backend integration tests
#![allow(dead_code)]

use std::sync::Arc;

use idp_gate::config::ProviderConfig;
use idp_gate::metrics::{AuthMetrics, InMemoryMetrics};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const CLIENT_ID: &str = "client-123";
pub const CLIENT_SECRET: &str = "s3cret";
pub const CALLBACK: &str = "https://ca.example.com/auth/callback";

/// Provider config with credentials filled in
pub fn provider_config(provider: &str, opts: &[(&str, &str)], whitelist: &[&str]) -> ProviderConfig {
    ProviderConfig {
        provider: provider.to_string(),
        oauth_client_id: CLIENT_ID.to_string(),
        oauth_client_secret: CLIENT_SECRET.to_string(),
        oauth_callback_url: CALLBACK.to_string(),
        provider_opts: opts
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect(),
        users_whitelist: whitelist.iter().map(|s| (*s).to_string()).collect(),
        ..Default::default()
    }
}

/// In-memory metrics plus the trait object handed to providers
pub fn metrics() -> (Arc<InMemoryMetrics>, Arc<dyn AuthMetrics>) {
    let metrics = Arc::new(InMemoryMetrics::new());
    let sink: Arc<dyn AuthMetrics> = metrics.clone();
    (metrics, sink)
}

/// Mount a standard token endpoint at `token_path`
pub async fn mount_token_endpoint(server: &MockServer, token_path: &str, access_token: &str) {
    Mock::given(method("POST"))
        .and(path(token_path))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": access_token,
            "token_type": "Bearer",
            "expires_in": 3599,
            "scope": "email profile"
        })))
        .mount(server)
        .await;
}
