//! Provider registry
//!
//! Explicit `name -> factory` table built by the composition root. No global
//! state: the binary (or an embedder) owns the registry and asks it for one
//! provider at startup.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use super::{GitHubProvider, GitLabProvider, GoogleProvider, OidcProvider, Provider};
use super::{github, gitlab, google, oidc};
use crate::config::ProviderConfig;
use crate::metrics::AuthMetrics;
use crate::{Error, Result};

/// Builds a provider from its configuration. Must not do network I/O.
pub type ProviderFactory = fn(&ProviderConfig, Arc<dyn AuthMetrics>) -> Result<Arc<dyn Provider>>;

/// Table of known provider factories
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<String, ProviderFactory>,
}

fn google_factory(config: &ProviderConfig, metrics: Arc<dyn AuthMetrics>) -> Result<Arc<dyn Provider>> {
    Ok(Arc::new(GoogleProvider::new(config, metrics)?))
}

fn github_factory(config: &ProviderConfig, metrics: Arc<dyn AuthMetrics>) -> Result<Arc<dyn Provider>> {
    Ok(Arc::new(GitHubProvider::new(config, metrics)?))
}

fn gitlab_factory(config: &ProviderConfig, metrics: Arc<dyn AuthMetrics>) -> Result<Arc<dyn Provider>> {
    Ok(Arc::new(GitLabProvider::new(config, metrics)?))
}

fn oidc_factory(config: &ProviderConfig, metrics: Arc<dyn AuthMetrics>) -> Result<Arc<dyn Provider>> {
    Ok(Arc::new(OidcProvider::new(config, metrics)?))
}

impl ProviderRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in backends (`google`, `github`, `gitlab`,
    /// `oidc`).
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(google::NAME, google_factory);
        registry.register(github::NAME, github_factory);
        registry.register(gitlab::NAME, gitlab_factory);
        registry.register(oidc::NAME, oidc_factory);
        registry
    }

    /// Register (or replace) a factory under `name`.
    pub fn register(&mut self, name: &str, factory: ProviderFactory) -> &mut Self {
        self.factories.insert(name.to_ascii_lowercase(), factory);
        self
    }

    /// Registered names, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Whether `name` is registered
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(&name.to_ascii_lowercase())
    }

    /// Build the provider named by `config.provider`.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] for an unknown name or whatever the backend's
    /// constructor rejects.
    pub fn new_provider(&self, config: &ProviderConfig, metrics: Arc<dyn AuthMetrics>) -> Result<Arc<dyn Provider>> {
        let name = config.provider.trim().to_ascii_lowercase();
        let factory = self.factories.get(&name).ok_or_else(|| {
            Error::Config(format!(
                "unknown provider '{name}' (known: {})",
                self.names().collect::<Vec<_>>().join(", ")
            ))
        })?;

        let provider = factory(config, metrics)?;
        info!(
            provider = provider.name(),
            whitelist = config.users_whitelist.len(),
            "Identity provider configured"
        );
        Ok(provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::NoopMetrics;

    #[test]
    fn builtin_names() {
        let registry = ProviderRegistry::with_builtin();
        assert_eq!(
            registry.names().collect::<Vec<_>>(),
            vec!["github", "gitlab", "google", "oidc"]
        );
        assert!(registry.contains("Google"));
    }

    #[test]
    fn unknown_provider_is_config_error() {
        let config = ProviderConfig {
            provider: "myspace".into(),
            ..Default::default()
        };
        let err = ProviderRegistry::with_builtin()
            .new_provider(&config, Arc::new(NoopMetrics))
            .err()
            .unwrap();
        assert!(err.is_config());
        assert!(err.to_string().contains("myspace"));
    }

    #[test]
    fn empty_registry_knows_nothing() {
        let config = ProviderConfig::default();
        assert!(
            ProviderRegistry::new()
                .new_provider(&config, Arc::new(NoopMetrics))
                .is_err()
        );
    }
}
