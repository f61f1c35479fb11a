//! Configuration management

use std::{collections::HashMap, env, fmt, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    /// Variables are set into the process environment for `${VAR}` resolution.
    pub env_files: Vec<String>,
    /// Logging configuration
    pub log: LogConfig,
    /// Identity provider configuration
    pub auth: ProviderConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter when `RUST_LOG` is unset (trace, debug, info, warn, error)
    pub level: String,
    /// Output format (`text` or `json`)
    pub format: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: None,
        }
    }
}

/// Identity provider configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Registry name of the backend (`google`, `github`, `gitlab`, `oidc`)
    pub provider: String,
    /// OAuth client identifier
    pub oauth_client_id: String,
    /// OAuth client secret
    pub oauth_client_secret: String,
    /// Redirect URL registered with the backend
    pub oauth_callback_url: String,
    /// Backend-specific options (`domain`, `organization`, `group`, ...)
    pub provider_opts: HashMap<String, String>,
    /// Explicit allow-list of identities
    pub users_whitelist: Vec<String>,
    /// Timeout for each outbound HTTP request
    #[serde(with = "humantime_serde")]
    pub http_timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider: "google".to_string(),
            oauth_client_id: String::new(),
            oauth_client_secret: String::new(),
            oauth_callback_url: String::new(),
            provider_opts: HashMap::new(),
            users_whitelist: Vec::new(),
            http_timeout: Duration::from_secs(10),
        }
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("provider", &self.provider)
            .field("oauth_client_id", &self.oauth_client_id)
            .field("oauth_client_secret", &"[redacted]")
            .field("oauth_callback_url", &self.oauth_callback_url)
            .field("provider_opts", &self.provider_opts)
            .field("users_whitelist", &self.users_whitelist)
            .field("http_timeout", &self.http_timeout)
            .finish()
    }
}

impl ProviderConfig {
    /// A provider option, trimmed; blank values count as absent.
    pub fn option(&self, key: &str) -> Option<&str> {
        self.provider_opts
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Check the OAuth client credentials are present and the callback URL
    /// parses.
    pub fn validate_credentials(&self) -> Result<()> {
        if self.oauth_client_id.trim().is_empty() {
            return Err(Error::Config("oauth_client_id must be set".to_string()));
        }
        if self.oauth_client_secret.trim().is_empty() {
            return Err(Error::Config("oauth_client_secret must be set".to_string()));
        }
        if self.oauth_callback_url.trim().is_empty() {
            return Err(Error::Config("oauth_callback_url must be set".to_string()));
        }
        url::Url::parse(&self.oauth_callback_url)
            .map_err(|e| Error::Config(format!("Invalid oauth_callback_url: {e}")))?;
        Ok(())
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        // Load from file if provided
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (IDP_GATE_ prefix)
        figment = figment.merge(Env::prefixed("IDP_GATE_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Load env files into process environment (before env var expansion)
        config.load_env_files();

        // Expand ${VAR} in credentials
        config.expand_env_vars()?;

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in config values
    fn expand_env_vars(&mut self) -> Result<()> {
        // Pattern: ${VAR} or ${VAR:-default}
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}")
            .map_err(|e| Error::Internal(format!("Invalid env pattern: {e}")))?;

        let auth = &mut self.auth;
        for value in [
            &mut auth.oauth_client_id,
            &mut auth.oauth_client_secret,
            &mut auth.oauth_callback_url,
        ] {
            *value = Self::expand_string(&re, value);
        }
        for value in auth.provider_opts.values_mut() {
            *value = Self::expand_string(&re, value);
        }
        Ok(())
    }

    /// Expand environment variables in a string
    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s", "250ms")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// YAML and env values arrive as either an integer or a string
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }

    /// Deserialize a bare number of seconds or a human-readable duration
    /// string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the value cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(s) => parse(&s).map_err(serde::de::Error::custom),
        }
    }

    /// Parse "30s", "5m", "100ms" or a bare number of seconds.
    pub(crate) fn parse(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        let invalid = |e: std::num::ParseIntError| format!("invalid duration {s:?}: {e}");
        // "ms" must be checked before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>().map(Duration::from_millis).map_err(invalid)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>().map(Duration::from_secs).map_err(invalid)
        } else if let Some(mins) = s.strip_suffix('m') {
            let mins = mins.parse::<u64>().map_err(invalid)?;
            mins.checked_mul(60)
                .map(Duration::from_secs)
                .ok_or_else(|| format!("duration {s:?} is too large"))
        } else {
            // Assume seconds
            s.parse::<u64>().map(Duration::from_secs).map_err(invalid)
        }
    }
}
