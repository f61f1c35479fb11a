//! Google provider: Google accounts, optionally restricted to one Google
//! Workspace domain.
//!
//! | Step | Call |
//! |------|------|
//! | re-confirmation + audience | `tokeninfo` (`audience` / `aud`) |
//! | domain | `userinfo` `hd` claim |
//! | email | `userinfo` `email` |
//! | revoke | `oauth2.googleapis.com/revoke` |
//!
//! The `hd` authorization parameter only streamlines Google's account
//! picker; the `hd` claim from `userinfo` is what gets checked. An address
//! Google reports as unverified (`verified_email: false`) is never used.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::oauth::{OAuthClient, parse_url, send_json};
use super::validation::{self, Backend, Confirmation};
use super::Provider;
use crate::config::ProviderConfig;
use crate::context::Context;
use crate::metrics::AuthMetrics;
use crate::policy::{AccessPolicy, AllowList, Identity};
use crate::token::Token;
use crate::{Error, Result};

/// Registry name
pub const NAME: &str = "google";

const SCOPES: [&str; 2] = [
    "https://www.googleapis.com/auth/userinfo.email",
    "https://www.googleapis.com/auth/userinfo.profile",
];

/// Google endpoints. Overridable for emulators and tests.
#[derive(Debug, Clone)]
pub struct GoogleEndpoints {
    /// Authorization endpoint
    pub auth_url: String,
    /// Token endpoint
    pub token_url: String,
    /// Token introspection (`tokeninfo`)
    pub tokeninfo_url: String,
    /// User profile (`userinfo`)
    pub userinfo_url: String,
    /// Revocation endpoint
    pub revoke_url: String,
}

impl Default for GoogleEndpoints {
    fn default() -> Self {
        Self {
            auth_url: "https://accounts.google.com/o/oauth2/auth".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            tokeninfo_url: "https://www.googleapis.com/oauth2/v2/tokeninfo".to_string(),
            userinfo_url: "https://www.googleapis.com/oauth2/v2/userinfo".to_string(),
            revoke_url: "https://oauth2.googleapis.com/revoke".to_string(),
        }
    }
}

impl GoogleEndpoints {
    /// All endpoints under one base URL (`/auth`, `/token`, `/tokeninfo`,
    /// `/userinfo`, `/revoke`).
    pub fn with_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            auth_url: format!("{base}/auth"),
            token_url: format!("{base}/token"),
            tokeninfo_url: format!("{base}/tokeninfo"),
            userinfo_url: format!("{base}/userinfo"),
            revoke_url: format!("{base}/revoke"),
        }
    }
}

/// `tokeninfo` response (v2 `audience`, v3 `aud`)
#[derive(Debug, Deserialize)]
struct TokenInfo {
    #[serde(default, alias = "aud")]
    audience: String,
    #[serde(default)]
    issued_to: String,
}

/// `userinfo` response
#[derive(Debug, Deserialize)]
struct UserInfo {
    #[serde(default)]
    email: String,
    #[serde(default)]
    verified_email: Option<bool>,
    /// Hosted domain (Google Workspace)
    #[serde(default)]
    hd: Option<String>,
}

impl UserInfo {
    /// Identity with the email blanked when Google says it is unverified
    fn into_identity(self) -> Identity {
        if self.verified_email == Some(false) {
            debug!(provider = NAME, "Ignoring unverified email");
            return Identity::new(String::new(), self.hd);
        }
        Identity::new(self.email, self.hd)
    }
}

/// Google identity provider
pub struct GoogleProvider {
    oauth: OAuthClient,
    tokeninfo_url: Url,
    userinfo_url: Url,
    revoke_url: Url,
    policy: AccessPolicy,
    metrics: Arc<dyn AuthMetrics>,
}

impl GoogleProvider {
    /// Create a provider against Google's public endpoints.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if neither the `domain` option nor a whitelist is
    /// configured, or the OAuth credentials are incomplete.
    pub fn new(config: &ProviderConfig, metrics: Arc<dyn AuthMetrics>) -> Result<Self> {
        Self::with_endpoints(config, metrics, GoogleEndpoints::default())
    }

    /// Create a provider against explicit endpoints.
    pub fn with_endpoints(
        config: &ProviderConfig,
        metrics: Arc<dyn AuthMetrics>,
        endpoints: GoogleEndpoints,
    ) -> Result<Self> {
        let policy = AccessPolicy::new(
            AllowList::new(&config.users_whitelist),
            config.option("domain").map(str::to_string),
        );
        if !policy.is_constrained() {
            return Err(Error::Config(
                "either Google Workspace domain or users whitelist must be specified".to_string(),
            ));
        }

        Ok(Self {
            oauth: OAuthClient::new(config, &endpoints.auth_url, &endpoints.token_url, &SCOPES)?,
            tokeninfo_url: parse_url("tokeninfo_url", &endpoints.tokeninfo_url)?,
            userinfo_url: parse_url("userinfo_url", &endpoints.userinfo_url)?,
            revoke_url: parse_url("revoke_url", &endpoints.revoke_url)?,
            policy,
            metrics,
        })
    }

    /// Required Google Workspace domain, if any
    pub fn domain(&self) -> Option<&str> {
        self.policy.required_domain.as_deref()
    }
}

#[async_trait]
impl Backend for GoogleProvider {
    async fn confirm(&self, ctx: &Context, token: &Token) -> Result<Confirmation> {
        // POST keeps the token out of URLs and access logs
        let request = self
            .oauth
            .http()
            .post(self.tokeninfo_url.clone())
            .header(ACCEPT, "application/json")
            .form(&[("access_token", token.access_token.as_str())]);
        let info: TokenInfo = send_json(ctx, request).await?;

        let audience = if info.audience.is_empty() {
            info.issued_to
        } else {
            info.audience
        };
        Ok(Confirmation::issued_to(audience))
    }

    async fn lookup_identity(&self, ctx: &Context, token: &Token) -> Result<Identity> {
        let info: UserInfo = self
            .oauth
            .get_json(ctx, self.userinfo_url.clone(), token)
            .await?;
        Ok(info.into_identity())
    }
}

#[async_trait]
impl Provider for GoogleProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    fn start_session(&self, state: &str) -> String {
        match self.domain() {
            Some(domain) => self.oauth.auth_code_url(state, &[("hd", domain)]),
            None => self.oauth.auth_code_url(state, &[]),
        }
    }

    async fn exchange(&self, ctx: &Context, code: &str) -> Result<Token> {
        let token = self.oauth.exchange_code(ctx, code).await?;
        self.metrics.increment_exchange(NAME);
        Ok(token)
    }

    async fn valid(&self, ctx: &Context, token: &Token) -> bool {
        validation::validate(
            NAME,
            self,
            self.oauth.client_id(),
            &self.policy,
            self.metrics.as_ref(),
            ctx,
            token,
        )
        .await
    }

    async fn revoke(&self, ctx: &Context, token: &Token) -> Result<()> {
        self.oauth
            .revoke_token(ctx, &self.revoke_url, token, false)
            .await
    }

    async fn email(&self, ctx: &Context, token: &Token) -> String {
        validation::email_or_empty(NAME, self, ctx, token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::NoopMetrics;

    fn config(domain: Option<&str>, whitelist: &[&str]) -> ProviderConfig {
        let mut cfg = ProviderConfig {
            provider: NAME.into(),
            oauth_client_id: "client-123.apps.googleusercontent.com".into(),
            oauth_client_secret: "secret".into(),
            oauth_callback_url: "https://ca.example.com/auth/callback".into(),
            users_whitelist: whitelist.iter().map(|s| (*s).to_string()).collect(),
            ..Default::default()
        };
        if let Some(d) = domain {
            cfg.provider_opts.insert("domain".into(), d.into());
        }
        cfg
    }

    #[test]
    fn requires_domain_or_whitelist() {
        let err = GoogleProvider::new(&config(None, &[]), Arc::new(NoopMetrics))
            .err()
            .unwrap();
        assert!(err.is_config());

        assert!(GoogleProvider::new(&config(Some("example.com"), &[]), Arc::new(NoopMetrics)).is_ok());
        assert!(GoogleProvider::new(&config(None, &["a@b.c"]), Arc::new(NoopMetrics)).is_ok());
    }

    #[test]
    fn start_session_includes_domain_hint() {
        let p = GoogleProvider::new(&config(Some("example.com"), &[]), Arc::new(NoopMetrics)).unwrap();
        let url = Url::parse(&p.start_session("abc")).unwrap();
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert!(url.as_str().starts_with("https://accounts.google.com/o/oauth2/auth?"));
        assert_eq!(pairs["hd"], "example.com");
        assert_eq!(pairs["state"], "abc");
        assert_eq!(pairs["client_id"], "client-123.apps.googleusercontent.com");
        assert!(pairs["scope"].contains("userinfo.email"));
    }

    #[test]
    fn start_session_without_domain_has_no_hint() {
        let p = GoogleProvider::new(&config(None, &["a@b.c"]), Arc::new(NoopMetrics)).unwrap();
        let url = Url::parse(&p.start_session("abc")).unwrap();
        assert!(url.query_pairs().all(|(k, _)| k != "hd"));
    }

    #[test]
    fn unverified_email_is_dropped() {
        let info: UserInfo = serde_json::from_str(
            r#"{"email":"ceo@example.com","verified_email":false,"hd":"example.com"}"#,
        )
        .unwrap();
        let identity = info.into_identity();
        assert_eq!(identity.email, "");
        assert_eq!(identity.domain.as_deref(), Some("example.com"));

        let info: UserInfo = serde_json::from_str(r#"{"email":"alice@example.com"}"#).unwrap();
        assert_eq!(info.into_identity().email, "alice@example.com");
    }

    #[test]
    fn endpoints_with_base() {
        let e = GoogleEndpoints::with_base("http://127.0.0.1:9000/");
        assert_eq!(e.tokeninfo_url, "http://127.0.0.1:9000/tokeninfo");
        assert_eq!(e.revoke_url, "http://127.0.0.1:9000/revoke");
    }
}
