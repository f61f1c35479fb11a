//! GitHub provider: GitHub accounts, optionally restricted to members of
//! one organization.
//!
//! | Step | Call |
//! |------|------|
//! | re-confirmation + audience | `POST /applications/{client_id}/token` (client basic auth) |
//! | organization | `GET /user/memberships/orgs/{org}` (`state == "active"`) |
//! | email | `GET /user`, then primary verified address from `/user/emails` |
//! | revoke | `DELETE /applications/{client_id}/token` |
//!
//! Options: `organization`, plus `api_url` / `web_url` for GitHub Enterprise
//! Server. Organization logins are case-insensitive on GitHub, so both the
//! configured and the reported login are compared lowercased.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use tracing::info;
use url::Url;

use super::oauth::{OAuthClient, error_message, join_path, parse_url, revoke_error, send_json, send_raw};
use super::validation::{self, Backend, Confirmation};
use super::Provider;
use crate::config::ProviderConfig;
use crate::context::Context;
use crate::metrics::AuthMetrics;
use crate::policy::{AccessPolicy, AllowList, Identity};
use crate::token::Token;
use crate::{Error, Result};

/// Registry name
pub const NAME: &str = "github";

const DEFAULT_WEB_URL: &str = "https://github.com";
const DEFAULT_API_URL: &str = "https://api.github.com";
const SCOPES: [&str; 2] = ["user:email", "read:org"];
const GITHUB_JSON: &str = "application/vnd.github+json";

/// `POST /applications/{client_id}/token` response
#[derive(Debug, Deserialize)]
struct CheckedToken {
    app: App,
}

#[derive(Debug, Deserialize)]
struct App {
    #[serde(default)]
    client_id: String,
}

#[derive(Debug, Deserialize)]
struct User {
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserEmail {
    email: String,
    #[serde(default)]
    primary: bool,
    #[serde(default)]
    verified: bool,
}

#[derive(Debug, Deserialize)]
struct Membership {
    #[serde(default)]
    state: String,
    organization: Organization,
}

#[derive(Debug, Deserialize)]
struct Organization {
    login: String,
}

/// GitHub identity provider
pub struct GitHubProvider {
    oauth: OAuthClient,
    api_url: Url,
    policy: AccessPolicy,
    metrics: Arc<dyn AuthMetrics>,
}

impl GitHubProvider {
    /// Create a provider from configuration.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if neither the `organization` option nor a whitelist
    /// is configured, or a URL/credential is invalid.
    pub fn new(config: &ProviderConfig, metrics: Arc<dyn AuthMetrics>) -> Result<Self> {
        let policy = AccessPolicy::new(
            AllowList::new(&config.users_whitelist),
            config.option("organization").map(str::to_ascii_lowercase),
        );
        if !policy.is_constrained() {
            return Err(Error::Config(
                "either GitHub organization or users whitelist must be specified".to_string(),
            ));
        }

        let web_url = config
            .option("web_url")
            .unwrap_or(DEFAULT_WEB_URL)
            .trim_end_matches('/');
        let api_url = parse_url("api_url", config.option("api_url").unwrap_or(DEFAULT_API_URL))?;

        Ok(Self {
            oauth: OAuthClient::new(
                config,
                &format!("{web_url}/login/oauth/authorize"),
                &format!("{web_url}/login/oauth/access_token"),
                &SCOPES,
            )?,
            api_url,
            policy,
            metrics,
        })
    }

    /// Required organization, if any
    pub fn organization(&self) -> Option<&str> {
        self.policy.required_domain.as_deref()
    }

    fn api(&self, segments: &[&str]) -> Result<Url> {
        join_path(&self.api_url, segments)
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, ctx: &Context, segments: &[&str], token: &Token) -> Result<T> {
        let request = self
            .oauth
            .http()
            .get(self.api(segments)?)
            .bearer_auth(&token.access_token)
            .header(ACCEPT, GITHUB_JSON);
        send_json(ctx, request).await
    }

    /// Organization login if the token's owner is an active member.
    async fn active_membership(&self, ctx: &Context, token: &Token, org: &str) -> Result<Option<String>> {
        match self
            .get::<Membership>(ctx, &["user", "memberships", "orgs", org], token)
            .await
        {
            Ok(m) if m.state == "active" => Ok(Some(m.organization.login.to_ascii_lowercase())),
            Ok(_) => Ok(None),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Backend for GitHubProvider {
    async fn confirm(&self, ctx: &Context, token: &Token) -> Result<Confirmation> {
        let url = self.api(&["applications", self.oauth.client_id(), "token"])?;
        let request = self
            .oauth
            .basic_auth(self.oauth.http().post(url))
            .header(ACCEPT, GITHUB_JSON)
            .json(&serde_json::json!({ "access_token": token.access_token }));
        let checked: CheckedToken = send_json(ctx, request).await?;
        Ok(Confirmation::issued_to(checked.app.client_id))
    }

    async fn lookup_identity(&self, ctx: &Context, token: &Token) -> Result<Identity> {
        let email = self.lookup_email(ctx, token).await?;
        let org = match self.organization() {
            Some(org) => self.active_membership(ctx, token, org).await?,
            None => None,
        };
        Ok(Identity::new(email, org))
    }

    async fn lookup_email(&self, ctx: &Context, token: &Token) -> Result<String> {
        let user: User = self.get(ctx, &["user"], token).await?;
        if let Some(email) = user.email.filter(|e| !e.is_empty()) {
            return Ok(email);
        }

        // Public email unset: fall back to the primary verified address
        let emails: Vec<UserEmail> = self.get(ctx, &["user", "emails"], token).await?;
        Ok(emails
            .into_iter()
            .find(|e| e.primary && e.verified)
            .map(|e| e.email)
            .unwrap_or_default())
    }
}

#[async_trait]
impl Provider for GitHubProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    fn start_session(&self, state: &str) -> String {
        if self.organization().is_some() {
            self.oauth.auth_code_url(state, &[("allow_signup", "false")])
        } else {
            self.oauth.auth_code_url(state, &[])
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
        let url = self.api(&["applications", self.oauth.client_id(), "token"])?;
        let request = self
            .oauth
            .basic_auth(self.oauth.http().delete(url))
            .header(ACCEPT, GITHUB_JSON)
            .json(&serde_json::json!({ "access_token": token.access_token }));

        let (status, body) = send_raw(ctx, request).await.map_err(revoke_error)?;
        match status {
            s if s.is_success() => Ok(()),
            // GitHub answers 404 (or 422) for tokens it no longer knows
            StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY => {
                info!(provider = NAME, "Token already invalid at backend");
                Ok(())
            }
            s => Err(Error::Revoke(format!("HTTP {s}: {}", error_message(&body)))),
        }
    }

    async fn email(&self, ctx: &Context, token: &Token) -> String {
        validation::email_or_empty(NAME, self, ctx, token).await
    }
}
