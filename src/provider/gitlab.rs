//! GitLab provider (gitlab.com or self-managed), optionally restricted to
//! members of one group.
//!
//! Re-confirmation goes through `/oauth/token/info`, whose
//! `application.uid` is the client id the token was issued to. Group
//! membership is resolved with the user's own token: the group's
//! `full_path` is what gets compared, so a configured `infra/sre` only
//! matches that exact subgroup.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use super::oauth::{OAuthClient, join_path, parse_url};
use super::validation::{self, Backend, Confirmation};
use super::Provider;
use crate::config::ProviderConfig;
use crate::context::Context;
use crate::metrics::AuthMetrics;
use crate::policy::{AccessPolicy, AllowList, Identity};
use crate::token::Token;
use crate::{Error, Result};

/// Registry name
pub const NAME: &str = "gitlab";

const DEFAULT_SITE_URL: &str = "https://gitlab.com";
const SCOPES: [&str; 2] = ["read_user", "read_api"];

#[derive(Debug, Deserialize)]
struct TokenInfo {
    #[serde(default)]
    application: Option<Application>,
}

#[derive(Debug, Deserialize)]
struct Application {
    #[serde(default)]
    uid: String,
}

#[derive(Debug, Deserialize)]
struct User {
    id: u64,
    #[serde(default)]
    email: String,
}

#[derive(Debug, Deserialize)]
struct Group {
    id: u64,
    full_path: String,
}

#[derive(Debug, Deserialize)]
struct Member {
    #[serde(default)]
    state: Option<String>,
}

/// GitLab identity provider
pub struct GitLabProvider {
    oauth: OAuthClient,
    site_url: Url,
    policy: AccessPolicy,
    metrics: Arc<dyn AuthMetrics>,
}

impl GitLabProvider {
    /// Create a provider from configuration.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if neither the `group` option nor a whitelist is
    /// configured, or `siteurl`/credentials are invalid.
    pub fn new(config: &ProviderConfig, metrics: Arc<dyn AuthMetrics>) -> Result<Self> {
        let policy = AccessPolicy::new(
            AllowList::new(&config.users_whitelist),
            config
                .option("group")
                .map(|g| g.trim_matches('/').to_string()),
        );
        if !policy.is_constrained() {
            return Err(Error::Config(
                "either GitLab group or users whitelist must be specified".to_string(),
            ));
        }

        let site_url = parse_url("siteurl", config.option("siteurl").unwrap_or(DEFAULT_SITE_URL))?;
        let auth_url = join_path(&site_url, &["oauth", "authorize"])?;
        let token_url = join_path(&site_url, &["oauth", "token"])?;

        Ok(Self {
            oauth: OAuthClient::new(config, auth_url.as_str(), token_url.as_str(), &SCOPES)?,
            site_url,
            policy,
            metrics,
        })
    }

    /// Required group path, if any
    pub fn group(&self) -> Option<&str> {
        self.policy.required_domain.as_deref()
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        join_path(&self.site_url, segments)
    }

    async fn current_user(&self, ctx: &Context, token: &Token) -> Result<User> {
        self.oauth
            .get_json(ctx, self.url(&["api", "v4", "user"])?, token)
            .await
    }

    /// Group `full_path` if `user_id` is a member, direct or inherited.
    async fn membership(&self, ctx: &Context, token: &Token, group: &str, user_id: u64) -> Result<Option<String>> {
        let group: Group = match self
            .oauth
            .get_json(ctx, self.url(&["api", "v4", "groups", group])?, token)
            .await
        {
            Ok(g) => g,
            // Invisible to this user
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };

        let group_id = group.id.to_string();
        let user_id = user_id.to_string();
        let url = self.url(&["api", "v4", "groups", group_id.as_str(), "members", "all", user_id.as_str()])?;
        match self.oauth.get_json::<Member>(ctx, url, token).await {
            Ok(m) if m.state.as_deref().is_none_or(|s| s == "active") => Ok(Some(group.full_path)),
            Ok(_) => Ok(None),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Backend for GitLabProvider {
    async fn confirm(&self, ctx: &Context, token: &Token) -> Result<Confirmation> {
        let info: TokenInfo = self
            .oauth
            .get_json(ctx, self.url(&["oauth", "token", "info"])?, token)
            .await?;
        let uid = info.application.map(|a| a.uid).unwrap_or_default();
        Ok(Confirmation::issued_to(uid))
    }

    async fn lookup_identity(&self, ctx: &Context, token: &Token) -> Result<Identity> {
        let user = self.current_user(ctx, token).await?;
        let group = match self.group() {
            Some(group) => self.membership(ctx, token, group, user.id).await?,
            None => None,
        };
        Ok(Identity::new(user.email, group))
    }

    async fn lookup_email(&self, ctx: &Context, token: &Token) -> Result<String> {
        Ok(self.current_user(ctx, token).await?.email)
    }
}

#[async_trait]
impl Provider for GitLabProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    fn start_session(&self, state: &str) -> String {
        self.oauth.auth_code_url(state, &[])
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
        let url = self.url(&["oauth", "revoke"])?;
        self.oauth.revoke_token(ctx, &url, token, true).await
    }

    async fn email(&self, ctx: &Context, token: &Token) -> String {
        validation::email_or_empty(NAME, self, ctx, token).await
    }
}
