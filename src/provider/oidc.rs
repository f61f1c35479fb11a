//! Generic OpenID Connect provider for any IdP exposing RFC 7662 token
//! introspection (Keycloak, Okta, Dex, Authentik, ...).
//!
//! Endpoints are configured explicitly; there is no discovery. The domain
//! check compares a userinfo claim (`domain_claim`, default `hd`) with the
//! `domain` option. The `email` claim is ignored when `email_verified` is
//! false, since self-registering IdPs let users claim any address.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use serde_json::Value;
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
pub const NAME: &str = "oidc";

const DEFAULT_SCOPES: &str = "openid email profile";
const DEFAULT_DOMAIN_CLAIM: &str = "hd";

/// RFC 7662 introspection response
#[derive(Debug, Deserialize)]
struct Introspection {
    #[serde(default)]
    active: bool,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    aud: Option<Audience>,
}

/// `aud` is either a single string or an array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Introspection {
    fn into_confirmation(self) -> Confirmation {
        let mut audiences: Vec<String> = self.client_id.into_iter().collect();
        match self.aud {
            Some(Audience::One(a)) => audiences.push(a),
            Some(Audience::Many(all)) => audiences.extend(all),
            None => {}
        }
        Confirmation {
            active: self.active,
            audiences,
        }
    }
}

/// Generic OIDC identity provider
pub struct OidcProvider {
    oauth: OAuthClient,
    userinfo_url: Url,
    introspection_url: Url,
    revocation_url: Option<Url>,
    domain_claim: String,
    policy: AccessPolicy,
    metrics: Arc<dyn AuthMetrics>,
}

fn required<'a>(config: &'a ProviderConfig, key: &str) -> Result<&'a str> {
    config
        .option(key)
        .ok_or_else(|| Error::Config(format!("oidc provider requires the '{key}' option")))
}

impl OidcProvider {
    /// Create a provider from configuration.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if an endpoint option is missing or invalid, or if
    /// neither `domain` nor a whitelist is configured.
    pub fn new(config: &ProviderConfig, metrics: Arc<dyn AuthMetrics>) -> Result<Self> {
        let policy = AccessPolicy::new(
            AllowList::new(&config.users_whitelist),
            config.option("domain").map(str::to_string),
        );
        if !policy.is_constrained() {
            return Err(Error::Config(
                "either OIDC domain or users whitelist must be specified".to_string(),
            ));
        }

        let scopes: Vec<&str> = config
            .option("scopes")
            .unwrap_or(DEFAULT_SCOPES)
            .split([' ', ','])
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            oauth: OAuthClient::new(
                config,
                required(config, "auth_url")?,
                required(config, "token_url")?,
                &scopes,
            )?,
            userinfo_url: parse_url("userinfo_url", required(config, "userinfo_url")?)?,
            introspection_url: parse_url("introspection_url", required(config, "introspection_url")?)?,
            revocation_url: config
                .option("revocation_url")
                .map(|u| parse_url("revocation_url", u))
                .transpose()?,
            domain_claim: config
                .option("domain_claim")
                .unwrap_or(DEFAULT_DOMAIN_CLAIM)
                .to_string(),
            policy,
            metrics,
        })
    }

    /// Required domain, if any
    pub fn domain(&self) -> Option<&str> {
        self.policy.required_domain.as_deref()
    }
}

fn claim(claims: &HashMap<String, Value>, name: &str) -> Option<String> {
    claims
        .get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// `email_verified` is explicitly false (some IdPs send it as a string)
fn email_unverified(claims: &HashMap<String, Value>) -> bool {
    match claims.get("email_verified") {
        Some(Value::Bool(verified)) => !verified,
        Some(Value::String(verified)) => verified.eq_ignore_ascii_case("false"),
        _ => false,
    }
}

#[async_trait]
impl Backend for OidcProvider {
    async fn confirm(&self, ctx: &Context, token: &Token) -> Result<Confirmation> {
        let request = self
            .oauth
            .basic_auth(self.oauth.http().post(self.introspection_url.clone()))
            .header(ACCEPT, "application/json")
            .form(&[
                ("token", token.access_token.as_str()),
                ("token_type_hint", "access_token"),
            ]);
        let introspection: Introspection = send_json(ctx, request).await?;
        Ok(introspection.into_confirmation())
    }

    async fn lookup_identity(&self, ctx: &Context, token: &Token) -> Result<Identity> {
        let claims: HashMap<String, Value> = self
            .oauth
            .get_json(ctx, self.userinfo_url.clone(), token)
            .await?;
        let email = if email_unverified(&claims) {
            debug!(provider = NAME, "Ignoring unverified email");
            String::new()
        } else {
            claim(&claims, "email").unwrap_or_default()
        };
        Ok(Identity::new(email, claim(&claims, &self.domain_claim)))
    }
}

#[async_trait]
impl Provider for OidcProvider {
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
        let Some(url) = &self.revocation_url else {
            return Err(Error::Revoke("no revocation_url configured".to_string()));
        };
        self.oauth.revoke_token(ctx, url, token, true).await
    }

    async fn email(&self, ctx: &Context, token: &Token) -> String {
        validation::email_or_empty(NAME, self, ctx, token).await
    }
}
