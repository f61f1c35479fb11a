//! Shared OAuth2 client descriptor
//!
//! Holds the client credentials and the two endpoints every backend has
//! (authorization and token), and the HTTP plumbing the backends share:
//! authorization URL building, the code exchange, bearer-authenticated JSON
//! calls and RFC 7009 style revocation.
//!
//! Nothing here ever logs a token, a code or the client secret.

use std::time::Duration;

use reqwest::header::ACCEPT;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};
use url::Url;

use crate::config::ProviderConfig;
use crate::context::Context;
use crate::token::Token;
use crate::{Error, Result};

const USER_AGENT: &str = concat!("idp-gate/", env!("CARGO_PKG_VERSION"));

/// Longest slice of an error body carried into error messages.
const MAX_ERROR_BODY: usize = 200;

/// OAuth token response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    token_type: Option<String>,
    expires_in: Option<u64>,
    refresh_token: Option<String>,
    scope: Option<String>,
    /// Some backends (GitHub) report failures with HTTP 200 and this field
    error: Option<String>,
    error_description: Option<String>,
}

/// Error body shapes seen across backends
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    error_description: Option<String>,
    message: Option<String>,
}

/// OAuth client for one identity backend
pub struct OAuthClient {
    http: Client,
    client_id: String,
    client_secret: String,
    redirect_url: String,
    auth_url: Url,
    token_url: Url,
    scopes: Vec<String>,
}

impl OAuthClient {
    /// Build the client descriptor. No network I/O.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if credentials are missing or an endpoint
    /// does not parse.
    pub fn new(
        config: &ProviderConfig,
        auth_url: &str,
        token_url: &str,
        scopes: &[&str],
    ) -> Result<Self> {
        config.validate_credentials()?;

        Ok(Self {
            http: http_client(config.http_timeout)?,
            client_id: config.oauth_client_id.trim().to_string(),
            client_secret: config.oauth_client_secret.trim().to_string(),
            redirect_url: config.oauth_callback_url.trim().to_string(),
            auth_url: parse_url("auth_url", auth_url)?,
            token_url: parse_url("token_url", token_url)?,
            scopes: scopes.iter().map(|s| (*s).to_string()).collect(),
        })
    }

    /// OAuth client identifier (the expected token audience)
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// HTTP client shared by this backend's calls
    pub fn http(&self) -> &Client {
        &self.http
    }

    /// Attach client credentials as HTTP basic auth
    pub(crate) fn basic_auth(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(&self.client_id, Some(&self.client_secret))
    }

    /// Build the authorization URL for `state` plus backend hints.
    pub fn auth_code_url(&self, state: &str, extra: &[(&str, &str)]) -> String {
        let mut auth_url = self.auth_url.clone();
        {
            let mut params = auth_url.query_pairs_mut();
            params.append_pair("response_type", "code");
            params.append_pair("client_id", &self.client_id);
            params.append_pair("redirect_uri", &self.redirect_url);
            if !self.scopes.is_empty() {
                params.append_pair("scope", &self.scopes.join(" "));
            }
            params.append_pair("state", state);
            for (key, value) in extra {
                params.append_pair(key, value);
            }
        }
        auth_url.to_string()
    }

    /// Exchange an authorization code for a token.
    ///
    /// Codes are single-use; nothing is cached and nothing is retried.
    ///
    /// # Errors
    ///
    /// [`Error::Exchange`] on transport failure, a malformed response or a
    /// backend rejection; [`Error::Cancelled`] / [`Error::DeadlineExceeded`]
    /// if the context ends first.
    pub async fn exchange_code(&self, ctx: &Context, code: &str) -> Result<Token> {
        if code.trim().is_empty() {
            return Err(Error::Exchange("empty authorization code".to_string()));
        }

        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_url.as_str()),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        let request = self
            .http
            .post(self.token_url.clone())
            .header(ACCEPT, "application/json")
            .form(&params);

        let (status, body) = send_raw(ctx, request).await.map_err(|e| match e {
            Error::Cancelled | Error::DeadlineExceeded => e,
            other => Error::Exchange(format!("token request failed: {other}")),
        })?;

        if !status.is_success() {
            return Err(Error::Exchange(format!(
                "HTTP {status}: {}",
                error_message(&body)
            )));
        }

        let token_response: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| Error::Exchange(format!("malformed token response: {e}")))?;

        if let Some(error) = token_response.error {
            let detail = token_response.error_description.unwrap_or_default();
            return Err(Error::Exchange(format!("{error} {detail}").trim_end().to_string()));
        }

        let access_token = token_response
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Exchange("token response carried no access_token".to_string()))?;

        debug!(token_url = %self.token_url, "Exchanged authorization code");

        Ok(Token::from_response(
            access_token,
            token_response.token_type,
            token_response.refresh_token,
            token_response.expires_in,
            token_response.scope,
        ))
    }

    /// GET `url` with the token as bearer credential and decode JSON.
    pub async fn get_json<T: DeserializeOwned>(&self, ctx: &Context, url: Url, token: &Token) -> Result<T> {
        let request = self
            .http
            .get(url)
            .bearer_auth(&token.access_token)
            .header(ACCEPT, "application/json");
        send_json(ctx, request).await
    }

    /// Revoke `token` at an RFC 7009 style endpoint.
    ///
    /// A `400 invalid_token` answer means the token is already unusable; it
    /// is logged and treated as success.
    pub async fn revoke_token(&self, ctx: &Context, url: &Url, token: &Token, authenticate: bool) -> Result<()> {
        let mut form = vec![
            ("token", token.access_token.as_str()),
            ("token_type_hint", "access_token"),
        ];
        if authenticate {
            form.push(("client_id", self.client_id.as_str()));
            form.push(("client_secret", self.client_secret.as_str()));
        }
        let request = self
            .http
            .post(url.clone())
            .header(ACCEPT, "application/json")
            .form(&form);

        let (status, body) = send_raw(ctx, request).await.map_err(revoke_error)?;
        if status.is_success() {
            return Ok(());
        }
        if status == StatusCode::BAD_REQUEST && error_code(&body).as_deref() == Some("invalid_token") {
            info!(revoke_url = %url, "Token already invalid at backend");
            return Ok(());
        }
        Err(Error::Revoke(format!("HTTP {status}: {}", error_message(&body))))
    }
}

/// Map a transport error during revocation; context errors pass through.
pub(crate) fn revoke_error(e: Error) -> Error {
    match e {
        Error::Cancelled | Error::DeadlineExceeded | Error::Revoke(_) => e,
        other => Error::Revoke(other.to_string()),
    }
}

/// Build the outbound HTTP client.
pub(crate) fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))
}

/// Parse a configured endpoint URL.
pub(crate) fn parse_url(what: &str, value: &str) -> Result<Url> {
    Url::parse(value.trim()).map_err(|e| Error::Config(format!("Invalid {what} '{value}': {e}")))
}

/// Append percent-encoded path segments to `base`.
pub(crate) fn join_path(base: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| Error::Config(format!("URL cannot be a base: {base}")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Send a request under `ctx`, returning status and body without judging
/// the status.
pub(crate) async fn send_raw(ctx: &Context, request: RequestBuilder) -> Result<(StatusCode, String)> {
    ctx.run(async move {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        Ok((status, body))
    })
    .await
}

/// Send a request under `ctx` and decode a JSON success body.
///
/// Non-2xx statuses become [`Error::Backend`].
pub(crate) async fn send_json<T: DeserializeOwned>(ctx: &Context, request: RequestBuilder) -> Result<T> {
    let (status, body) = send_raw(ctx, request).await?;
    if !status.is_success() {
        return Err(Error::backend(status.as_u16(), error_message(&body)));
    }
    Ok(serde_json::from_str(&body)?)
}

/// The OAuth `error` code of a response body, if any.
fn error_code(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorBody>(body).ok()?.error
}

/// Human-readable error text from a backend response body.
pub(crate) fn error_message(body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        let text = match (parsed.error, parsed.error_description, parsed.message) {
            (Some(e), Some(d), _) => format!("{e}: {d}"),
            (Some(e), None, _) => e,
            (None, _, Some(m)) => m,
            (None, Some(d), None) => d,
            (None, None, None) => String::new(),
        };
        if !text.is_empty() {
            return text;
        }
    }
    let trimmed = body.trim();
    match trimmed.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
