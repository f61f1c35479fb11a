//! OAuth bearer token
//!
//! The token handed back by a provider after a successful code exchange.
//! Local validity here is only half the story: a token is authorized only
//! after the backend re-confirms it, see [`Provider::valid`].
//!
//! [`Provider::valid`]: crate::provider::Provider::valid

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Tokens are treated as expired this long before their real expiry.
pub const EXPIRY_DELTA: Duration = Duration::from_secs(10);

/// OAuth token
#[derive(Clone, Serialize, Deserialize)]
pub struct Token {
    /// Access token (secret)
    pub access_token: String,

    /// Token type (usually "Bearer")
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// Refresh token (secret, optional)
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Absolute expiry; `None` when the backend did not report one
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,

    /// Granted scopes
    #[serde(default)]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl Token {
    /// Create a token from an OAuth token-endpoint response
    pub fn from_response(
        access_token: String,
        token_type: Option<String>,
        refresh_token: Option<String>,
        expires_in: Option<u64>,
        scope: Option<String>,
    ) -> Self {
        let expires_at = expires_in
            .and_then(|secs| i64::try_from(secs).ok())
            .map(|secs| Utc::now() + TimeDelta::seconds(secs));

        Self {
            access_token,
            token_type: token_type
                .filter(|t| !t.is_empty())
                .unwrap_or_else(default_token_type),
            refresh_token,
            expires_at,
            scope,
        }
    }

    /// A bare bearer token with no known expiry
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self::from_response(access_token.into(), None, None, None, None)
    }

    /// Local validity: non-empty, bearer-typed and not expired.
    ///
    /// Never sufficient on its own; the backend may have revoked it early.
    pub fn is_valid(&self) -> bool {
        !self.access_token.is_empty()
            && self.token_type.eq_ignore_ascii_case("bearer")
            && !self.is_expired()
    }

    /// Check if the token is expired (with [`EXPIRY_DELTA`] buffer)
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => {
                let delta = TimeDelta::from_std(EXPIRY_DELTA).unwrap_or_default();
                Utc::now() + delta >= expires_at
            }
            // No expiry = doesn't expire locally
            None => false,
        }
    }

    /// Time until expiration
    pub fn time_until_expiry(&self) -> Option<Duration> {
        self.expires_at
            .and_then(|expires_at| (expires_at - Utc::now()).to_std().ok())
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"[redacted]")
            .field("token_type", &self.token_type)
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[redacted]"),
            )
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .finish()
    }
}
