//! Per-login state machine
//!
//! ```text
//! LoginFlow::start ──▶ PendingLogin ──complete──▶ LoginOutcome::Authorized(Principal)
//!                                        │      └▶ LoginOutcome::Rejected
//!                                        └─ state mismatch / exchange failure ─▶ Err
//! ```
//!
//! A [`PendingLogin`] is consumed by [`PendingLogin::complete`], so the
//! anti-forgery state it carries can be checked at most once. It serializes
//! to the provider name plus the state, for whatever session store the
//! caller uses between the redirect and the callback.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::provider::Provider;
use crate::state::PendingState;
use crate::token::Token;
use crate::{Error, Result};

/// Entry point of the login state machine
pub struct LoginFlow;

impl LoginFlow {
    /// Mint a state and build the authorization URL to redirect to.
    pub fn start(provider: &dyn Provider) -> (PendingLogin, String) {
        let state = PendingState::mint();
        let url = provider.start_session(state.as_str());
        debug!(provider = provider.name(), "Login started");
        (
            PendingLogin {
                provider: provider.name().to_string(),
                state,
            },
            url,
        )
    }
}

/// A login waiting for its callback
#[derive(Debug, Serialize, Deserialize)]
pub struct PendingLogin {
    provider: String,
    state: PendingState,
}

impl PendingLogin {
    /// Provider the login was started with
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// State value expected back on the callback
    pub fn state(&self) -> &str {
        self.state.as_str()
    }

    /// Finish the login with the callback's `state` and `code`.
    ///
    /// # Errors
    ///
    /// [`Error::StateMismatch`] if the state differs or `provider` is not
    /// the one the login started with; [`Error::Exchange`] (or a context
    /// error) if the code cannot be exchanged. An unauthorized identity is
    /// not an error: it is [`LoginOutcome::Rejected`].
    pub async fn complete(
        self,
        provider: &dyn Provider,
        ctx: &Context,
        received_state: &str,
        code: &str,
    ) -> Result<LoginOutcome> {
        if provider.name() != self.provider {
            warn!(
                expected = %self.provider,
                actual = provider.name(),
                "Callback handled by a different provider"
            );
            return Err(Error::StateMismatch);
        }
        if !self.state.verify(received_state) {
            warn!(provider = provider.name(), "Anti-forgery state mismatch");
            return Err(Error::StateMismatch);
        }

        let token = provider.exchange(ctx, code).await?;
        if !provider.valid(ctx, &token).await {
            info!(provider = provider.name(), "Login rejected");
            return Ok(LoginOutcome::Rejected);
        }

        let email = provider.email(ctx, &token).await;
        if email.is_empty() {
            warn!(provider = provider.name(), "Authorized token has no determinable email");
            return Ok(LoginOutcome::Rejected);
        }
        let username = crate::policy::username_of(&email).to_string();
        info!(provider = provider.name(), email = %email, "Login authorized");

        Ok(LoginOutcome::Authorized(Principal {
            provider: provider.name(),
            token,
            email,
            username,
        }))
    }
}

/// Result of a completed login
#[derive(Debug)]
pub enum LoginOutcome {
    /// The token belongs to an authorized principal
    Authorized(Principal),
    /// The backend identity is not allowed
    Rejected,
}

impl LoginOutcome {
    /// The principal, if authorized
    pub fn principal(self) -> Option<Principal> {
        match self {
            Self::Authorized(p) => Some(p),
            Self::Rejected => None,
        }
    }

    /// Whether the login was authorized
    pub fn is_authorized(&self) -> bool {
        matches!(self, Self::Authorized(_))
    }
}

/// An authorized identity and the token proving it
#[derive(Debug, Clone)]
pub struct Principal {
    /// Provider that vouched for the identity
    pub provider: &'static str,
    /// Access token; re-check with [`Provider::valid`] before signing
    pub token: Token,
    /// Authoritative email
    pub email: String,
    /// Local part of `email`
    pub username: String,
}

/// Revoke `token` on logout. Failures are logged and the logout completes.
pub async fn logout(ctx: &Context, provider: &dyn Provider, token: &Token) {
    match provider.revoke(ctx, token).await {
        Ok(()) => info!(provider = provider.name(), "Token revoked"),
        Err(e) => warn!(provider = provider.name(), error = %e, "Token revocation failed"),
    }
}
