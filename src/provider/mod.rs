//! Provider abstraction for pluggable identity backends.
//!
//! Every backend (Google, GitHub, GitLab, generic OIDC) implements the same
//! [`Provider`] contract. The issuance pipeline only ever sees
//! `Arc<dyn Provider>` and never a backend-specific type.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │   ProviderRegistry   │  name → factory, built once at startup
//! └──────────┬───────────┘
//!            │ new_provider(config)
//!            ▼
//! ┌──────────────────────┐   ┌───────────────────────┐
//! │   Arc<dyn Provider>  │──▶│ OAuthClient (shared)  │
//! │ Google/GitHub/GitLab │   │ validation::validate  │
//! │ /OIDC                │   │ policy::AccessPolicy  │
//! └──────────────────────┘   └───────────────────────┘
//! ```
//!
//! # Per-login lifecycle
//!
//! `start_session` → callback with code → `exchange` → `valid` →
//! `email`/`username` → optionally `revoke`. `valid` is idempotent and may be
//! called again at any point while the token is live, e.g. right before
//! signing.

pub mod github;
pub mod gitlab;
pub mod google;
pub mod oauth;
pub mod oidc;
pub mod registry;
mod validation;

pub use github::GitHubProvider;
pub use gitlab::GitLabProvider;
pub use google::{GoogleEndpoints, GoogleProvider};
pub use oauth::OAuthClient;
pub use oidc::OidcProvider;
pub use registry::{ProviderFactory, ProviderRegistry};

use async_trait::async_trait;

use crate::Result;
use crate::context::Context;
use crate::policy::username_of;
use crate::token::Token;

/// An identity backend.
///
/// # Thread Safety
///
/// Implementations are immutable after construction and must be
/// `Send + Sync + 'static` so one instance can serve every concurrent
/// request through `Arc<dyn Provider>`.
#[async_trait]
pub trait Provider: Send + Sync + 'static {
    /// Stable identifier used for metrics and logs.
    fn name(&self) -> &'static str;

    /// Authorization URL embedding the client id, redirect URL, scopes,
    /// `state` and any backend login hint. No network I/O.
    fn start_session(&self, state: &str) -> String;

    /// Exchange an authorization code for a token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Exchange`](crate::Error::Exchange) on network failure,
    /// malformed response, or backend rejection (invalid, expired or reused
    /// code).
    async fn exchange(&self, ctx: &Context, code: &str) -> Result<Token>;

    /// The authorization decision. Any failure, including a cancelled
    /// context, is `false`.
    async fn valid(&self, ctx: &Context, token: &Token) -> bool;

    /// Ask the backend to invalidate the token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Revoke`](crate::Error::Revoke) on network or backend
    /// failure. Callers finishing a logout should log it and carry on.
    async fn revoke(&self, ctx: &Context, token: &Token) -> Result<()>;

    /// Authoritative email of the token's owner, or empty if undeterminable.
    async fn email(&self, ctx: &Context, token: &Token) -> String;

    /// Local part of [`email`](Provider::email); empty if the email is.
    async fn username(&self, ctx: &Context, token: &Token) -> String {
        username_of(&self.email(ctx, token).await).to_string()
    }
}
