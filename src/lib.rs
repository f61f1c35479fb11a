//! idp-gate library
//!
//! Identity-provider gate for a short-lived SSH/TLS certificate issuer: runs
//! the OAuth2 authorization-code flow against a pluggable backend and decides
//! whether the resulting token belongs to an authorized principal.
//!
//! # Features
//!
//! - **Pluggable backends**: Google, GitHub, GitLab and generic OIDC behind one
//!   [`provider::Provider`] trait, selected by name through
//!   [`provider::ProviderRegistry`]
//! - **Fail-closed validation**: allow-list, token freshness, server-side
//!   re-confirmation, audience and domain/organization checks in a fixed order
//! - **Anti-forgery state**: CSPRNG state values compared in constant time
//! - **Cancellation**: every network call runs under a [`context::Context`]
//! - **Metrics**: exchange/validation counters through the `metrics` facade

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod flow;
pub mod metrics;
pub mod policy;
pub mod provider;
pub mod state;
pub mod token;

pub use context::Context;
pub use error::{Error, Result};
pub use provider::{Provider, ProviderRegistry};
pub use token::Token;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// `RUST_LOG` takes precedence over `level`.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };

    installed.map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))
}
