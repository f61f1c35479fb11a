//! Error types for idp-gate
//!
//! Authorization failure deliberately has no variant here: [`Provider::valid`]
//! answers with a plain `bool` and every failure path collapses to `false`.
//!
//! [`Provider::valid`]: crate::provider::Provider::valid

use thiserror::Error;

/// Result type alias for idp-gate
pub type Result<T> = std::result::Result<T, Error>;

/// idp-gate errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error; the provider cannot be built
    #[error("Configuration error: {0}")]
    Config(String),

    /// Authorization code could not be exchanged for a token
    #[error("Code exchange failed: {0}")]
    Exchange(String),

    /// Token revocation failed (non-fatal for logout)
    #[error("Token revocation failed: {0}")]
    Revoke(String),

    /// Anti-forgery state on the callback did not match the minted value
    #[error("Anti-forgery state mismatch")]
    StateMismatch,

    /// Identity backend answered with a non-success status
    #[error("Backend returned HTTP {status}: {message}")]
    Backend {
        /// HTTP status code
        status: u16,
        /// Backend-provided error text
        message: String,
    },

    /// The request context was cancelled
    #[error("Request cancelled")]
    Cancelled,

    /// The request context deadline passed
    #[error("Request deadline exceeded")]
    DeadlineExceeded,

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a backend error from a status code and response body
    pub fn backend(status: u16, message: impl Into<String>) -> Self {
        Self::Backend {
            status,
            message: message.into(),
        }
    }

    /// `true` for construction-time configuration errors
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// `true` for code-exchange failures
    #[must_use]
    pub fn is_exchange(&self) -> bool {
        matches!(self, Self::Exchange(_))
    }

    /// `true` for revocation failures
    #[must_use]
    pub fn is_revoke(&self) -> bool {
        matches!(self, Self::Revoke(_))
    }

    /// `true` when the request context ended before the work finished
    #[must_use]
    pub fn is_context_done(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }

    /// `true` when the backend reported the resource as absent (HTTP 404)
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Backend { status: 404, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_helpers() {
        assert!(Error::Config("x".into()).is_config());
        assert!(Error::Exchange("x".into()).is_exchange());
        assert!(Error::Revoke("x".into()).is_revoke());
        assert!(Error::Cancelled.is_context_done());
        assert!(Error::DeadlineExceeded.is_context_done());
        assert!(Error::backend(404, "missing").is_not_found());
        assert!(!Error::backend(500, "boom").is_not_found());
        assert!(!Error::StateMismatch.is_exchange());
    }

    #[test]
    fn backend_error_message_includes_status() {
        let e = Error::backend(400, "invalid_grant");
        assert_eq!(e.to_string(), "Backend returned HTTP 400: invalid_grant");
    }
}
