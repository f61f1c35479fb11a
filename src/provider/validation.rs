//! Fail-closed token validation
//!
//! Every backend answers `Valid` through [`validate`], which fixes the step
//! order and short-circuits on the first failure:
//!
//! 1. allow-list membership (only when an allow-list is configured)
//! 2. local token validity (non-empty, bearer, not expired)
//! 3. server-side re-confirmation by the backend
//! 4. audience == our client id
//! 5. backend-reported domain/organization (only when no allow-list)
//!
//! Backends only supply the two network lookups through [`Backend`]. Errors
//! never escape: they are logged and the answer is `false`.

use std::fmt;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::context::Context;
use crate::metrics::AuthMetrics;
use crate::policy::{AccessPolicy, Denial, Identity};
use crate::token::Token;
use crate::{Error, Result};

/// Result of the backend's server-side token check.
#[derive(Debug, Clone, Default)]
pub(crate) struct Confirmation {
    /// Backend still considers the token live
    pub active: bool,
    /// Client ids the token was issued to
    pub audiences: Vec<String>,
}

impl Confirmation {
    /// A live token issued to a single client
    pub fn issued_to(audience: impl Into<String>) -> Self {
        Self {
            active: true,
            audiences: vec![audience.into()],
        }
    }

    fn is_for(&self, client_id: &str) -> bool {
        !client_id.is_empty() && self.audiences.iter().any(|a| a == client_id)
    }
}

/// Network lookups a backend contributes to validation.
#[async_trait]
pub(crate) trait Backend: Send + Sync {
    /// Re-confirm the token server-side and report its audience.
    async fn confirm(&self, ctx: &Context, token: &Token) -> Result<Confirmation>;

    /// Email plus backend-reported domain/organization.
    async fn lookup_identity(&self, ctx: &Context, token: &Token) -> Result<Identity>;

    /// Email only. Override when the domain lookup costs extra calls.
    async fn lookup_email(&self, ctx: &Context, token: &Token) -> Result<String> {
        Ok(self.lookup_identity(ctx, token).await?.email)
    }
}

#[derive(Debug, Clone, Copy)]
enum Step {
    AllowList,
    Local,
    Confirm,
    Audience,
    Domain,
}

impl Step {
    fn as_str(self) -> &'static str {
        match self {
            Self::AllowList => "allow_list",
            Self::Local => "local",
            Self::Confirm => "confirm",
            Self::Audience => "audience",
            Self::Domain => "domain",
        }
    }
}

enum Rejection {
    /// Policy or token said no
    Denied(Step, String),
    /// A lookup failed; fail closed
    Failed(Step, Error),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Denied(step, reason) => write!(f, "{}: {reason}", step.as_str()),
            Self::Failed(step, error) => write!(f, "{}: {error}", step.as_str()),
        }
    }
}

fn denied(step: Step, denial: &Denial) -> Rejection {
    Rejection::Denied(step, denial.to_string())
}

/// Run the validation steps for `provider`.
pub(crate) async fn validate<B>(
    provider: &'static str,
    backend: &B,
    client_id: &str,
    policy: &AccessPolicy,
    metrics: &dyn AuthMetrics,
    ctx: &Context,
    token: &Token,
) -> bool
where
    B: Backend + ?Sized,
{
    match run_steps(backend, client_id, policy, ctx, token).await {
        Ok(email) => {
            metrics.increment_valid(provider);
            debug!(provider, email = %email, "Token validated");
            true
        }
        Err(rejection @ Rejection::Denied(..)) => {
            debug!(provider, reason = %rejection, "Token rejected");
            false
        }
        Err(rejection @ Rejection::Failed(..)) => {
            warn!(provider, reason = %rejection, "Token validation failed closed");
            false
        }
    }
}

async fn run_steps<B>(
    backend: &B,
    client_id: &str,
    policy: &AccessPolicy,
    ctx: &Context,
    token: &Token,
) -> std::result::Result<String, Rejection>
where
    B: Backend + ?Sized,
{
    let mut email = None;

    // 1. allow-list
    if !policy.allow_list.is_empty() {
        let address = backend
            .lookup_email(ctx, token)
            .await
            .map_err(|e| Rejection::Failed(Step::AllowList, e))?;
        policy
            .evaluate(&Identity::new(address.as_str(), None))
            .map_err(|d| denied(Step::AllowList, &d))?;
        email = Some(address);
    }

    // 2. local validity
    if !token.is_valid() {
        let reason = if token.is_expired() {
            "token expired"
        } else {
            "token malformed or not a bearer token"
        };
        return Err(Rejection::Denied(Step::Local, reason.to_string()));
    }

    // 3. server-side re-confirmation
    let confirmation = backend
        .confirm(ctx, token)
        .await
        .map_err(|e| Rejection::Failed(Step::Confirm, e))?;
    if !confirmation.active {
        return Err(Rejection::Denied(
            Step::Confirm,
            "backend reports token inactive".to_string(),
        ));
    }

    // 4. audience
    if !confirmation.is_for(client_id) {
        return Err(Rejection::Denied(
            Step::Audience,
            format!("token issued to {:?}", confirmation.audiences),
        ));
    }

    // 5. domain / organization
    if let Some(email) = email {
        return Ok(email);
    }
    let identity = backend
        .lookup_identity(ctx, token)
        .await
        .map_err(|e| Rejection::Failed(Step::Domain, e))?;
    policy
        .evaluate(&identity)
        .map_err(|d| denied(Step::Domain, &d))?;
    Ok(identity.email)
}

/// Email for `token`, or empty when it cannot be determined.
pub(crate) async fn email_or_empty<B>(provider: &'static str, backend: &B, ctx: &Context, token: &Token) -> String
where
    B: Backend + ?Sized,
{
    match backend.lookup_email(ctx, token).await {
        Ok(email) => email,
        Err(e) => {
            warn!(provider, error = %e, "Could not determine email");
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::metrics::InMemoryMetrics;
    use crate::policy::AllowList;

    /// Scripted backend for exercising the step order.
    #[derive(Default)]
    struct Scripted {
        audience: String,
        active: bool,
        email: String,
        domain: Option<String>,
        fail_confirm: bool,
        confirm_calls: AtomicUsize,
        identity_calls: AtomicUsize,
    }

    #[async_trait]
    impl Backend for Scripted {
        async fn confirm(&self, _ctx: &Context, _token: &Token) -> Result<Confirmation> {
            self.confirm_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_confirm {
                return Err(Error::backend(500, "boom"));
            }
            Ok(Confirmation {
                active: self.active,
                audiences: vec![self.audience.clone()],
            })
        }

        async fn lookup_identity(&self, _ctx: &Context, _token: &Token) -> Result<Identity> {
            self.identity_calls.fetch_add(1, Ordering::SeqCst);
            Ok(Identity::new(self.email.clone(), self.domain.clone()))
        }
    }

    fn backend(domain: &str) -> Scripted {
        Scripted {
            audience: "client-123".into(),
            active: true,
            email: "alice@example.com".into(),
            domain: Some(domain.into()),
            ..Default::default()
        }
    }

    async fn check(b: &Scripted, policy: &AccessPolicy, token: &Token) -> (bool, u64) {
        let metrics = InMemoryMetrics::new();
        let ok = validate("test", b, "client-123", policy, &metrics, &Context::background(), token).await;
        (ok, metrics.valid_count("test"))
    }

    fn domain_policy() -> AccessPolicy {
        AccessPolicy::new(AllowList::default(), Some("example.com".into()))
    }

    #[tokio::test]
    async fn domain_match_is_valid_and_counted() {
        let (ok, count) = check(&backend("example.com"), &domain_policy(), &Token::bearer("t")).await;
        assert!(ok);
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn domain_mismatch_is_rejected_and_not_counted() {
        let (ok, count) = check(&backend("other.com"), &domain_policy(), &Token::bearer("t")).await;
        assert!(!ok);
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn foreign_audience_is_rejected_before_domain_lookup() {
        let b = Scripted {
            audience: "someone-else".into(),
            ..backend("example.com")
        };
        let (ok, _) = check(&b, &domain_policy(), &Token::bearer("t")).await;
        assert!(!ok);
        assert_eq!(b.identity_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn expired_token_never_reaches_backend() {
        let mut token = Token::bearer("t");
        token.expires_at = Some(chrono::Utc::now() - chrono::TimeDelta::seconds(5));
        let b = backend("example.com");
        let (ok, _) = check(&b, &domain_policy(), &token).await;
        assert!(!ok);
        assert_eq!(b.confirm_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn backend_error_fails_closed() {
        let b = Scripted {
            fail_confirm: true,
            ..backend("example.com")
        };
        let (ok, _) = check(&b, &domain_policy(), &Token::bearer("t")).await;
        assert!(!ok);
    }

    #[tokio::test]
    async fn inactive_token_is_rejected() {
        let b = Scripted {
            active: false,
            ..backend("example.com")
        };
        let (ok, _) = check(&b, &domain_policy(), &Token::bearer("t")).await;
        assert!(!ok);
    }

    #[tokio::test]
    async fn allow_list_checked_first_and_domain_skipped() {
        let policy = AccessPolicy::new(
            AllowList::new(["alice@example.com"]),
            Some("example.com".into()),
        );
        // Listed identity with a mismatched domain is still valid
        let b = backend("other.com");
        let (ok, count) = check(&b, &policy, &Token::bearer("t")).await;
        assert!(ok);
        assert_eq!(count, 1);

        // Unlisted identity stops at step 1
        let b = Scripted {
            email: "mallory@example.com".into(),
            ..backend("example.com")
        };
        let (ok, _) = check(&b, &policy, &Token::bearer("t")).await;
        assert!(!ok);
        assert_eq!(b.confirm_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn confirmation_requires_non_empty_client_id() {
        let c = Confirmation::issued_to("");
        assert!(!c.is_for(""));
        assert!(Confirmation::issued_to("a").is_for("a"));
    }
}
