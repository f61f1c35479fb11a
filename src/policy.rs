//! Authorization policy: allow-list and domain matching.
//!
//! # Rules
//!
//! | Configured | Decision |
//! |------------|----------|
//! | non-empty allow-list | identity's email must be listed; domain is **not** consulted |
//! | empty allow-list | backend-reported domain/organization must equal the required one |
//!
//! The domain is always the value the backend reported (Google `hd`, GitHub
//! organization membership, GitLab group path, OIDC claim). It is never parsed
//! out of the email address.
//!
//! Provider construction guarantees at least one of the two is configured.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Authenticated principal as reported by an identity backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Authoritative email address
    pub email: String,
    /// Backend-reported domain or organization, when the backend reported one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

impl Identity {
    /// Build an identity from an email and an optional backend domain.
    pub fn new(email: impl Into<String>, domain: Option<String>) -> Self {
        Self {
            email: email.into(),
            domain: domain.filter(|d| !d.is_empty()),
        }
    }

    /// Short name: local part of the email address.
    pub fn username(&self) -> &str {
        username_of(&self.email)
    }
}

/// Local part of an email address (`"alice@example.com"` -> `"alice"`).
///
/// Empty input yields an empty string.
pub fn username_of(email: &str) -> &str {
    email.split('@').next().unwrap_or_default()
}

/// Explicit set of authorized identities.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    entries: HashSet<String>,
}

impl AllowList {
    /// Build from configured entries; blank entries are dropped.
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|e| e.as_ref().trim().to_string())
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    /// Exact membership test
    pub fn contains(&self, email: &str) -> bool {
        !email.is_empty() && self.entries.contains(email)
    }

    /// `true` if no identities are listed
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of listed identities
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Why a policy check said no. Only ever used for logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    /// Allow-list is configured and the email is not on it
    NotAllowListed,
    /// Backend reported no domain/organization for the identity
    DomainMissing,
    /// Backend-reported domain differs from the required one
    DomainMismatch {
        /// Domain the backend reported
        reported: String,
    },
    /// Neither an allow-list nor a domain is configured
    Unconstrained,
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAllowListed => f.write_str("identity not in allow-list"),
            Self::DomainMissing => f.write_str("backend reported no domain"),
            Self::DomainMismatch { reported } => write!(f, "domain mismatch (got {reported})"),
            Self::Unconstrained => f.write_str("no authorization constraint configured"),
        }
    }
}

/// Evaluate the policy, reporting the reason on denial.
pub fn evaluate(
    identity: &Identity,
    allow_list: &AllowList,
    required_domain: Option<&str>,
) -> Result<(), Denial> {
    if !allow_list.is_empty() {
        return if allow_list.contains(&identity.email) {
            Ok(())
        } else {
            Err(Denial::NotAllowListed)
        };
    }

    let Some(required) = required_domain.filter(|d| !d.is_empty()) else {
        return Err(Denial::Unconstrained);
    };

    match identity.domain.as_deref() {
        Some(reported) if reported == required => Ok(()),
        Some(reported) => Err(Denial::DomainMismatch {
            reported: reported.to_string(),
        }),
        None => Err(Denial::DomainMissing),
    }
}

/// Boolean authorization gate.
pub fn authorize(identity: &Identity, allow_list: &AllowList, required_domain: Option<&str>) -> bool {
    evaluate(identity, allow_list, required_domain).is_ok()
}

/// Per-provider authorization constraints, fixed at construction.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    /// Explicit allow-list (takes precedence)
    pub allow_list: AllowList,
    /// Required backend domain/organization
    pub required_domain: Option<String>,
}

impl AccessPolicy {
    /// Build a policy; empty domain strings count as "not configured".
    pub fn new(allow_list: AllowList, required_domain: Option<String>) -> Self {
        Self {
            allow_list,
            required_domain: required_domain.filter(|d| !d.is_empty()),
        }
    }

    /// `true` if at least one constraint is configured
    pub fn is_constrained(&self) -> bool {
        !self.allow_list.is_empty() || self.required_domain.is_some()
    }

    /// Evaluate this policy for an identity
    pub fn evaluate(&self, identity: &Identity) -> Result<(), Denial> {
        evaluate(identity, &self.allow_list, self.required_domain.as_deref())
    }
}
