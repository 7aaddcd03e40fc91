//! Access policies evaluated per request against an already resolved session.
//!
//! Policies are small value objects built once when routes are composed. Each
//! exposes an `evaluate` method returning a [`Decision`]; handlers call it
//! explicitly and hand any [`Denial`] to the transport layer for rendering.
//! Evaluation never mutates state.

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};

use super::principal::{Identity, IdentityId, OrganizationId, Role};
use super::session::Session;
use super::store::{IdentityStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyKind {
    /// A session is required but absent, expired or revoked.
    Unauthenticated,
    /// Valid session, insufficient privilege.
    Forbidden,
    /// A referenced identity, organization or session does not exist.
    NotFound,
    /// Inconsistent data or a broken collaborator; needs operational attention, not a retry.
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    pub kind: DenyKind,
    pub reason: String,
}

impl Denial {
    pub fn new(kind: DenyKind, reason: impl Into<String>) -> Self { Self { kind, reason: reason.into() } }
    pub fn unauthenticated(reason: impl Into<String>) -> Self { Self::new(DenyKind::Unauthenticated, reason) }
    pub fn forbidden(reason: impl Into<String>) -> Self { Self::new(DenyKind::Forbidden, reason) }
    pub fn not_found(reason: impl Into<String>) -> Self { Self::new(DenyKind::NotFound, reason) }
    pub fn internal(reason: impl Into<String>) -> Self { Self::new(DenyKind::Internal, reason) }
}

impl Display for Denial {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { write!(f, "{:?}: {}", self.kind, self.reason) }
}

impl std::error::Error for Denial {}

impl From<StoreError> for Denial {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(m) => Denial::not_found(m),
            other => Denial::internal(other.to_string()),
        }
    }
}

/// Outcome of a policy evaluation.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(Denial),
}

impl Decision {
    pub fn is_allowed(&self) -> bool { matches!(self, Decision::Allow) }

    pub fn denial(&self) -> Option<&Denial> {
        match self {
            Decision::Allow => None,
            Decision::Deny(d) => Some(d),
        }
    }

    /// Evaluate `next` only when this decision allows.
    pub fn and_then(self, next: impl FnOnce() -> Decision) -> Decision {
        match self {
            Decision::Allow => next(),
            deny => deny,
        }
    }

    /// Evaluate `next` only when this decision is a `Forbidden` denial. Any other denial stands.
    pub fn or_else(self, next: impl FnOnce() -> Decision) -> Decision {
        match self {
            Decision::Deny(Denial { kind: DenyKind::Forbidden, .. }) => next(),
            other => other,
        }
    }

    pub fn into_result(self) -> Result<(), Denial> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Deny(d) => Err(d),
        }
    }
}

fn require_session(session: Option<&Session>) -> Result<&Session, Denial> {
    session.ok_or_else(|| Denial::unauthenticated("endpoint requires a session"))
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyConfigError {
    #[error("role policy mismatch: unrestricted policy lists roles {0:?}")]
    RolesWithoutRestriction(Vec<Role>),
    #[error("role policy mismatch: restricted policy lists no roles")]
    RestrictionWithoutRoles,
}

/// Who may reach an endpoint at all, by role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RolePolicy {
    /// Any valid session.
    Unrestricted,
    /// A valid session whose identity holds one of these roles. Never empty.
    Restricted(BTreeSet<Role>),
}

impl RolePolicy {
    pub fn unrestricted() -> Self { RolePolicy::Unrestricted }

    pub fn require<I: IntoIterator<Item = Role>>(roles: I) -> Result<Self, PolicyConfigError> {
        let roles: BTreeSet<Role> = roles.into_iter().collect();
        if roles.is_empty() {
            return Err(PolicyConfigError::RestrictionWithoutRoles);
        }
        Ok(RolePolicy::Restricted(roles))
    }

    /// Build from the flag-plus-list form used in route tables. Checked once, at composition time.
    pub fn from_config(require_role: bool, allowed: &[Role]) -> Result<Self, PolicyConfigError> {
        match (require_role, allowed.is_empty()) {
            (false, true) => Ok(RolePolicy::Unrestricted),
            (false, false) => Err(PolicyConfigError::RolesWithoutRestriction(allowed.to_vec())),
            (true, _) => Self::require(allowed.iter().copied()),
        }
    }

    pub fn evaluate(&self, session: Option<&Session>) -> Decision {
        let session = match require_session(session) {
            Ok(s) => s,
            Err(d) => return Decision::Deny(d),
        };
        match self {
            RolePolicy::Unrestricted => Decision::Allow,
            RolePolicy::Restricted(roles) if roles.contains(&session.identity.role) => Decision::Allow,
            RolePolicy::Restricted(_) => {
                debug!(identity_id = session.identity.id, role = %session.identity.role, "role_policy.deny");
                Decision::Deny(Denial::forbidden(format!("endpoint does not allow role {}", session.identity.role)))
            }
        }
    }
}

/// Resource-owner check: the caller must be the target identity, unless an override applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityPolicy {
    pub target: IdentityId,
    /// Admins act on behalf of anyone.
    pub allow_admin_override: bool,
    /// Sponsors act on drivers affiliated with their own organization.
    pub allow_sponsor_override: bool,
}

impl IdentityPolicy {
    pub fn owner(target: IdentityId) -> Self {
        Self { target, allow_admin_override: false, allow_sponsor_override: false }
    }

    pub fn with_admin_override(mut self) -> Self {
        self.allow_admin_override = true;
        self
    }

    pub fn with_sponsor_override(mut self) -> Self {
        self.allow_sponsor_override = true;
        self
    }

    /// `identities` is consulted only for the sponsor override, to read the target's role and affiliations.
    pub fn evaluate<S: IdentityStore + ?Sized>(&self, session: Option<&Session>, identities: &S) -> Decision {
        let caller = match require_session(session) {
            Ok(s) => &s.identity,
            Err(d) => return Decision::Deny(d),
        };
        if caller.id == self.target {
            return Decision::Allow;
        }
        if self.allow_admin_override && caller.role == Role::Admin {
            return Decision::Allow;
        }
        if self.allow_sponsor_override && caller.role == Role::Sponsor {
            let target = match identities.get_identity_by_id(self.target) {
                Ok(t) => t,
                Err(StoreError::NotFound(_)) => {
                    return Decision::Deny(Denial::not_found(format!("no identity #{}", self.target)));
                }
                Err(e) => {
                    error!(target_id = self.target, "identity_policy.lookup_failed: {}", e);
                    return Decision::Deny(Denial::internal(format!("failed to load identity #{}", self.target)));
                }
            };
            if let Some(decision) = sponsor_override(caller, &target) {
                return decision;
            }
        }
        debug!(identity_id = caller.id, target_id = self.target, "identity_policy.deny");
        Decision::Deny(Denial::forbidden(format!("identity #{} may not act on identity #{}", caller.id, self.target)))
    }
}

/// `None` when the override does not apply and evaluation should continue.
fn sponsor_override(sponsor: &Identity, target: &Identity) -> Option<Decision> {
    if target.role != Role::Driver {
        return None;
    }
    let Some(org_id) = sponsor.sole_affiliation() else {
        return Some(Decision::Deny(sponsor_affiliation_violation(sponsor)));
    };
    if target.is_affiliated_with(org_id) { Some(Decision::Allow) } else { None }
}

fn sponsor_affiliation_violation(sponsor: &Identity) -> Denial {
    error!(
        kind = "invariant",
        identity_id = sponsor.id,
        affiliations = sponsor.affiliations.len(),
        "sponsor session does not carry exactly one affiliation"
    );
    Denial::internal(format!(
        "expected sponsor #{} to have 1 affiliation but found {}",
        sponsor.id,
        sponsor.affiliations.len()
    ))
}

/// Organization-affiliation check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrganizationPolicy {
    pub target: OrganizationId,
    pub allow_admin_override: bool,
}

impl OrganizationPolicy {
    pub fn member_of(target: OrganizationId) -> Self { Self { target, allow_admin_override: false } }

    pub fn with_admin_override(mut self) -> Self {
        self.allow_admin_override = true;
        self
    }

    pub fn evaluate(&self, session: Option<&Session>) -> Decision {
        let caller = match require_session(session) {
            Ok(s) => &s.identity,
            Err(d) => return Decision::Deny(d),
        };
        if self.allow_admin_override && caller.role == Role::Admin {
            return Decision::Allow;
        }
        if caller.is_affiliated_with(self.target) {
            return Decision::Allow;
        }
        debug!(identity_id = caller.id, org_id = self.target, "organization_policy.deny");
        Decision::Deny(Denial::forbidden(format!("identity #{} is not affiliated with organization #{}", caller.id, self.target)))
    }
}

/// The organization a sponsor manages, taken from the session and never from client input.
pub fn sponsor_organization(session: Option<&Session>) -> Result<OrganizationId, Denial> {
    let caller = &require_session(session)?.identity;
    if caller.role != Role::Sponsor {
        return Err(Denial::forbidden(format!("identity #{} is not a sponsor", caller.id)));
    }
    caller.sole_affiliation().ok_or_else(|| sponsor_affiliation_violation(caller))
}

#[cfg(test)]
#[path = "authorizer_tests.rs"]
mod tests;
