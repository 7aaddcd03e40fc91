//! Storage contracts consumed by the session and authorization core, plus an
//! in-memory implementation used by the server binary and the test suites.
//!
//! Persistence engines only need to honour these traits. Row-level atomicity is
//! all the core relies on: concurrent revocations of the same row are resolved
//! last-writer-wins on the revoked flag.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use thiserror::Error;

use super::application::{Application, ApplicationId, Verdict};
use super::principal::{Affiliation, Identity, IdentityId, Organization, OrganizationId, Role};
use super::session::{Session, SessionId, SessionToken};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    /// A write would break a structural invariant (e.g. a sponsor with two organizations).
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    #[error("store backend failure: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

pub trait IdentityStore: Send + Sync {
    fn get_identity_by_id(&self, id: IdentityId) -> StoreResult<Identity>;
    /// Email match is case-insensitive.
    fn get_identity_by_email(&self, email: &str) -> StoreResult<Identity>;
    fn list_identities(&self) -> StoreResult<Vec<Identity>>;
    fn identities_for_organization(&self, org_id: OrganizationId) -> StoreResult<Vec<Identity>>;

    /// Insert a new identity, ignoring its `id` field. Returns the assigned id.
    fn create_identity(&self, identity: Identity) -> StoreResult<IdentityId>;
    fn update_identity_name(&self, id: IdentityId, first_name: &str, last_name: &str) -> StoreResult<()>;
    fn update_identity_email(&self, id: IdentityId, email: &str) -> StoreResult<()>;
    fn update_identity_role(&self, id: IdentityId, role: Role) -> StoreResult<()>;
    fn update_identity_password(&self, id: IdentityId, password_hash: &str) -> StoreResult<()>;
    fn set_identity_active(&self, id: IdentityId, active: bool) -> StoreResult<()>;
    fn add_affiliation(&self, affiliation: Affiliation) -> StoreResult<()>;
}

pub trait OrganizationStore: Send + Sync {
    fn get_organization_by_id(&self, id: OrganizationId) -> StoreResult<Organization>;
    fn list_organizations(&self) -> StoreResult<Vec<Organization>>;
    fn create_organization(&self, name: &str) -> StoreResult<OrganizationId>;
    fn update_organization_name(&self, id: OrganizationId, name: &str) -> StoreResult<()>;
}

pub trait SessionStore: Send + Sync {
    /// Persist a new session, ignoring its `id` field. Returns the assigned id.
    fn create_session(&self, session: &Session) -> StoreResult<SessionId>;
    /// The returned session carries the owner's current identity row.
    fn get_session_by_token(&self, token: &SessionToken) -> StoreResult<Session>;
    fn sessions_for_identity(
        &self,
        identity_id: IdentityId,
        include_invalid: bool,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Session>>;
    fn revoke_session(&self, id: SessionId) -> StoreResult<()>;
    /// Revoke all sessions of `identity_id` other than `keep`. Returns the number newly revoked.
    fn revoke_sessions_except(&self, identity_id: IdentityId, keep: SessionId) -> StoreResult<usize>;
}

pub trait ApplicationStore: Send + Sync {
    /// Insert a pending application, ignoring its `id`. Returns the assigned id.
    fn create_application(&self, application: Application) -> StoreResult<ApplicationId>;
    fn get_application_by_id(&self, id: ApplicationId) -> StoreResult<Application>;
    fn applications_for_identity(&self, identity_id: IdentityId) -> StoreResult<Vec<Application>>;
    fn applications_for_organization(&self, org_id: OrganizationId) -> StoreResult<Vec<Application>>;
    /// Record the verdict on a pending application. Approval affiliates the applicant
    /// and promotes a `User` to `Driver` in the same write.
    fn decide_application(&self, id: ApplicationId, verdict: Verdict) -> StoreResult<Application>;
}

/// Everything the HTTP layer needs from persistence.
pub trait DataStore: IdentityStore + OrganizationStore + SessionStore + ApplicationStore {}

impl<T: IdentityStore + OrganizationStore + SessionStore + ApplicationStore> DataStore for T {}

#[derive(Debug, Clone)]
struct SessionRow {
    id: SessionId,
    identity_id: IdentityId,
    token: SessionToken,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    is_revoked: bool,
}

#[derive(Debug, Default)]
struct Tables {
    identities: BTreeMap<IdentityId, Identity>,
    organizations: BTreeMap<OrganizationId, Organization>,
    sessions: BTreeMap<SessionId, SessionRow>,
    by_token: HashMap<SessionToken, SessionId>,
    applications: BTreeMap<ApplicationId, Application>,
    next_identity: IdentityId,
    next_organization: OrganizationId,
    next_session: SessionId,
    next_application: ApplicationId,
}

impl Tables {
    fn identity_mut(&mut self, id: IdentityId) -> StoreResult<&mut Identity> {
        self.identities.get_mut(&id).ok_or_else(|| StoreError::NotFound(format!("identity #{}", id)))
    }

    fn application_mut(&mut self, id: ApplicationId) -> StoreResult<&mut Application> {
        self.applications.get_mut(&id).ok_or_else(|| StoreError::NotFound(format!("application #{}", id)))
    }

    fn email_taken(&self, email: &str, except: Option<IdentityId>) -> bool {
        self.identities
            .values()
            .any(|p| Some(p.id) != except && p.email.eq_ignore_ascii_case(email))
    }

    fn hydrate(&self, row: &SessionRow) -> StoreResult<Session> {
        let identity = self
            .identities
            .get(&row.identity_id)
            .cloned()
            .ok_or_else(|| StoreError::Backend(format!("session #{} references missing identity #{}", row.id, row.identity_id)))?;
        Ok(Session {
            id: row.id,
            identity,
            token: row.token,
            created_at: row.created_at,
            expires_at: row.expires_at,
            is_revoked: row.is_revoked,
        })
    }
}

/// Thread-safe in-memory store; clones share the same tables.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }
}

impl IdentityStore for MemoryStore {
    fn get_identity_by_id(&self, id: IdentityId) -> StoreResult<Identity> {
        self.tables
            .read()
            .identities
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("identity #{}", id)))
    }

    fn get_identity_by_email(&self, email: &str) -> StoreResult<Identity> {
        self.tables
            .read()
            .identities
            .values()
            .find(|p| p.email.eq_ignore_ascii_case(email))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("identity by email '{}'", email)))
    }

    fn list_identities(&self) -> StoreResult<Vec<Identity>> {
        Ok(self.tables.read().identities.values().cloned().collect())
    }

    fn identities_for_organization(&self, org_id: OrganizationId) -> StoreResult<Vec<Identity>> {
        let t = self.tables.read();
        if !t.organizations.contains_key(&org_id) {
            return Err(StoreError::NotFound(format!("organization #{}", org_id)));
        }
        Ok(t.identities.values().filter(|p| p.is_affiliated_with(org_id)).cloned().collect())
    }

    fn create_identity(&self, mut identity: Identity) -> StoreResult<IdentityId> {
        let mut t = self.tables.write();
        if t.email_taken(&identity.email, None) {
            return Err(StoreError::Conflict(format!("email '{}' already registered", identity.email)));
        }
        if identity.role == Role::Sponsor && identity.affiliations.len() != 1 {
            return Err(StoreError::InvariantViolation(format!(
                "sponsor must belong to exactly one organization, got {}",
                identity.affiliations.len()
            )));
        }
        if let Some(missing) = identity.affiliations.iter().find(|o| !t.organizations.contains_key(*o)) {
            return Err(StoreError::NotFound(format!("organization #{}", missing)));
        }
        t.next_identity += 1;
        identity.id = t.next_identity;
        let id = identity.id;
        t.identities.insert(id, identity);
        Ok(id)
    }

    fn update_identity_name(&self, id: IdentityId, first_name: &str, last_name: &str) -> StoreResult<()> {
        let mut t = self.tables.write();
        let p = t.identity_mut(id)?;
        p.first_name = first_name.to_string();
        p.last_name = last_name.to_string();
        Ok(())
    }

    fn update_identity_email(&self, id: IdentityId, email: &str) -> StoreResult<()> {
        let mut t = self.tables.write();
        if t.email_taken(email, Some(id)) {
            return Err(StoreError::Conflict(format!("email '{}' already registered", email)));
        }
        t.identity_mut(id)?.email = email.to_string();
        Ok(())
    }

    fn update_identity_role(&self, id: IdentityId, role: Role) -> StoreResult<()> {
        let mut t = self.tables.write();
        let p = t.identity_mut(id)?;
        if role == Role::Sponsor && p.affiliations.len() != 1 {
            return Err(StoreError::InvariantViolation(format!(
                "identity #{} has {} affiliations and cannot become a sponsor",
                id,
                p.affiliations.len()
            )));
        }
        p.role = role;
        Ok(())
    }

    fn update_identity_password(&self, id: IdentityId, password_hash: &str) -> StoreResult<()> {
        self.tables.write().identity_mut(id)?.password_hash = password_hash.to_string();
        Ok(())
    }

    fn set_identity_active(&self, id: IdentityId, active: bool) -> StoreResult<()> {
        self.tables.write().identity_mut(id)?.is_active = active;
        Ok(())
    }

    fn add_affiliation(&self, affiliation: Affiliation) -> StoreResult<()> {
        let mut t = self.tables.write();
        if !t.organizations.contains_key(&affiliation.organization_id) {
            return Err(StoreError::NotFound(format!("organization #{}", affiliation.organization_id)));
        }
        let p = t.identity_mut(affiliation.identity_id)?;
        if p.is_affiliated_with(affiliation.organization_id) {
            return Ok(());
        }
        if p.role == Role::Sponsor && !p.affiliations.is_empty() {
            return Err(StoreError::InvariantViolation(format!(
                "sponsor #{} already belongs to an organization",
                p.id
            )));
        }
        p.affiliations.insert(affiliation.organization_id);
        Ok(())
    }
}

impl OrganizationStore for MemoryStore {
    fn get_organization_by_id(&self, id: OrganizationId) -> StoreResult<Organization> {
        self.tables
            .read()
            .organizations
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("organization #{}", id)))
    }

    fn list_organizations(&self) -> StoreResult<Vec<Organization>> {
        Ok(self.tables.read().organizations.values().cloned().collect())
    }

    fn create_organization(&self, name: &str) -> StoreResult<OrganizationId> {
        let mut t = self.tables.write();
        t.next_organization += 1;
        let id = t.next_organization;
        t.organizations.insert(id, Organization { id, name: name.to_string() });
        Ok(id)
    }

    fn update_organization_name(&self, id: OrganizationId, name: &str) -> StoreResult<()> {
        let mut t = self.tables.write();
        let org = t
            .organizations
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("organization #{}", id)))?;
        org.name = name.to_string();
        Ok(())
    }
}

impl SessionStore for MemoryStore {
    fn create_session(&self, session: &Session) -> StoreResult<SessionId> {
        let mut t = self.tables.write();
        if !t.identities.contains_key(&session.identity.id) {
            return Err(StoreError::NotFound(format!("identity #{}", session.identity.id)));
        }
        if t.by_token.contains_key(&session.token) {
            return Err(StoreError::Conflict("session token already in use".into()));
        }
        t.next_session += 1;
        let id = t.next_session;
        t.by_token.insert(session.token, id);
        t.sessions.insert(
            id,
            SessionRow {
                id,
                identity_id: session.identity.id,
                token: session.token,
                created_at: session.created_at,
                expires_at: session.expires_at,
                is_revoked: false,
            },
        );
        Ok(id)
    }

    fn get_session_by_token(&self, token: &SessionToken) -> StoreResult<Session> {
        let t = self.tables.read();
        let row = t
            .by_token
            .get(token)
            .and_then(|id| t.sessions.get(id))
            .ok_or_else(|| StoreError::NotFound("no session for token".into()))?;
        t.hydrate(row)
    }

    fn sessions_for_identity(
        &self,
        identity_id: IdentityId,
        include_invalid: bool,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Session>> {
        let t = self.tables.read();
        let mut out = Vec::new();
        for row in t.sessions.values().filter(|r| r.identity_id == identity_id) {
            let s = t.hydrate(row)?;
            if include_invalid || s.is_valid_at(now) {
                out.push(s);
            }
        }
        Ok(out)
    }

    fn revoke_session(&self, id: SessionId) -> StoreResult<()> {
        let mut t = self.tables.write();
        let row = t
            .sessions
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("session #{}", id)))?;
        row.is_revoked = true;
        Ok(())
    }

    fn revoke_sessions_except(&self, identity_id: IdentityId, keep: SessionId) -> StoreResult<usize> {
        let mut t = self.tables.write();
        let mut count = 0usize;
        for row in t.sessions.values_mut() {
            if row.identity_id == identity_id && row.id != keep && !row.is_revoked {
                row.is_revoked = true;
                count += 1;
            }
        }
        Ok(count)
    }
}

fn may_apply(role: Role) -> bool { matches!(role, Role::User | Role::Driver) }

impl ApplicationStore for MemoryStore {
    fn create_application(&self, mut application: Application) -> StoreResult<ApplicationId> {
        let mut t = self.tables.write();
        if !t.organizations.contains_key(&application.organization_id) {
            return Err(StoreError::NotFound(format!("organization #{}", application.organization_id)));
        }
        let applicant = t
            .identities
            .get(&application.applicant_id)
            .ok_or_else(|| StoreError::NotFound(format!("identity #{}", application.applicant_id)))?;
        if !may_apply(applicant.role) {
            return Err(StoreError::InvariantViolation(format!(
                "identity #{} is a {} and cannot apply to an organization",
                applicant.id, applicant.role
            )));
        }
        if applicant.is_affiliated_with(application.organization_id) {
            return Err(StoreError::Conflict(format!(
                "identity #{} already belongs to organization #{}",
                applicant.id, application.organization_id
            )));
        }
        let pending = t.applications.values().any(|a| {
            a.applicant_id == application.applicant_id
                && a.organization_id == application.organization_id
                && a.is_pending()
        });
        if pending {
            return Err(StoreError::Conflict("an application to this organization is already pending".into()));
        }
        t.next_application += 1;
        application.id = t.next_application;
        application.approved = None;
        application.decided_at = None;
        let id = application.id;
        t.applications.insert(id, application);
        Ok(id)
    }

    fn get_application_by_id(&self, id: ApplicationId) -> StoreResult<Application> {
        self.tables
            .read()
            .applications
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("application #{}", id)))
    }

    fn applications_for_identity(&self, identity_id: IdentityId) -> StoreResult<Vec<Application>> {
        let t = self.tables.read();
        if !t.identities.contains_key(&identity_id) {
            return Err(StoreError::NotFound(format!("identity #{}", identity_id)));
        }
        Ok(t.applications.values().filter(|a| a.applicant_id == identity_id).cloned().collect())
    }

    fn applications_for_organization(&self, org_id: OrganizationId) -> StoreResult<Vec<Application>> {
        let t = self.tables.read();
        if !t.organizations.contains_key(&org_id) {
            return Err(StoreError::NotFound(format!("organization #{}", org_id)));
        }
        Ok(t.applications.values().filter(|a| a.organization_id == org_id).cloned().collect())
    }

    fn decide_application(&self, id: ApplicationId, verdict: Verdict) -> StoreResult<Application> {
        let mut t = self.tables.write();
        let (applicant_id, org_id) = {
            let app = t.application_mut(id)?;
            if !app.is_pending() {
                return Err(StoreError::Conflict(format!("application #{} was already decided", id)));
            }
            (app.applicant_id, app.organization_id)
        };
        if verdict.approved {
            let applicant = t.identity_mut(applicant_id)?;
            if !may_apply(applicant.role) {
                return Err(StoreError::InvariantViolation(format!(
                    "identity #{} is a {} and cannot join organization #{}",
                    applicant_id, applicant.role, org_id
                )));
            }
            applicant.affiliations.insert(org_id);
            if applicant.role == Role::User {
                applicant.role = Role::Driver;
            }
        }
        let app = t.application_mut(id)?;
        app.approved = Some(verdict.approved);
        app.reason = verdict.reason;
        app.decided_at = Some(verdict.decided_at);
        Ok(app.clone())
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
