use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::tprintln;

use super::principal::{Identity, IdentityId};
use super::store::{SessionStore, StoreError};

pub type SessionId = i64;

/// Hard upper bound on the lifetime of a login session. Sessions may be revoked sooner.
pub const SESSION_TTL_SECS: i64 = 6 * 60 * 60;

pub fn session_ttl() -> Duration { Duration::seconds(SESSION_TTL_SECS) }

/// Session timestamps are kept at whole-second precision.
pub fn session_clock_now() -> DateTime<Utc> { Utc::now().trunc_subsecs(0) }

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("secure random source failed while generating session token: {0}")]
    TokenGeneration(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed session token")]
pub struct MalformedToken;

/// Secret bearer value shared between the API server and one client.
/// A random UUIDv4; `Debug` never prints the value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(Uuid);

impl SessionToken {
    pub fn generate() -> Result<Self, SessionError> {
        let mut buf = [0u8; 16];
        getrandom::getrandom(&mut buf).map_err(|e| SessionError::TokenGeneration(e.to_string()))?;
        Ok(Self(uuid::Builder::from_random_bytes(buf).into_uuid()))
    }

    /// Parse the textual token a client presented. Anything that is not a UUID is malformed.
    pub fn parse(raw: &str) -> Result<Self, MalformedToken> {
        Uuid::parse_str(raw).map(Self).map_err(|_| MalformedToken)
    }

    pub fn as_uuid(&self) -> &Uuid { &self.0 }
}

impl FromStr for SessionToken {
    type Err = MalformedToken;
    fn from_str(s: &str) -> Result<Self, Self::Err> { Self::parse(s) }
}

impl Display for SessionToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { Display::fmt(&self.0.hyphenated(), f) }
}

impl Debug for SessionToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str("SessionToken(..)") }
}

/// Server-side record of one successful login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Not secret. Zero until the session store assigns one.
    pub id: SessionId,
    /// Snapshot of the owning identity as of the last store read.
    pub identity: Identity,
    pub token: SessionToken,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_revoked: bool,
}

impl Session {
    /// Valid iff not revoked, owner active, and `created_at <= now < expires_at`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked
            && self.identity.is_active
            && now >= self.created_at
            && now < self.expires_at
    }

    pub fn identity_id(&self) -> IdentityId { self.identity.id }
}

/// Creates, validates and revokes login sessions on top of a [`SessionStore`].
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>) -> Self { Self { store } }

    /// Build an unpersisted session for `identity` starting at `now`.
    pub fn new_session(identity: Identity, now: DateTime<Utc>) -> Result<Session, SessionError> {
        let token = SessionToken::generate()?;
        Ok(Session {
            id: 0,
            identity,
            token,
            created_at: now,
            expires_at: now + session_ttl(),
            is_revoked: false,
        })
    }

    pub fn create(&self, identity: Identity) -> Result<Session, SessionError> {
        self.create_at(identity, session_clock_now())
    }

    /// Issue and persist a session for an already verified identity. Never retries.
    pub fn create_at(&self, identity: Identity, now: DateTime<Utc>) -> Result<Session, SessionError> {
        let mut session = Self::new_session(identity, now)?;
        session.id = self.store.create_session(&session)?;
        info!(
            identity_id = session.identity.id,
            session_id = session.id,
            ttl_secs = SESSION_TTL_SECS,
            "session.create"
        );
        Ok(session)
    }

    /// Pure validity predicate; performs no I/O.
    pub fn validate(session: &Session, now: DateTime<Utc>) -> bool { session.is_valid_at(now) }

    /// Flip the revoked flag. Revoking an already revoked session is not an error.
    pub fn revoke(&self, session_id: SessionId) -> Result<(), SessionError> {
        self.store.revoke_session(session_id)?;
        tprintln!("session.revoke sid={}", session_id);
        debug!(session_id, "session.revoke");
        Ok(())
    }

    /// Revoke every session owned by `identity_id` except `keep`. Returns how many were newly revoked.
    pub fn revoke_all_except(&self, identity_id: IdentityId, keep: SessionId) -> Result<usize, SessionError> {
        let count = self.store.revoke_sessions_except(identity_id, keep)?;
        info!(identity_id, kept_session_id = keep, count, "session.revoke_all_except");
        Ok(count)
    }

    pub fn sessions_for(
        &self,
        identity_id: IdentityId,
        include_invalid: bool,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, SessionError> {
        Ok(self.store.sessions_for_identity(identity_id, include_invalid, now)?)
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> { &self.store }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::principal::Role;
    use crate::identity::store::{IdentityStore, MemoryStore};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> { Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() }

    fn fixture() -> (MemoryStore, SessionManager, Identity) {
        let store = MemoryStore::new();
        let id = store.create_identity(Identity::new(0, "driver@example.com", Role::Driver)).unwrap();
        let identity = store.get_identity_by_id(id).unwrap();
        let sm = SessionManager::new(Arc::new(store.clone()));
        (store, sm, identity)
    }

    #[test]
    fn new_session_expires_exactly_one_ttl_after_creation() {
        let s = SessionManager::new_session(Identity::new(1, "a@b.c", Role::User), t0()).unwrap();
        assert_eq!(s.expires_at - s.created_at, session_ttl());
        assert!(!s.is_revoked);
        assert_eq!(s.id, 0);
    }

    #[test]
    fn tokens_are_distinct_v4_uuids() {
        let a = SessionToken::generate().unwrap();
        let b = SessionToken::generate().unwrap();
        assert_ne!(a, b);
        assert_eq!(a.as_uuid().get_version_num(), 4);
    }

    #[test]
    fn token_parse_accepts_display_form_and_rejects_garbage() {
        let t = SessionToken::generate().unwrap();
        assert_eq!(SessionToken::parse(&t.to_string()), Ok(t));
        assert_eq!(SessionToken::parse("not-a-token"), Err(MalformedToken));
        assert_eq!(SessionToken::parse(""), Err(MalformedToken));
    }

    #[test]
    fn token_debug_is_redacted() {
        let t = SessionToken::generate().unwrap();
        assert!(!format!("{:?}", t).contains(&t.to_string()));
    }

    #[test]
    fn validity_window_is_half_open() {
        let s = SessionManager::new_session(Identity::new(1, "a@b.c", Role::User), t0()).unwrap();
        assert!(!SessionManager::validate(&s, t0() - Duration::seconds(1)));
        assert!(SessionManager::validate(&s, t0()));
        assert!(SessionManager::validate(&s, s.expires_at - Duration::seconds(1)));
        assert!(!SessionManager::validate(&s, s.expires_at));
    }

    #[test]
    fn revoked_or_deactivated_sessions_are_invalid() {
        let mut s = SessionManager::new_session(Identity::new(1, "a@b.c", Role::User), t0()).unwrap();
        s.is_revoked = true;
        assert!(!s.is_valid_at(t0()));
        s.is_revoked = false;
        s.identity.is_active = false;
        assert!(!s.is_valid_at(t0()));
    }

    #[test]
    fn create_persists_and_assigns_id() {
        let (store, sm, identity) = fixture();
        let s = sm.create_at(identity, t0()).unwrap();
        assert!(s.id > 0);
        let fetched = store.get_session_by_token(&s.token).unwrap();
        assert_eq!(fetched.id, s.id);
        assert_eq!(fetched.expires_at, s.expires_at);
    }

    #[test]
    fn revoke_is_idempotent() {
        let (store, sm, identity) = fixture();
        let s = sm.create_at(identity, t0()).unwrap();
        sm.revoke(s.id).unwrap();
        let once = store.get_session_by_token(&s.token).unwrap();
        sm.revoke(s.id).unwrap();
        let twice = store.get_session_by_token(&s.token).unwrap();
        assert!(once.is_revoked);
        assert_eq!(once, twice);
    }

    #[test]
    fn revoke_unknown_session_reports_not_found() {
        let (_store, sm, _identity) = fixture();
        assert!(matches!(sm.revoke(4242), Err(SessionError::Store(StoreError::NotFound(_)))));
    }

    #[test]
    fn sessions_for_filters_invalid_unless_asked() {
        let (_store, sm, identity) = fixture();
        let a = sm.create_at(identity.clone(), t0()).unwrap();
        let b = sm.create_at(identity.clone(), t0()).unwrap();
        sm.revoke(a.id).unwrap();
        let live = sm.sessions_for(identity.id, false, t0()).unwrap();
        assert_eq!(live.iter().map(|s| s.id).collect::<Vec<_>>(), vec![b.id]);
        let all = sm.sessions_for(identity.id, true, t0()).unwrap();
        assert_eq!(all.len(), 2);
        let later = sm.sessions_for(identity.id, false, t0() + session_ttl()).unwrap();
        assert!(later.is_empty());
    }
}
