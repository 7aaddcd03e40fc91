use chrono::{DateTime, Utc};
use tracing::{debug, error};

use super::authorizer::{Decision, Denial, RolePolicy};
use super::principal::Identity;
use super::session::{Session, SessionToken};
use super::store::{SessionStore, StoreError};

/// Per-request authentication state, passed explicitly to guards and handlers.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Present only when the presented token maps to a currently valid session.
    pub session: Option<Session>,
    /// The client's stored credential is stale and should be dropped by the transport.
    pub discard_credential: bool,
}

impl RequestContext {
    pub fn anonymous() -> Self { Self::default() }

    pub fn authenticated(session: Session) -> Self { Self { session: Some(session), discard_credential: false } }

    fn stale() -> Self { Self { session: None, discard_credential: true } }

    pub fn session(&self) -> Option<&Session> { self.session.as_ref() }

    pub fn identity(&self) -> Option<&Identity> { self.session.as_ref().map(|s| &s.identity) }

    pub fn is_anonymous(&self) -> bool { self.session.is_none() }

    pub fn require_session(&self) -> Result<&Session, Denial> {
        self.session().ok_or_else(|| Denial::unauthenticated("endpoint requires a session"))
    }

    /// Evaluate `policy` against this request and hand back the session it admitted.
    pub fn authorize(&self, policy: &RolePolicy) -> Result<&Session, Denial> {
        match (policy.evaluate(self.session()), self.session()) {
            (Decision::Allow, Some(session)) => Ok(session),
            (Decision::Deny(denial), _) => Err(denial),
            (Decision::Allow, None) => Err(Denial::internal("role policy admitted a request without a session")),
        }
    }
}

/// Turn the raw token a client presented (if any) into a [`RequestContext`].
///
/// - no token: anonymous
/// - token that does not parse: hard `Unauthenticated` failure
/// - unknown token, or a session that is expired, revoked or owned by a deactivated
///   identity: anonymous, and the client credential is marked for discarding
/// - otherwise the session is attached
///
/// Performs exactly one store read.
pub fn resolve_context<S: SessionStore + ?Sized>(
    store: &S,
    raw_token: Option<&str>,
    now: DateTime<Utc>,
) -> Result<RequestContext, Denial> {
    let Some(raw) = raw_token else { return Ok(RequestContext::anonymous()) };
    let token = SessionToken::parse(raw).map_err(|_| Denial::unauthenticated("bad login token"))?;
    let session = match store.get_session_by_token(&token) {
        Ok(s) => s,
        Err(StoreError::NotFound(_)) => {
            debug!("context.unknown_token");
            return Ok(RequestContext::stale());
        }
        Err(e) => {
            error!("context.session_lookup_failed: {}", e);
            return Err(Denial::internal("failed to retrieve session"));
        }
    };
    if !session.is_valid_at(now) {
        debug!(
            session_id = session.id,
            identity_id = session.identity.id,
            revoked = session.is_revoked,
            active = session.identity.is_active,
            "context.invalid_session"
        );
        return Ok(RequestContext::stale());
    }
    Ok(RequestContext::authenticated(session))
}
