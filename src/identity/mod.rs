//! Session lifecycle and layered authorization for driver_rewards.
//! Keep the public surface thin and split implementation across sub-modules.

mod principal;
mod application;
mod session;
mod store;
mod provider;
mod request_context;
mod authorizer;

pub use principal::{Affiliation, Identity, IdentityId, Organization, OrganizationId, Role};
pub use application::{Application, ApplicationId, Verdict};
pub use session::{
    session_clock_now, session_ttl, MalformedToken, Session, SessionError, SessionId, SessionManager,
    SessionToken, SESSION_TTL_SECS,
};
pub use store::{
    ApplicationStore, DataStore, IdentityStore, MemoryStore, OrganizationStore, SessionStore, StoreError,
    StoreResult,
};
pub use provider::{AuthProvider, LocalAuthProvider, LoginError, LoginRequest, LoginResponse};
pub use request_context::{resolve_context, RequestContext};
pub use authorizer::{
    sponsor_organization, Decision, Denial, DenyKind, IdentityPolicy, OrganizationPolicy, PolicyConfigError,
    RolePolicy,
};
