use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::password::verify_password;
use crate::tprintln;

use super::session::{Session, SessionError, SessionManager};
use super::store::{IdentityStore, StoreError};

#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct LoginResponse {
    pub session: Session,
}

#[derive(Debug, Error)]
pub enum LoginError {
    /// Unknown email and wrong password are deliberately indistinguishable.
    #[error("invalid_credentials")]
    InvalidCredentials,
    #[error("account is deactivated")]
    Deactivated,
    #[error("identity lookup failed: {0}")]
    Store(StoreError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

pub trait AuthProvider: Send + Sync {
    fn login(&self, req: &LoginRequest) -> Result<LoginResponse, LoginError>;
}

/// Email + password login against the identity store.
pub struct LocalAuthProvider {
    identities: Arc<dyn IdentityStore>,
    sm: SessionManager,
}

impl LocalAuthProvider {
    pub fn new(identities: Arc<dyn IdentityStore>, sm: SessionManager) -> Self { Self { identities, sm } }
}

impl AuthProvider for LocalAuthProvider {
    fn login(&self, req: &LoginRequest) -> Result<LoginResponse, LoginError> {
        let identity = match self.identities.get_identity_by_email(&req.email) {
            Ok(p) => p,
            Err(StoreError::NotFound(_)) => return Err(LoginError::InvalidCredentials),
            Err(e) => return Err(LoginError::Store(e)),
        };
        if !verify_password(&identity.password_hash, &req.password) {
            return Err(LoginError::InvalidCredentials);
        }
        if !identity.is_active {
            return Err(LoginError::Deactivated);
        }
        let identity_id = identity.id;
        let session = self.sm.create(identity)?;
        tprintln!("auth.login identity={} sid={}", identity_id, session.id);
        info!(identity_id, session_id = session.id, "auth.login");
        Ok(LoginResponse { session })
    }
}
