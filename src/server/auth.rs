use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::{Extension, Json};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{blocking, clear_session_cookie, session_cookie, AppState};
use crate::error::{AppError, AppResult};
use crate::identity::{Identity, IdentityId, LoginRequest, RequestContext, Role};
use crate::password::{hash_password, validate_new_password, verify_password};

/// W3C HTML5 email address grammar.
static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
    )
    .expect("email regex compiles")
});

pub(crate) fn is_valid_email(email: &str) -> bool { EMAIL_RE.is_match(email) }

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginPayload {
    email: String,
    password: String,
}

pub async fn login(State(state): State<AppState>, Json(payload): Json<LoginPayload>) -> AppResult<(HeaderMap, Json<Identity>)> {
    if payload.email.is_empty() {
        return Err(AppError::user("bad_input", "email cannot be blank"));
    }
    if payload.password.is_empty() {
        return Err(AppError::user("bad_input", "password cannot be blank"));
    }
    let provider = state.auth.clone();
    let req = LoginRequest { email: payload.email, password: payload.password };
    let resp = blocking(move || provider.login(&req).map_err(AppError::from)).await?;

    let mut headers = HeaderMap::new();
    let cookie = session_cookie(&state.config, &resp.session.token)
        .ok_or_else(|| AppError::internal("cookie", "failed to encode session cookie"))?;
    headers.insert(header::SET_COOKIE, cookie);
    Ok((headers, Json(resp.session.identity)))
}

pub async fn logout(State(state): State<AppState>, Extension(ctx): Extension<RequestContext>) -> AppResult<(StatusCode, HeaderMap)> {
    if let Some(session) = ctx.session() {
        state.sessions.revoke(session.id)?;
        info!(identity_id = session.identity.id, session_id = session.id, "auth.logout");
    }
    let mut headers = HeaderMap::new();
    if let Some(v) = clear_session_cookie(&state.config) {
        headers.insert(header::SET_COOKIE, v);
    }
    Ok((StatusCode::NO_CONTENT, headers))
}

/// The caller's identity, or `null` when anonymous.
pub async fn whoami(Extension(ctx): Extension<RequestContext>) -> Json<Option<Identity>> { Json(ctx.identity().cloned()) }

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistrationPayload {
    first_name: String,
    last_name: String,
    email: String,
    password: String,
}

impl RegistrationPayload {
    fn validate(&self) -> Option<&'static str> {
        if !is_valid_email(&self.email) {
            return Some("Invalid email address.");
        }
        if self.first_name.is_empty() {
            return Some("First Name cannot be blank.");
        }
        if self.last_name.is_empty() {
            return Some("Last Name cannot be blank.");
        }
        validate_new_password(&self.password)
    }
}

#[derive(Debug, Serialize)]
pub struct Created {
    pub id: i64,
}

pub async fn register(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(payload): Json<RegistrationPayload>,
) -> AppResult<(StatusCode, Json<Created>)> {
    if !ctx.is_anonymous() {
        return Err(AppError::forbidden("already_authenticated", "Cannot register while logged in."));
    }
    if let Some(msg) = payload.validate() {
        return Err(AppError::user("bad_input", msg));
    }
    let RegistrationPayload { first_name, last_name, email, password } = payload;
    let password_hash = blocking(move || Ok(hash_password(&password)?)).await?;

    let mut identity = Identity::new(0, email, Role::User);
    identity.first_name = first_name;
    identity.last_name = last_name;
    identity.password_hash = password_hash;
    let id: IdentityId = state.store.create_identity(identity)?;
    info!(identity_id = id, "account.register");
    Ok((StatusCode::CREATED, Json(Created { id })))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PasswordChangePayload {
    #[serde(default)]
    current_password: String,
    new_password: String,
}

/// Change the caller's own password, then revoke every other session they hold.
pub async fn change_password(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(payload): Json<PasswordChangePayload>,
) -> AppResult<StatusCode> {
    let session = ctx.authorize(&state.policies.any_session)?;
    if payload.current_password.is_empty() {
        return Err(AppError::user("bad_input", "Current Password cannot be blank."));
    }
    if let Some(msg) = validate_new_password(&payload.new_password) {
        return Err(AppError::user("bad_input", msg));
    }

    let current = state.store.get_identity_by_id(session.identity.id)?;
    let PasswordChangePayload { current_password, new_password } = payload;
    let new_hash = blocking(move || {
        if !verify_password(&current.password_hash, &current_password) {
            return Err(AppError::forbidden("bad_password", "Current password was incorrect."));
        }
        Ok(hash_password(&new_password)?)
    })
    .await?;

    state.store.update_identity_password(session.identity.id, &new_hash)?;
    state.sessions.revoke_all_except(session.identity.id, session.id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_validation() {
        assert!(is_valid_email("driver@example.com"));
        assert!(is_valid_email("first.last+tag@sub.example.co"));
        assert!(!is_valid_email("no-at-sign"));
        assert!(!is_valid_email("a@"));
        assert!(!is_valid_email("a@-bad.com"));
        assert!(!is_valid_email(""));
    }

    #[test]
    fn registration_validation_messages() {
        let mut p = RegistrationPayload {
            first_name: "Ada".into(),
            last_name: "Driver".into(),
            email: "ada@example.com".into(),
            password: "longenough".into(),
        };
        assert_eq!(p.validate(), None);
        p.password = "short".into();
        assert_eq!(p.validate(), Some("Password must be at least 8 characters long."));
        p.last_name.clear();
        assert_eq!(p.validate(), Some("Last Name cannot be blank."));
        p.email = "nope".into();
        assert_eq!(p.validate(), Some("Invalid email address."));
    }
}
