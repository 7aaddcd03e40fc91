use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;
use tracing::info;

use super::auth::{is_valid_email, Created};
use super::{blocking, AppState};
use crate::error::{AppError, AppResult};
use crate::identity::{
    Affiliation, Identity, IdentityId, OrganizationId, RequestContext, Role, Session,
};
use crate::password::{hash_password, validate_new_password};

fn require_admin<'a>(state: &AppState, ctx: &'a RequestContext) -> AppResult<&'a Session> {
    Ok(ctx.authorize(&state.policies.admin)?)
}

pub async fn list_users(State(state): State<AppState>, Extension(ctx): Extension<RequestContext>) -> AppResult<Json<Vec<Identity>>> {
    require_admin(&state, &ctx)?;
    Ok(Json(state.store.list_identities()?))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NamePayload {
    first_name: String,
    last_name: String,
}

pub async fn set_name(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<IdentityId>,
    Json(payload): Json<NamePayload>,
) -> AppResult<StatusCode> {
    require_admin(&state, &ctx)?;
    if payload.first_name.is_empty() {
        return Err(AppError::user("bad_input", "First name cannot be blank."));
    }
    if payload.last_name.is_empty() {
        return Err(AppError::user("bad_input", "Last name cannot be blank."));
    }
    state.store.update_identity_name(id, &payload.first_name, &payload.last_name)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmailPayload {
    email: String,
}

pub async fn set_email(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<IdentityId>,
    Json(payload): Json<EmailPayload>,
) -> AppResult<StatusCode> {
    require_admin(&state, &ctx)?;
    if !is_valid_email(&payload.email) {
        return Err(AppError::user("bad_input", "Invalid email address."));
    }
    state.store.update_identity_email(id, &payload.email)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PasswordPayload {
    new_password: String,
}

/// Reset a user's password and sign them out everywhere except the calling admin session.
pub async fn set_password(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<IdentityId>,
    Json(payload): Json<PasswordPayload>,
) -> AppResult<StatusCode> {
    let admin = require_admin(&state, &ctx)?;
    if let Some(msg) = validate_new_password(&payload.new_password) {
        return Err(AppError::user("bad_input", msg));
    }
    let new_password = payload.new_password;
    let hash = blocking(move || Ok(hash_password(&new_password)?)).await?;
    state.store.update_identity_password(id, &hash)?;
    state.sessions.revoke_all_except(id, admin.id)?;
    info!(admin_id = admin.identity.id, identity_id = id, "admin.password_reset");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn activate(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<IdentityId>,
) -> AppResult<StatusCode> {
    require_admin(&state, &ctx)?;
    state.store.set_identity_active(id, true)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Deactivation invalidates every session of the identity on its next use.
pub async fn deactivate(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<IdentityId>,
) -> AppResult<StatusCode> {
    let admin = require_admin(&state, &ctx)?;
    state.store.set_identity_active(id, false)?;
    info!(admin_id = admin.identity.id, identity_id = id, "admin.deactivate");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RolePayload {
    role: Role,
}

pub async fn set_role(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<IdentityId>,
    Json(payload): Json<RolePayload>,
) -> AppResult<StatusCode> {
    require_admin(&state, &ctx)?;
    state.store.update_identity_role(id, payload.role)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AffiliationPayload {
    organization_id: OrganizationId,
}

pub async fn add_affiliation(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<IdentityId>,
    Json(payload): Json<AffiliationPayload>,
) -> AppResult<StatusCode> {
    require_admin(&state, &ctx)?;
    state
        .store
        .add_affiliation(Affiliation { identity_id: id, organization_id: payload.organization_id })?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn create_organization(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(payload): Json<super::sponsor::OrganizationPayload>,
) -> AppResult<(StatusCode, Json<Created>)> {
    require_admin(&state, &ctx)?;
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::user("bad_input", "Name cannot be blank."));
    }
    let id = state.store.create_organization(name)?;
    Ok((StatusCode::CREATED, Json(Created { id })))
}
