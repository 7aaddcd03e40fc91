//! Sponsor control panel. The organization is always the caller's own, read from the
//! session, so one sponsor can never address another sponsor's organization.

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;

use super::directory::drivers_of;
use super::AppState;
use crate::error::{AppError, AppResult};
use crate::identity::{
    sponsor_organization, Application, Identity, Organization, OrganizationId, OrganizationPolicy,
    RequestContext,
};

fn own_organization(state: &AppState, ctx: &RequestContext) -> AppResult<OrganizationId> {
    state.policies.sponsor.evaluate(ctx.session()).into_result()?;
    let org_id = sponsor_organization(ctx.session())?;
    OrganizationPolicy::member_of(org_id).evaluate(ctx.session()).into_result()?;
    Ok(org_id)
}

pub async fn get_own_organization(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> AppResult<Json<Organization>> {
    let org_id = own_organization(&state, &ctx)?;
    Ok(Json(state.store.get_organization_by_id(org_id)?))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrganizationPayload {
    pub(crate) name: String,
}

pub async fn update_own_organization(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(payload): Json<OrganizationPayload>,
) -> AppResult<StatusCode> {
    let org_id = own_organization(&state, &ctx)?;
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::user("bad_input", "Name cannot be blank."));
    }
    state.store.update_organization_name(org_id, name)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn own_drivers(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> AppResult<Json<Vec<Identity>>> {
    let org_id = own_organization(&state, &ctx)?;
    Ok(Json(drivers_of(&state, org_id)?))
}

/// Applications submitted to the sponsor's organization, pending and decided.
pub async fn own_applications(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> AppResult<Json<Vec<Application>>> {
    let org_id = own_organization(&state, &ctx)?;
    Ok(Json(state.store.applications_for_organization(org_id)?))
}
