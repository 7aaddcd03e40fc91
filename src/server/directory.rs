use axum::extract::{Path, State};
use axum::{Extension, Json};

use super::AppState;
use crate::error::AppResult;
use crate::identity::{
    Identity, IdentityId, IdentityPolicy, Organization, OrganizationId, OrganizationPolicy, RequestContext, Role,
};

/// A profile is visible to its owner, to admins, and to sponsors of an organization the driver belongs to.
pub async fn get_user(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<IdentityId>,
) -> AppResult<Json<Identity>> {
    IdentityPolicy::owner(id)
        .with_admin_override()
        .with_sponsor_override()
        .evaluate(ctx.session(), state.store.as_ref())
        .into_result()?;
    Ok(Json(state.store.get_identity_by_id(id)?))
}

pub async fn list_organizations(State(state): State<AppState>) -> AppResult<Json<Vec<Organization>>> {
    Ok(Json(state.store.list_organizations()?))
}

/// Drivers of an organization, for its sponsor or any admin.
pub async fn organization_drivers(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(org_id): Path<OrganizationId>,
) -> AppResult<Json<Vec<Identity>>> {
    let session = ctx.session();
    state
        .policies
        .sponsor_or_admin
        .evaluate(session)
        .and_then(|| OrganizationPolicy::member_of(org_id).with_admin_override().evaluate(session))
        .into_result()?;
    Ok(Json(drivers_of(&state, org_id)?))
}

pub(crate) fn drivers_of(state: &AppState, org_id: OrganizationId) -> AppResult<Vec<Identity>> {
    let members = state.store.identities_for_organization(org_id)?;
    Ok(members.into_iter().filter(|p| p.role == Role::Driver).collect())
}
