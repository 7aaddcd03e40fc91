//! Sponsorship applications. A user or driver applies to an organization; that
//! organization's sponsor (or an admin) approves or rejects. Approval affiliates
//! the applicant and turns a plain user into a driver.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;
use tracing::info;

use super::auth::Created;
use super::AppState;
use crate::error::{AppError, AppResult};
use crate::identity::{
    session_clock_now, sponsor_organization, Application, ApplicationId, Decision, IdentityId, IdentityPolicy,
    OrganizationId, OrganizationPolicy, RequestContext, Role, Session, Verdict,
};

/// Sponsor of `org_id`, or any admin.
fn organization_reviewer(state: &AppState, session: Option<&Session>, org_id: OrganizationId) -> Decision {
    state
        .policies
        .sponsor_or_admin
        .evaluate(session)
        .and_then(|| OrganizationPolicy::member_of(org_id).with_admin_override().evaluate(session))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubmissionPayload {
    organization_id: OrganizationId,
    #[serde(default)]
    comment: String,
}

pub async fn submit(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(payload): Json<SubmissionPayload>,
) -> AppResult<(StatusCode, Json<Created>)> {
    let session = ctx.authorize(&state.policies.applicant)?;
    let applicant_id = session.identity.id;
    let application = Application::new(applicant_id, payload.organization_id, payload.comment.trim(), session_clock_now());
    let id = state.store.create_application(application)?;
    info!(identity_id = applicant_id, org_id = payload.organization_id, application_id = id, "application.submit");
    Ok((StatusCode::CREATED, Json(Created { id })))
}

pub async fn mine(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> AppResult<Json<Vec<Application>>> {
    let session = ctx.authorize(&state.policies.any_session)?;
    Ok(Json(state.store.applications_for_identity(session.identity.id)?))
}

/// Visible to the applicant and to reviewers of the target organization.
pub async fn get_by_id(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<ApplicationId>,
) -> AppResult<Json<Application>> {
    ctx.authorize(&state.policies.any_session)?;
    let application = state.store.get_application_by_id(id)?;
    IdentityPolicy::owner(application.applicant_id)
        .evaluate(ctx.session(), state.store.as_ref())
        .or_else(|| organization_reviewer(&state, ctx.session(), application.organization_id))
        .into_result()?;
    Ok(Json(application))
}

/// A sponsor reaching a driver through the override only sees applications to its own organization.
pub async fn for_person(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<IdentityId>,
) -> AppResult<Json<Vec<Application>>> {
    IdentityPolicy::owner(id)
        .with_admin_override()
        .with_sponsor_override()
        .evaluate(ctx.session(), state.store.as_ref())
        .into_result()?;
    let mut applications = state.store.applications_for_identity(id)?;
    if let Some(caller) = ctx.identity() {
        if caller.role == Role::Sponsor && caller.id != id {
            let org_id = sponsor_organization(ctx.session())?;
            applications.retain(|a| a.organization_id == org_id);
        }
    }
    Ok(Json(applications))
}

pub async fn for_organization(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(org_id): Path<OrganizationId>,
) -> AppResult<Json<Vec<Application>>> {
    organization_reviewer(&state, ctx.session(), org_id).into_result()?;
    Ok(Json(state.store.applications_for_organization(org_id)?))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerdictPayload {
    approved: bool,
    #[serde(default)]
    reason: String,
}

/// Approve or reject a pending application. A rejection must carry a reason.
pub async fn decide(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<ApplicationId>,
    Json(payload): Json<VerdictPayload>,
) -> AppResult<Json<Application>> {
    let reviewer = ctx.authorize(&state.policies.sponsor_or_admin)?;
    let application = state.store.get_application_by_id(id)?;
    organization_reviewer(&state, ctx.session(), application.organization_id).into_result()?;

    let reason = payload.reason.trim();
    if !payload.approved && reason.is_empty() {
        return Err(AppError::user("bad_input", "A reason is required when rejecting an application."));
    }
    let verdict = Verdict { approved: payload.approved, reason: reason.to_string(), decided_at: session_clock_now() };
    let decided = state.store.decide_application(id, verdict)?;
    info!(
        reviewer_id = reviewer.identity.id,
        application_id = id,
        applicant_id = decided.applicant_id,
        approved = payload.approved,
        "application.decide"
    );
    Ok(Json(decided))
}
