use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::principal::{IdentityId, OrganizationId};

pub type ApplicationId = i64;

/// A request by an applicant to be sponsored by an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub id: ApplicationId,
    pub applicant_id: IdentityId,
    pub organization_id: OrganizationId,
    #[serde(default)]
    pub comment: String,
    /// `None` while pending.
    pub approved: Option<bool>,
    /// Sponsor's explanation, set when the application is decided.
    #[serde(default)]
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl Application {
    pub fn new(
        applicant_id: IdentityId,
        organization_id: OrganizationId,
        comment: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            applicant_id,
            organization_id,
            comment: comment.into(),
            approved: None,
            reason: String::new(),
            created_at: now,
            decided_at: None,
        }
    }

    pub fn is_pending(&self) -> bool { self.approved.is_none() }
}

/// Outcome recorded against a pending application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub approved: bool,
    pub reason: String,
    pub decided_at: DateTime<Utc>,
}
