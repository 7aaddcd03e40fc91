use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

pub type IdentityId = i64;
pub type OrganizationId = i64;

/// What an identity may do in the app. Discriminants match the persisted role ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Acts on behalf of anyone, including content not owned by them.
    Admin = 1,
    /// Manages one organization and the drivers affiliated with it.
    Sponsor = 2,
    /// Registered but not yet affiliated; may only apply to organizations.
    User = 3,
    /// Affiliated with at least one sponsor organization; holds points there.
    Driver = 4,
}

impl Role {
    pub fn id(self) -> i32 { self as i32 }

    pub fn from_id(id: i32) -> Option<Role> {
        match id {
            1 => Some(Role::Admin),
            2 => Some(Role::Sponsor),
            3 => Some(Role::User),
            4 => Some(Role::Driver),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Sponsor => "sponsor",
            Role::User => "user",
            Role::Driver => "driver",
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

/// An account record. The password hash is opaque to the session/authorization core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub role: Role,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    #[serde(skip_serializing, default = "default_active")]
    pub is_active: bool,
    /// Organization ids this identity is affiliated with (unordered, unique).
    #[serde(default)]
    pub affiliations: BTreeSet<OrganizationId>,
}

fn default_active() -> bool { true }

impl Identity {
    pub fn new(id: IdentityId, email: impl Into<String>, role: Role) -> Self {
        Self {
            id,
            first_name: String::new(),
            last_name: String::new(),
            email: email.into(),
            role,
            password_hash: String::new(),
            is_active: true,
            affiliations: BTreeSet::new(),
        }
    }

    pub fn with_affiliations<I: IntoIterator<Item = OrganizationId>>(mut self, orgs: I) -> Self {
        self.affiliations = orgs.into_iter().collect();
        self
    }

    pub fn is_affiliated_with(&self, org_id: OrganizationId) -> bool { self.affiliations.contains(&org_id) }

    /// The single affiliation of a sponsor. `None` when the set does not hold exactly one id.
    pub fn sole_affiliation(&self) -> Option<OrganizationId> {
        if self.affiliations.len() == 1 { self.affiliations.iter().next().copied() } else { None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
}

/// A link between an identity and an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Affiliation {
    pub identity_id: IdentityId,
    pub organization_id: OrganizationId,
}
