//! Role types for route-level access control.
//!
//! Every invited user carries exactly one [`Role`]. Routes declare the
//! [`RoleSet`] allowed to reach them at registration time; the gate only
//! checks membership, it never special-cases a role.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ParseEnumError;

/// Authorization scope of an invited user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Platform administrator: user management and destructive operations.
    Admin,
    /// Registrar's office staff: manages students, courses, and grades.
    Scolarite,
    /// A student with read access to their own records.
    Student,
}

impl Role {
    /// All roles, in declaration order.
    pub const ALL: [Role; 3] = [Role::Admin, Role::Scolarite, Role::Student];

    /// Returns the canonical wire/storage name of the role.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::Scolarite => "SCOLARITE",
            Self::Student => "STUDENT",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| ParseEnumError {
                kind: "role",
                value: s.to_string(),
            })
    }
}

/// The set of roles allowed to reach a route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSet {
    roles: Vec<Role>,
}

impl RoleSet {
    /// Creates a role set from the given roles, ignoring duplicates.
    #[must_use]
    pub fn of(roles: &[Role]) -> Self {
        let mut deduped = Vec::with_capacity(roles.len());
        for role in roles {
            if !deduped.contains(role) {
                deduped.push(*role);
            }
        }
        Self { roles: deduped }
    }

    /// Administrators only (user management, deletions).
    #[must_use]
    pub fn admin() -> Self {
        Self::of(&[Role::Admin])
    }

    /// Administrators and registrar staff (course, student, grade mutation).
    #[must_use]
    pub fn staff() -> Self {
        Self::of(&[Role::Admin, Role::Scolarite])
    }

    /// Students only (self-service routes).
    #[must_use]
    pub fn student() -> Self {
        Self::of(&[Role::Student])
    }

    /// Returns true if the role is a member of this set.
    #[must_use]
    pub fn contains(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// Returns the roles as a slice.
    #[must_use]
    pub fn roles(&self) -> &[Role] {
        &self.roles
    }
}

impl fmt::Display for RoleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.roles.iter().map(Role::as_str).collect();
        write!(f, "{{{}}}", names.join(", "))
    }
}
